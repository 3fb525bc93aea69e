//! Layered mailbox configuration.
//!
//! A [`MailboxConfig`] is resolved exactly once from three layers: global
//! defaults, per-protocol defaults (the port), and caller overrides. The
//! overrides are usually read from a TOML file. Once resolved the config is
//! never mutated.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};
use crate::flag::Flag;
use crate::report::ErrorMode;

/// Default IMAP port (plain or STARTTLS).
pub const IMAP_PORT: u16 = 143;

/// Default POP3 port.
pub const POP3_PORT: u16 = 110;

// ── ConnectionType ──────────────────────────────────────────────────────

/// Which mail protocol the server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Imap,
    Pop3,
}

impl ConnectionType {
    /// The protocol's default port.
    pub fn default_port(self) -> u16 {
        match self {
            ConnectionType::Imap => IMAP_PORT,
            ConnectionType::Pop3 => POP3_PORT,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Imap => f.write_str("imap"),
            ConnectionType::Pop3 => f.write_str("pop3"),
        }
    }
}

/// Shape of the attachment manifest embedded in every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestMode {
    /// Number of parts containing attachments.
    #[default]
    Count,
    /// One summary entry per attachment.
    List,
}

// ── ConfigOverrides ─────────────────────────────────────────────────────

/// Caller-supplied configuration; every unset field falls back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default, rename = "type")]
    pub connection_type: Option<ConnectionType>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ssl: Option<bool>,
    /// Extra connection flags appended to the target (e.g. `novalidate-cert`).
    #[serde(default)]
    pub connect: Option<String>,
    #[serde(default)]
    pub retry: Option<u32>,
    #[serde(default)]
    pub auto_mark_as: Option<Vec<Flag>>,
    #[serde(default)]
    pub error_handler: Option<ErrorMode>,
    #[serde(default)]
    pub attachment_manifest: Option<ManifestMode>,
}

impl ConfigOverrides {
    /// Load overrides from a TOML file.
    pub fn load(path: &Path) -> MailResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MailError::ConfigRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            MailError::ConfigParse { message, .. } => MailError::ConfigParse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse overrides from a TOML string.
    pub fn from_toml(content: &str) -> MailResult<Self> {
        toml::from_str(content).map_err(|e| MailError::ConfigParse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }
}

// ── MailboxConfig ───────────────────────────────────────────────────────

/// Fully resolved, immutable mailbox configuration.
#[derive(Clone, Serialize)]
pub struct MailboxConfig {
    pub connection_type: ConnectionType,
    pub server: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Account address; defaults to `username` when unset.
    pub email: String,
    pub ssl: bool,
    pub connect: Option<String>,
    /// Connection attempts; always at least 1 when connecting.
    pub retry: u32,
    /// Flags applied to every message after it has been read.
    pub auto_mark_as: Vec<Flag>,
    pub error_handler: ErrorMode,
    pub attachment_manifest: ManifestMode,
}

impl MailboxConfig {
    /// Merge overrides over the global and per-protocol defaults.
    pub fn resolve(overrides: ConfigOverrides) -> MailResult<Self> {
        let connection_type = overrides.connection_type.unwrap_or_default();
        let username = overrides.username.unwrap_or_default();
        let email = overrides
            .email
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| username.clone());

        let config = Self {
            connection_type,
            server: overrides.server.unwrap_or_else(|| "localhost".to_string()),
            port: overrides
                .port
                .unwrap_or_else(|| connection_type.default_port()),
            username,
            password: overrides.password.unwrap_or_default(),
            email,
            ssl: overrides.ssl.unwrap_or(false),
            connect: overrides.connect.filter(|c| !c.is_empty()),
            retry: overrides.retry.unwrap_or(3),
            auto_mark_as: overrides.auto_mark_as.unwrap_or_else(|| vec![Flag::Seen]),
            error_handler: overrides.error_handler.unwrap_or_default(),
            attachment_manifest: overrides.attachment_manifest.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load overrides from a TOML file and resolve them.
    pub fn load(path: &Path) -> MailResult<Self> {
        Self::resolve(ConfigOverrides::load(path)?)
    }

    fn validate(&self) -> MailResult<()> {
        if self.server.is_empty() {
            return Err(MailError::Config {
                message: "server must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(MailError::Config {
                message: "port must be non-zero".to_string(),
            });
        }
        if let Some(flag) = self.auto_mark_as.iter().find(|f| !f.is_markable()) {
            return Err(MailError::Config {
                message: format!("auto_mark_as cannot contain \"{flag}\""),
            });
        }
        Ok(())
    }

    /// The connection target for this configuration.
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget {
            connection_type: self.connection_type,
            server: self.server.clone(),
            port: self.port,
            ssl: self.ssl,
            connect: self.connect.clone(),
        }
    }

    /// Number of connection attempts to make (never zero).
    pub fn attempts(&self) -> u32 {
        self.retry.max(1)
    }
}

impl fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("type", &self.connection_type)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("ssl", &self.ssl)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Imap,
            server: "localhost".to_string(),
            port: IMAP_PORT,
            username: String::new(),
            password: String::new(),
            email: String::new(),
            ssl: false,
            connect: None,
            retry: 3,
            auto_mark_as: vec![Flag::Seen],
            error_handler: ErrorMode::Collect,
            attachment_manifest: ManifestMode::Count,
        }
    }
}

// ── ConnectionTarget ────────────────────────────────────────────────────

/// Where to connect, rendered as `{server:port[/pop3][/ssl][/suffix]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub connection_type: ConnectionType,
    pub server: String,
    pub port: u16,
    pub ssl: bool,
    pub connect: Option<String>,
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}:{}", self.server, self.port)?;
        if self.connection_type == ConnectionType::Pop3 {
            f.write_str("/pop3")?;
        }
        if self.ssl {
            f.write_str("/ssl")?;
        }
        if let Some(suffix) = &self.connect {
            write!(f, "/{suffix}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_imap() {
        let config = MailboxConfig::resolve(ConfigOverrides::default()).unwrap();
        assert_eq!(config.connection_type, ConnectionType::Imap);
        assert_eq!(config.server, "localhost");
        assert_eq!(config.port, 143);
        assert_eq!(config.retry, 3);
        assert_eq!(config.auto_mark_as, vec![Flag::Seen]);
        assert_eq!(config.error_handler, ErrorMode::Collect);
    }

    #[test]
    fn pop3_gets_its_own_port() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            connection_type: Some(ConnectionType::Pop3),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.port, 110);
    }

    #[test]
    fn explicit_port_wins_over_protocol_default() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            connection_type: Some(ConnectionType::Pop3),
            port: Some(995),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.port, 995);
    }

    #[test]
    fn email_defaults_to_username() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            username: Some("alice".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.email, "alice");

        let config = MailboxConfig::resolve(ConfigOverrides {
            username: Some("alice".into()),
            email: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.email, "alice");

        let config = MailboxConfig::resolve(ConfigOverrides {
            username: Some("alice".into()),
            email: Some("alice@example.com".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.email, "alice@example.com");
    }

    #[test]
    fn rejects_recent_as_auto_mark() {
        let err = MailboxConfig::resolve(ConfigOverrides {
            auto_mark_as: Some(vec![Flag::Recent]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("auto_mark_as"));
    }

    #[test]
    fn rejects_empty_server_and_zero_port() {
        let err = MailboxConfig::resolve(ConfigOverrides {
            server: Some(String::new()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("server"));

        let err = MailboxConfig::resolve(ConfigOverrides {
            port: Some(0),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn attempts_never_zero() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            retry: Some(0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn imap_target_string() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            server: Some("mail.example.com".into()),
            ssl: Some(true),
            port: Some(993),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.target().to_string(), "{mail.example.com:993/ssl}");
    }

    #[test]
    fn pop3_target_string_with_suffix() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            connection_type: Some(ConnectionType::Pop3),
            server: Some("pop.example.com".into()),
            connect: Some("novalidate-cert".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            config.target().to_string(),
            "{pop.example.com:110/pop3/novalidate-cert}"
        );
    }

    #[test]
    fn parse_toml_overrides() {
        let overrides = ConfigOverrides::from_toml(
            r#"
type = "pop3"
server = "pop.example.com"
username = "bob"
password = "secret"
ssl = true
retry = 5
auto_mark_as = ["seen", "flagged"]
error_handler = "raise"
attachment_manifest = "list"
"#,
        )
        .unwrap();
        let config = MailboxConfig::resolve(overrides).unwrap();
        assert_eq!(config.connection_type, ConnectionType::Pop3);
        assert_eq!(config.port, 110);
        assert_eq!(config.email, "bob");
        assert_eq!(config.retry, 5);
        assert_eq!(config.auto_mark_as, vec![Flag::Seen, Flag::Flagged]);
        assert_eq!(config.error_handler, ErrorMode::Raise);
        assert_eq!(config.attachment_manifest, ManifestMode::List);
    }

    #[test]
    fn parse_toml_rejects_unknown_keys() {
        let err = ConfigOverrides::from_toml("hostname = \"x\"").unwrap_err();
        assert!(matches!(err, MailError::ConfigParse { .. }));
    }

    #[test]
    fn debug_hides_password() {
        let config = MailboxConfig::resolve(ConfigOverrides {
            password: Some("hunter2".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
