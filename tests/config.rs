//! Loading mailbox configuration from TOML files.

use std::io::Write;

use mailsource::MailError;
use mailsource::config::{ConnectionType, MailboxConfig, ManifestMode};
use mailsource::flag::Flag;
use mailsource::report::ErrorMode;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn full_file_overrides_defaults() {
    let file = write_config(
        r#"
type = "imap"
server = "imap.example.com"
port = 993
username = "me"
password = "secret"
email = "me@example.com"
ssl = true
connect = "novalidate-cert"
retry = 5
auto_mark_as = ["seen", "flagged"]
error_handler = "raise"
attachment_manifest = "list"
"#,
    );
    let config = MailboxConfig::load(file.path()).unwrap();
    assert_eq!(config.connection_type, ConnectionType::Imap);
    assert_eq!(config.server, "imap.example.com");
    assert_eq!(config.port, 993);
    assert_eq!(config.password, "secret");
    assert_eq!(config.email, "me@example.com");
    assert_eq!(config.retry, 5);
    assert_eq!(config.auto_mark_as, vec![Flag::Seen, Flag::Flagged]);
    assert_eq!(config.error_handler, ErrorMode::Raise);
    assert_eq!(config.attachment_manifest, ManifestMode::List);
    assert_eq!(
        config.target().to_string(),
        "{imap.example.com:993/ssl/novalidate-cert}"
    );
}

#[test]
fn partial_file_keeps_protocol_defaults() {
    let file = write_config("type = \"pop3\"\nserver = \"pop.example.com\"\nusername = \"me\"\n");
    let config = MailboxConfig::load(file.path()).unwrap();
    assert_eq!(config.port, 110);
    assert_eq!(config.email, "me");
    assert_eq!(config.retry, 3);
    assert_eq!(config.auto_mark_as, vec![Flag::Seen]);
    assert_eq!(config.target().to_string(), "{pop.example.com:110/pop3}");
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = MailboxConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, MailError::ConfigRead { .. }));
}

#[test]
fn bad_toml_names_the_file() {
    let file = write_config("retry = \"many\"\n");
    let err = MailboxConfig::load(file.path()).unwrap_err();
    match err {
        MailError::ConfigParse { path, .. } => {
            assert_eq!(path, file.path().display().to_string());
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn unknown_keys_are_rejected() {
    let file = write_config("hostname = \"x\"\n");
    assert!(matches!(
        MailboxConfig::load(file.path()),
        Err(MailError::ConfigParse { .. })
    ));
}

#[test]
fn recent_cannot_be_auto_marked() {
    let file = write_config("auto_mark_as = [\"recent\"]\n");
    assert!(matches!(
        MailboxConfig::load(file.path()),
        Err(MailError::Config { .. })
    ));
}
