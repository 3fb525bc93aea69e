//! Error taxonomy for mailbox access, with miette diagnostics.
//!
//! Reporter-produced variants carry an already formatted `message` (see
//! [`crate::report`]); the remaining variants wrap configuration and
//! transport problems.

use miette::Diagnostic;
use thiserror::Error;

/// Every failure the mailbox layer can surface to its caller.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum MailError {
    #[error("connection failed: {message}")]
    #[diagnostic(
        code(mailsource::connect::exhausted),
        help(
            "All connection attempts failed. Check that the server is reachable, the port \
             and ssl settings match, and the credentials are valid. Raising `retry` only \
             helps with transient failures."
        )
    )]
    Connect { message: String, attempts: u32 },

    #[error("identity mismatch: {message}")]
    #[diagnostic(
        code(mailsource::record::identity_mismatch),
        help(
            "The unique id did not survive the round trip through its sequence number. \
             The mailbox probably changed while it was being read; retry the query."
        )
    )]
    IdentityMismatch { message: String },

    #[error("missing required field: {message}")]
    #[diagnostic(
        code(mailsource::record::missing_field),
        help("The server returned a message without a date header or without a content type.")
    )]
    MissingRequiredField { message: String },

    #[error("flag update failed: {message}")]
    #[diagnostic(
        code(mailsource::record::flag_update),
        help(
            "The message was read but could not be marked. Check that the mailbox is not \
             opened read-only, or empty `auto_mark_as` to disable marking."
        )
    )]
    FlagUpdate { message: String },

    #[error("delete failed: {message}")]
    #[diagnostic(
        code(mailsource::delete::failed),
        help("The server refused to flag the message as deleted.")
    )]
    Delete { message: String },

    #[error("unknown query shape: {message}")]
    #[diagnostic(
        code(mailsource::query::unknown_shape),
        help("Supported find types are: list, count, all, first.")
    )]
    UnknownQueryShape { message: String },

    #[error("transport error: {message}")]
    #[diagnostic(
        code(mailsource::transport),
        help("The underlying mail protocol client reported an error.")
    )]
    Transport { message: String },

    #[error("not connected")]
    #[diagnostic(
        code(mailsource::connect::not_connected),
        help("Call `connect()` before issuing mailbox operations.")
    )]
    NotConnected,

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(mailsource::config::invalid),
        help(
            "Check the mailbox configuration. `server` must not be empty, `port` must be \
             non-zero and `auto_mark_as` may only name seen, answered, flagged, deleted or draft."
        )
    )]
    Config { message: String },

    #[error("failed to read config file: {path}: {message}")]
    #[diagnostic(
        code(mailsource::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    ConfigRead { path: String, message: String },

    #[error("failed to parse config file: {path}: {message}")]
    #[diagnostic(
        code(mailsource::config::parse),
        help("Check the TOML syntax and the value types in the config file.")
    )]
    ConfigParse { path: String, message: String },
}

impl MailError {
    /// Whether this failure aborts only a single message of a batch read.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::IdentityMismatch { .. } | Self::MissingRequiredField { .. }
        )
    }

    /// Whether this failure is logged and collected rather than aborting the call.
    pub fn is_recoverable(&self) -> bool {
        self.is_per_message() || matches!(self, Self::FlagUpdate { .. } | Self::Delete { .. })
    }
}

impl From<crate::transport::TransportError> for MailError {
    fn from(e: crate::transport::TransportError) -> Self {
        Self::Transport { message: e.message }
    }
}

/// Convenience alias for mailbox operations.
pub type MailResult<T> = std::result::Result<T, MailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_display() {
        let err = MailError::Connect {
            message: "Unable to get imap_thread after 3 retries. 'refused'".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("after 3 retries"));
    }

    #[test]
    fn per_message_classification() {
        let mismatch = MailError::IdentityMismatch {
            message: "x".to_string(),
        };
        let missing = MailError::MissingRequiredField {
            message: "x".to_string(),
        };
        let flag = MailError::FlagUpdate {
            message: "x".to_string(),
        };
        assert!(mismatch.is_per_message());
        assert!(missing.is_per_message());
        assert!(!flag.is_per_message());
        assert!(flag.is_recoverable());
        assert!(!MailError::NotConnected.is_recoverable());
    }

    #[test]
    fn transport_error_converts() {
        let err: MailError = crate::transport::TransportError::new("socket closed").into();
        assert!(matches!(err, MailError::Transport { .. }));
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn result_alias_works() {
        let ok: MailResult<u32> = Ok(7);
        assert_eq!(ok.unwrap(), 7);

        let err: MailResult<u32> = Err(MailError::NotConnected);
        assert!(err.is_err());
    }
}
