//! Mail protocol client abstraction.
//!
//! `MailTransport` opens sessions; `MailStream` is one open session and
//! offers the blocking operations the mailbox layer needs (search, sort,
//! identity resolution, header/structure/body fetches, flag updates,
//! deletion and close).
//! - `MockTransport` keeps an in-memory mailbox for tests and embedding.
//! - `ImapTransport` (feature `imap`) talks to a real server through the
//!   `imap` crate.

pub mod mock;

#[cfg(feature = "imap")]
pub mod imap;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConnectionTarget;
use crate::flag::Flag;
use crate::ids::{SeqNo, Uid};
use crate::mime::{MimeNode, PartAddress};
use crate::query::{SearchCriteria, SortSpec};

pub use mock::{MockMessage, MockTransport};

#[cfg(feature = "imap")]
pub use self::imap::ImapTransport;

// ── TransportError ──────────────────────────────────────────────────────

/// A failure reported by the protocol client.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(
    code(mailsource::transport::client),
    help("The mail server or the connection to it reported an error.")
)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Convenience alias for protocol client operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Capabilities advertised by a session, returned by the health probe.
///
/// Only its presence matters to the connection manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(Vec<String>);

impl Capabilities {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Case-insensitive capability lookup.
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

// ── HeaderInfo ──────────────────────────────────────────────────────────

/// One address of an address header, split the way IMAP envelopes are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Local part (before the `@`).
    pub mailbox: Option<String>,
    /// Display name.
    pub personal: Option<String>,
    /// Domain part (after the `@`).
    pub host: Option<String>,
}

impl AddressEntry {
    pub fn new(personal: Option<&str>, mailbox: &str, host: &str) -> Self {
        Self {
            mailbox: Some(mailbox.to_string()),
            personal: personal.map(str::to_string),
            host: Some(host.to_string()),
        }
    }

    /// Split a bare `local@domain` address.
    pub fn parse(personal: Option<&str>, address: &str) -> Self {
        match address.rsplit_once('@') {
            Some((mailbox, host)) => Self::new(personal, mailbox, host),
            None => Self {
                mailbox: Some(address.to_string()).filter(|a| !a.is_empty()),
                personal: personal.map(str::to_string),
                host: None,
            },
        }
    }
}

/// Status characters as reported in a message header summary.
///
/// Each is a single character: `recent` is `R` (recent and seen), `N`
/// (recent and unseen) or blank; `unseen` is `U` for an old unseen message;
/// the others are `F`, `A`, `X` and `D` when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChars {
    pub recent: char,
    pub unseen: char,
    pub flagged: char,
    pub answered: char,
    pub draft: char,
    pub deleted: char,
}

impl Default for StatusChars {
    fn default() -> Self {
        Self {
            recent: ' ',
            unseen: ' ',
            flagged: ' ',
            answered: ' ',
            draft: ' ',
            deleted: ' ',
        }
    }
}

impl StatusChars {
    /// Derive status characters from a message's flag set.
    pub fn from_flags(flags: &[Flag]) -> Self {
        let has = |f: Flag| flags.contains(&f);
        let mark = |f: Flag, c: char| if has(f) { c } else { ' ' };
        let recent = match (has(Flag::Recent), has(Flag::Seen)) {
            (true, true) => 'R',
            (true, false) => 'N',
            (false, _) => ' ',
        };
        let unseen = if !has(Flag::Recent) && !has(Flag::Seen) {
            'U'
        } else {
            ' '
        };
        Self {
            recent,
            unseen,
            flagged: mark(Flag::Flagged, 'F'),
            answered: mark(Flag::Answered, 'A'),
            draft: mark(Flag::Draft, 'X'),
            deleted: mark(Flag::Deleted, 'D'),
        }
    }
}

/// Header summary of one message, fetched by sequence number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderInfo {
    /// Sequence number the header was fetched with.
    pub msgno: SeqNo,
    pub message_id: Option<String>,
    /// Raw `Date:` header value.
    pub date: Option<String>,
    pub subject: Option<String>,
    pub to: Vec<AddressEntry>,
    pub from: Vec<AddressEntry>,
    pub reply_to: Vec<AddressEntry>,
    /// `None` when the message carries no explicit `Sender:`.
    pub sender: Option<Vec<AddressEntry>>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    /// Message size in bytes.
    pub size: Option<u64>,
    pub status: StatusChars,
}

// ── Traits ──────────────────────────────────────────────────────────────

/// Opens sessions against a mail server.
pub trait MailTransport {
    /// Open and authenticate a session.
    fn open(
        &mut self,
        target: &ConnectionTarget,
        username: &str,
        password: &str,
    ) -> TransportResult<Box<dyn MailStream>>;

    /// Diagnostic text of the most recent failure, if any.
    fn last_error(&self) -> Option<String>;
}

/// One open session. Every operation blocks until the server answers.
pub trait MailStream {
    /// Lightweight health probe; `None` means the session is unusable.
    fn probe(&mut self) -> TransportResult<Option<Capabilities>>;

    /// Unique ids matching `criteria`, in server order.
    fn search(&mut self, criteria: &SearchCriteria) -> TransportResult<Vec<Uid>>;

    /// Unique ids matching `criteria`, ordered by `sort`.
    fn sort(&mut self, sort: SortSpec, criteria: &SearchCriteria) -> TransportResult<Vec<Uid>>;

    fn resolve_seq(&mut self, uid: Uid) -> TransportResult<SeqNo>;

    fn resolve_uid(&mut self, seq: SeqNo) -> TransportResult<Uid>;

    fn fetch_header(&mut self, seq: SeqNo) -> TransportResult<Option<HeaderInfo>>;

    fn fetch_structure(&mut self, uid: Uid) -> TransportResult<Option<MimeNode>>;

    /// Raw header block of the message.
    fn fetch_header_text(&mut self, uid: Uid) -> TransportResult<String>;

    /// Raw (still transfer-encoded) body of one part, without setting `\Seen`.
    fn fetch_body(&mut self, uid: Uid, part: &PartAddress) -> TransportResult<Vec<u8>>;

    /// Add `flags` to the message.
    fn set_flags(&mut self, uid: Uid, flags: &[Flag]) -> TransportResult<()>;

    /// Flag the message as deleted; removal happens on expunge.
    fn delete(&mut self, uid: Uid) -> TransportResult<()>;

    /// Close the session, optionally expunging deleted messages first.
    fn close(&mut self, expunge: bool) -> TransportResult<()>;
}
