// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # mailsource
//!
//! Query-based access to a remote IMAP/POP3 mailbox, exposed as a generic
//! record source: find, count, list and delete messages through condition
//! sets, and get every message back as a normalized, flat record.
//!
//! ## Architecture
//!
//! - **Configuration** (`config`): layered defaults, per-protocol port, TOML overrides
//! - **Connection** (`connection`): bounded-retry connect, health probe, expunge on close
//! - **Query translation** (`query`): conditions to explicit ids or search + sort
//! - **MIME walking** (`mime`): part lookup, attachment extraction, manifests
//! - **Record assembly** (`assemble`, `record`): header + structure + bodies to a flat record
//! - **Failure reporting** (`report`): `%s` message formatting, collect or raise
//! - **Transports** (`transport`): in-memory mock, IMAP behind the `imap` feature
//!
//! ## Library usage
//!
//! ```no_run
//! use mailsource::config::MailboxConfig;
//! use mailsource::query::Conditions;
//! use mailsource::source::{FindType, MailSource, Query};
//! use mailsource::transport::MockTransport;
//!
//! let mut source = MailSource::new(MailboxConfig::default(), MockTransport::new());
//! let query = Query::new(FindType::All)
//!     .conditions(Conditions::new().with("seen", false))
//!     .limit(10);
//! let outcome = source.read(&query).unwrap();
//! println!("{}", serde_json::to_string_pretty(&outcome.result).unwrap());
//! ```

pub mod assemble;
pub mod config;
pub mod connection;
pub mod error;
pub mod flag;
pub mod ids;
pub mod mime;
pub mod query;
pub mod record;
pub mod report;
pub mod source;
pub mod text;
pub mod transport;

pub use error::{MailError, MailResult};
pub use source::{FindType, MailSource, Query, QueryResult};
