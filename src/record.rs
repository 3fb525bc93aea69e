//! Normalized message and attachment records, plus the schema they follow.
//!
//! Every record field has a safe default, so a record is never partial:
//! data the server could not provide degrades to an empty string, zero or
//! `false`.

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::ids::{SeqNo, Uid};

// ── ThreadCount ─────────────────────────────────────────────────────────

/// Thread-size estimate.
///
/// Only a placeholder: replies are reported as `Unknown`, everything else
/// as zero. No real threading is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadCount {
    /// Rendered as `"?"`.
    Unknown,
    #[default]
    Zero,
}

impl ThreadCount {
    /// `Unknown` when either reply-chain header is present, zero otherwise.
    pub fn estimate(in_reply_to: Option<&str>, references: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.is_some_and(|s| !s.is_empty());
        if present(in_reply_to) || present(references) {
            ThreadCount::Unknown
        } else {
            ThreadCount::Zero
        }
    }
}

impl Serialize for ThreadCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ThreadCount::Unknown => serializer.serialize_str("?"),
            ThreadCount::Zero => serializer.serialize_u32(0),
        }
    }
}

// ── MessageRecord ───────────────────────────────────────────────────────

/// One message, flattened into the fixed field set of [`SCHEMA`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageRecord {
    pub id: Uid,
    pub message_id: String,
    /// Sequence number at fetch time.
    pub email_number: SeqNo,

    pub to: String,
    pub to_name: String,
    pub from: String,
    pub from_name: String,
    pub reply_to: String,
    pub reply_to_name: String,
    pub sender: String,
    pub sender_name: String,

    /// HTML-escaped subject.
    pub subject: String,
    pub slug: String,
    /// Raw header block.
    pub header: String,
    /// HTML body.
    pub body: String,
    /// Plain-text body.
    pub plainmsg: String,
    pub size: u64,

    pub recent: bool,
    pub seen: bool,
    pub flagged: bool,
    pub answered: bool,
    pub draft: bool,
    pub deleted: bool,

    pub thread_count: ThreadCount,
    /// JSON-encoded attachment manifest.
    pub attachments: String,
    pub in_reply_to: String,
    pub reference: String,
    pub new: bool,
    /// `YYYY-MM-DD HH:MM:SS`, UTC. Empty when the date could not be parsed.
    pub created: String,
}

// ── AttachmentRecord ────────────────────────────────────────────────────

/// One extracted attachment of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttachmentRecord {
    /// Parent message.
    pub mail_id: Uid,
    pub message_id: Uid,
    pub is_attachment: bool,
    /// From the content-disposition `filename` parameter.
    pub filename: String,
    /// `TYPE/SUBTYPE`.
    pub mime_type: String,
    /// Lower-case subtype.
    #[serde(rename = "type")]
    pub kind: String,
    /// From the content-type `name` parameter.
    pub name: String,
    pub size: u64,
    /// Payload, decoded when the transfer encoding was quoted-printable.
    #[serde(serialize_with = "serialize_payload")]
    pub attachment: Vec<u8>,
    /// Encoding label of a payload left encoded (e.g. `"base64"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// UTF-8 payloads serialize as text, anything else as a byte array.
fn serialize_payload<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(payload) {
        Ok(text) => serializer.serialize_str(text),
        Err(_) => serializer.collect_seq(payload),
    }
}

/// A message record plus its attachments, when they were requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedMail {
    #[serde(rename = "Mail")]
    pub message: MessageRecord,
    #[serde(rename = "Attachment", skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentRecord>>,
}

/// The single aggregate row a count query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountRecord {
    #[serde(rename = "Mail")]
    pub totals: Totals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub count: usize,
}

impl CountRecord {
    pub fn new(count: usize) -> Self {
        Self {
            totals: Totals { count },
        }
    }

    pub fn count(&self) -> usize {
        self.totals.count
    }
}

// ── Schema ──────────────────────────────────────────────────────────────

/// Storage kind of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    String,
    Text,
    Boolean,
    Datetime,
}

/// One column of the record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    pub primary: bool,
}

const fn field(name: &'static str, kind: ColumnKind, length: Option<u32>) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        length,
        primary: false,
    }
}

const fn string(name: &'static str) -> FieldSpec {
    field(name, ColumnKind::String, Some(255))
}

const fn boolean(name: &'static str) -> FieldSpec {
    field(name, ColumnKind::Boolean, Some(1))
}

/// Columns of [`MessageRecord`], in record order.
pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        primary: true,
        ..field("id", ColumnKind::Integer, Some(15))
    },
    string("message_id"),
    field("email_number", ColumnKind::Integer, Some(15)),
    string("to"),
    string("to_name"),
    string("from"),
    string("from_name"),
    string("reply_to"),
    string("reply_to_name"),
    string("sender"),
    string("sender_name"),
    string("subject"),
    string("slug"),
    field("header", ColumnKind::Text, None),
    field("body", ColumnKind::Text, None),
    field("plainmsg", ColumnKind::Text, None),
    string("size"),
    boolean("recent"),
    boolean("seen"),
    boolean("flagged"),
    boolean("answered"),
    boolean("draft"),
    boolean("deleted"),
    field("thread_count", ColumnKind::Integer, Some(15)),
    field("attachments", ColumnKind::Text, None),
    string("in_reply_to"),
    string("reference"),
    boolean("new"),
    field("created", ColumnKind::Datetime, None),
];
