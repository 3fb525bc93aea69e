//! Per-message retrieval: turns the server's header summary, structure tree
//! and part bodies into one [`MessageRecord`].
//!
//! Only three conditions abort a message: a unique id that does not survive
//! its round trip through the sequence number, a header without a date, and
//! a missing structure. Everything else degrades to field defaults.

use chrono::{DateTime, FixedOffset, Utc};

use crate::config::MailboxConfig;
use crate::error::{MailError, MailResult};
use crate::flag;
use crate::ids::{SeqNo, Uid};
use crate::mime::{MimeNode, MimeWalker, walker};
use crate::record::{FetchedMail, MessageRecord, ThreadCount};
use crate::report::{self, Arg, Reporter};
use crate::text;
use crate::transport::{AddressEntry, HeaderInfo, MailStream, StatusChars};

const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Person ──────────────────────────────────────────────────────────────

/// The first address of an address header, resolved leniently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    pub mailbox: String,
    /// Display name; falls back to the mailbox.
    pub name: String,
    pub host: String,
    /// `mailbox@host`, or empty when either half is missing.
    pub address: String,
    /// `"name" <address>` when a name exists, else the bare address.
    pub full: String,
}

impl Person {
    pub fn resolve(entries: &[AddressEntry]) -> Self {
        let first = entries.first();
        let mailbox = first
            .and_then(|e| e.mailbox.clone())
            .unwrap_or_default();
        let name = first
            .and_then(|e| e.personal.clone())
            .unwrap_or_else(|| mailbox.clone());
        let host = first.and_then(|e| e.host.clone()).unwrap_or_default();

        let address = if !mailbox.is_empty() && !host.is_empty() {
            format!("{mailbox}@{host}")
        } else {
            String::new()
        };
        let full = if name.is_empty() {
            address.clone()
        } else {
            format!("\"{name}\" <{address}>")
        };

        Self {
            mailbox,
            name,
            host,
            address,
            full,
        }
    }
}

// ── RecordAssembler ─────────────────────────────────────────────────────

/// Builds records for one mailbox configuration.
#[derive(Debug, Clone, Copy)]
pub struct RecordAssembler<'c> {
    config: &'c MailboxConfig,
}

impl<'c> RecordAssembler<'c> {
    pub fn new(config: &'c MailboxConfig) -> Self {
        Self { config }
    }

    /// Fetch and normalize the message `uid`.
    ///
    /// Returns a per-message error ([`MailError::is_per_message`]) when the
    /// message must be skipped. A failed auto-mark goes through `reporter`
    /// and only aborts in raise mode.
    pub fn assemble(
        &self,
        stream: &mut dyn MailStream,
        uid: Uid,
        include_attachments: bool,
        reporter: &mut Reporter,
    ) -> MailResult<FetchedMail> {
        let seq = verify_identity(stream, uid)?;

        let header = match stream.fetch_header(seq) {
            Ok(Some(header)) if header.date.is_some() => header,
            Ok(_) => return Err(missing_date(uid)),
            Err(e) => {
                tracing::debug!(uid = %uid, error = %e, "header fetch failed");
                return Err(missing_date(uid));
            }
        };

        let structure = match stream.fetch_structure(uid) {
            Ok(Some(structure)) => structure,
            Ok(None) => return Err(missing_structure(uid)),
            Err(e) => {
                tracing::debug!(uid = %uid, error = %e, "structure fetch failed");
                return Err(missing_structure(uid));
            }
        };

        let mut record = self.base_record(uid, seq, &header, &structure);

        record.header = stream.fetch_header_text(uid).unwrap_or_else(|e| {
            tracing::warn!(uid = %uid, error = %e, "header text unavailable");
            String::new()
        });

        let mut walker = MimeWalker::new(stream);
        record.body = body_text(&mut walker, uid, "TEXT/HTML", &structure);
        record.plainmsg = body_text(&mut walker, uid, "TEXT/PLAIN", &structure);
        let attachments =
            include_attachments.then(|| walker.extract_attachments(uid, &structure));

        self.auto_mark(stream, uid, reporter)?;

        tracing::debug!(uid = %uid, seq = %seq, "assembled message");
        Ok(FetchedMail {
            message: record,
            attachments,
        })
    }

    /// Everything derivable from the header summary and structure alone.
    fn base_record(
        &self,
        uid: Uid,
        seq: SeqNo,
        header: &HeaderInfo,
        structure: &MimeNode,
    ) -> MessageRecord {
        let to = Person::resolve(&header.to);
        let from = Person::resolve(&header.from);
        let reply_to = Person::resolve(&header.reply_to);
        let sender = Person::resolve(header.sender.as_deref().unwrap_or(&header.from));

        let subject = header.subject.as_deref().unwrap_or_default();
        let in_reply_to = header.in_reply_to.clone().unwrap_or_default();
        let StatusChars {
            recent,
            unseen,
            flagged,
            answered,
            draft,
            deleted,
        } = header.status;

        MessageRecord {
            id: uid,
            message_id: header.message_id.clone().unwrap_or_default(),
            email_number: seq,

            to: to.address,
            to_name: to.name,
            from: from.address,
            from_name: from.name,
            reply_to: reply_to.address,
            reply_to_name: reply_to.name,
            sender: sender.address,
            sender_name: sender.name,

            subject: text::html_escape(subject),
            slug: text::slug(subject),
            header: String::new(),
            body: String::new(),
            plainmsg: String::new(),
            size: header.size.unwrap_or(0),

            recent: recent == 'R',
            seen: unseen != 'U',
            flagged: flagged == 'F',
            answered: answered == 'A',
            draft: draft == 'X',
            deleted: deleted == 'D',

            thread_count: ThreadCount::estimate(
                header.in_reply_to.as_deref(),
                header.references.as_deref(),
            ),
            attachments: walker::manifest(structure, self.config.attachment_manifest),
            new: leading_int(&in_reply_to) != 0,
            in_reply_to,
            reference: header.references.clone().unwrap_or_default(),
            created: header.date.as_deref().map(created).unwrap_or_default(),
        }
    }

    /// Apply the configured auto-mark flags.
    fn auto_mark(
        &self,
        stream: &mut dyn MailStream,
        uid: Uid,
        reporter: &mut Reporter,
    ) -> MailResult<()> {
        let marks = &self.config.auto_mark_as;
        if marks.is_empty() {
            return Ok(());
        }
        match stream.set_flags(uid, marks) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(uid = %uid, error = %e, "flag store failed");
                let message = report::format(
                    "Unable to mark email %s as %s",
                    &[Arg::from(uid), Arg::from(flag::flag_list(marks))],
                );
                reporter.report(MailError::FlagUpdate { message })
            }
        }
    }
}

/// Resolve the sequence number of `uid` and check it maps back to `uid`.
fn verify_identity(stream: &mut dyn MailStream, uid: Uid) -> MailResult<SeqNo> {
    let mismatch = |mail_uid: Arg| MailError::IdentityMismatch {
        message: report::format(
            "Mail id mismatch. parameter id: %s vs mail id: %s",
            &[Arg::from(uid), mail_uid],
        ),
    };

    let seq = stream.resolve_seq(uid).map_err(|e| {
        tracing::debug!(uid = %uid, error = %e, "sequence number lookup failed");
        mismatch(Arg::from(None::<u32>))
    })?;
    let mail_uid = stream.resolve_uid(seq).map_err(|e| {
        tracing::debug!(uid = %uid, seq = %seq, error = %e, "unique id lookup failed");
        mismatch(Arg::from(None::<u32>))
    })?;

    if mail_uid != uid {
        return Err(mismatch(Arg::from(mail_uid)));
    }
    Ok(seq)
}

fn missing_date(uid: Uid) -> MailError {
    MailError::MissingRequiredField {
        message: report::format(
            "Unable to find mail date property in Mail corresponding with uid: %s. Something must be wrong",
            &[Arg::from(uid)],
        ),
    }
}

fn missing_structure(uid: Uid) -> MailError {
    MailError::MissingRequiredField {
        message: report::format(
            "Unable to find structure type property in Mail corresponding with uid: %s. Something must be wrong",
            &[Arg::from(uid)],
        ),
    }
}

fn body_text(walker: &mut MimeWalker<'_>, uid: Uid, mime_type: &str, structure: &MimeNode) -> String {
    match walker.find_part(uid, mime_type, structure) {
        Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(None) => String::new(),
        Err(e) => {
            tracing::warn!(uid = %uid, mime_type, error = %e, "body part unavailable");
            String::new()
        }
    }
}

/// Render a `Date:` header as `YYYY-MM-DD HH:MM:SS` in UTC.
///
/// Returns an empty string when the date cannot be parsed.
pub fn created(date: &str) -> String {
    parse_date(date)
        .map(|d| d.with_timezone(&Utc).format(CREATED_FORMAT).to_string())
        .unwrap_or_else(|e| {
            tracing::debug!(date, error = %e, "unparseable date header");
            String::new()
        })
}

/// Unix timestamp of a `Date:` header, for ordering by message date.
pub fn date_timestamp(date: &str) -> Option<i64> {
    parse_date(date).ok().map(|d| d.timestamp())
}

fn parse_date(date: &str) -> chrono::ParseResult<DateTime<FixedOffset>> {
    let trimmed = strip_comment(date.trim());
    DateTime::parse_from_rfc2822(trimmed).or_else(|_| DateTime::parse_from_rfc3339(trimmed))
}

/// Drop a trailing `(comment)`, as in `... +0000 (UTC)`.
fn strip_comment(date: &str) -> &str {
    match date.rfind('(') {
        Some(open) if date.ends_with(')') => date[..open].trim_end(),
        _ => date,
    }
}

/// Leading integer of a string, `0` when there is none.
fn leading_int(value: &str) -> i64 {
    let s = value.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map_or(0, |n| sign * n)
}
