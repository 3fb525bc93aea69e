//! IMAP transport over the `imap` crate, with or without TLS.
//!
//! Structure comes from `BODYSTRUCTURE`. Part bodies are cut from the full
//! message (`BODY.PEEK[]`, parsed with `mail-parser`, fetched on first use)
//! so they keep their transfer encoding. SORT is emulated client-side from
//! the envelope `Date:`, `INTERNALDATE` and `RFC822.SIZE`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;

use imap_proto::types::{BodyContentCommon, BodyStructure, Capability, ContentEncoding};
use mail_parser::{Message, MessageParser, PartType};

use super::{
    AddressEntry, Capabilities, HeaderInfo, MailStream, MailTransport, StatusChars,
    TransportError, TransportResult,
};
use crate::assemble;
use crate::config::{ConnectionTarget, ConnectionType};
use crate::flag::Flag;
use crate::ids::{SeqNo, Uid};
use crate::mime::{MimeNode, PartAddress, PrimaryType, TransferEncoding};
use crate::query::{SearchCriteria, SortKey, SortSpec};

/// Mailbox selected after login.
const DEFAULT_MAILBOX: &str = "INBOX";

/// Content-type parameters carried into the structure tree.
const TYPE_PARAMS: [&str; 3] = ["name", "charset", "boundary"];

// ── ImapTransport ───────────────────────────────────────────────────────

/// Opens IMAP sessions. POP3 targets are refused.
#[derive(Debug, Default)]
pub struct ImapTransport {
    last_error: Option<String>,
}

impl ImapTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&mut self, message: String) -> TransportError {
        self.last_error = Some(message.clone());
        TransportError::new(message)
    }
}

impl MailTransport for ImapTransport {
    fn open(
        &mut self,
        target: &ConnectionTarget,
        username: &str,
        password: &str,
    ) -> TransportResult<Box<dyn MailStream>> {
        if target.connection_type == ConnectionType::Pop3 {
            return Err(self.fail(format!("{target}: POP3 is not supported by the IMAP transport")));
        }
        let options = ConnectOptions::parse(target.connect.as_deref());

        let opened = if target.ssl {
            open_tls(target, &options, username, password)
                .map(|s| Box::new(ImapStream::new(s)) as Box<dyn MailStream>)
        } else {
            open_plain(target, &options, username, password)
                .map(|s| Box::new(ImapStream::new(s)) as Box<dyn MailStream>)
        };

        match opened {
            Ok(stream) => {
                tracing::debug!(mailbox = %target, folder = %options.mailbox, "imap session opened");
                Ok(stream)
            }
            Err(message) => Err(self.fail(message)),
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}

fn open_tls(
    target: &ConnectionTarget,
    options: &ConnectOptions,
    username: &str,
    password: &str,
) -> Result<::imap::Session<native_tls::TlsStream<TcpStream>>, String> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(!options.validate_cert)
        .build()
        .map_err(|e| format!("TLS connector build failed: {e}"))?;

    let client = ::imap::connect((target.server.as_str(), target.port), &target.server, &tls)
        .map_err(|e| format!("IMAP connection to {target} failed: {e}"))?;

    let mut session = client
        .login(username, password)
        .map_err(|e| format!("IMAP login failed: {}", e.0))?;
    select(&mut session, &options.mailbox)?;
    Ok(session)
}

fn open_plain(
    target: &ConnectionTarget,
    options: &ConnectOptions,
    username: &str,
    password: &str,
) -> Result<::imap::Session<TcpStream>, String> {
    let tcp = TcpStream::connect((target.server.as_str(), target.port))
        .map_err(|e| format!("IMAP connection to {target} failed: {e}"))?;

    let client = ::imap::Client::new(tcp);
    let mut session = client
        .login(username, password)
        .map_err(|e| format!("IMAP login failed: {}", e.0))?;
    select(&mut session, &options.mailbox)?;
    Ok(session)
}

fn select<S: Read + Write>(session: &mut ::imap::Session<S>, mailbox: &str) -> Result<(), String> {
    session
        .select(mailbox)
        .map(|_| ())
        .map_err(|e| format!("IMAP SELECT {mailbox} failed: {e}"))
}

/// Flags from the `/`-separated connect suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectOptions {
    validate_cert: bool,
    mailbox: String,
}

impl ConnectOptions {
    fn parse(suffix: Option<&str>) -> Self {
        let mut options = Self {
            validate_cert: true,
            mailbox: DEFAULT_MAILBOX.to_string(),
        };
        for item in suffix.unwrap_or_default().split('/').map(str::trim) {
            match item {
                "" => {}
                "novalidate-cert" => options.validate_cert = false,
                "validate-cert" => options.validate_cert = true,
                other => match other.strip_prefix("mailbox=") {
                    Some(name) if !name.is_empty() => options.mailbox = name.to_string(),
                    _ => tracing::debug!(option = other, "ignoring connect option"),
                },
            }
        }
        options
    }
}

// ── ImapStream ──────────────────────────────────────────────────────────

/// One logged-in session with a selected mailbox.
pub struct ImapStream<S: Read + Write> {
    session: Option<::imap::Session<S>>,
    /// Last fully fetched message, keyed by uid.
    cached: Option<(Uid, Vec<u8>)>,
}

impl<S: Read + Write> ImapStream<S> {
    fn new(session: ::imap::Session<S>) -> Self {
        Self {
            session: Some(session),
            cached: None,
        }
    }

    fn session(&mut self) -> TransportResult<&mut ::imap::Session<S>> {
        self.session
            .as_mut()
            .ok_or_else(|| TransportError::new("IMAP session already closed"))
    }

    fn search_set(&mut self, criteria: &SearchCriteria) -> TransportResult<Vec<u32>> {
        let query = criteria_string(criteria);
        let found = self
            .session()?
            .uid_search(&query)
            .map_err(|e| TransportError::new(format!("IMAP UID SEARCH {query} failed: {e}")))?;
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// The whole raw message, fetched once per uid.
    fn raw_message(&mut self, uid: Uid) -> TransportResult<&[u8]> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == uid);
        if !hit {
            let fetches = self
                .session()?
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .map_err(|e| TransportError::new(format!("IMAP UID FETCH {uid} failed: {e}")))?;
            let body = fetches
                .iter()
                .find_map(|f| f.body())
                .map(<[u8]>::to_vec)
                .ok_or_else(|| TransportError::new(format!("no message with uid {uid}")))?;
            self.cached = Some((uid, body));
        }
        match &self.cached {
            Some((_, body)) => Ok(body),
            None => Err(TransportError::new(format!("no message with uid {uid}"))),
        }
    }

    fn store(&mut self, uid: Uid, flags: &[Flag]) -> TransportResult<()> {
        let names: Vec<&str> = flags.iter().map(|f| f.system_name()).collect();
        let query = format!("+FLAGS.SILENT ({})", names.join(" "));
        self.session()?
            .uid_store(uid.to_string(), &query)
            .map_err(|e| TransportError::new(format!("IMAP UID STORE {uid} {query} failed: {e}")))?;
        Ok(())
    }
}

impl<S: Read + Write> MailStream for ImapStream<S> {
    fn probe(&mut self) -> TransportResult<Option<Capabilities>> {
        let caps = self
            .session()?
            .capabilities()
            .map_err(|e| TransportError::new(format!("IMAP CAPABILITY failed: {e}")))?;
        if !caps.has_str("IMAP4rev1") {
            return Ok(None);
        }
        let names = caps.iter().map(|c| match c {
            Capability::Imap4rev1 => "IMAP4rev1".to_string(),
            Capability::Auth(mechanism) => format!("AUTH={mechanism}"),
            Capability::Atom(atom) => atom.to_string(),
        });
        Ok(Some(Capabilities::new(names)))
    }

    fn search(&mut self, criteria: &SearchCriteria) -> TransportResult<Vec<Uid>> {
        Ok(self.search_set(criteria)?.into_iter().map(Uid).collect())
    }

    fn sort(&mut self, sort: SortSpec, criteria: &SearchCriteria) -> TransportResult<Vec<Uid>> {
        let uids = self.search_set(criteria)?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uid_set(&uids);
        let fetches = self
            .session()?
            .uid_fetch(&set, "(UID ENVELOPE INTERNALDATE RFC822.SIZE)")
            .map_err(|e| TransportError::new(format!("IMAP UID FETCH (sort keys) failed: {e}")))?;

        let keys: HashMap<u32, SortKeys> = fetches
            .iter()
            .filter_map(|f| {
                let uid = f.uid?;
                let date = f
                    .envelope()
                    .and_then(|e| e.date.as_ref())
                    .and_then(|d| {
                        let bytes: &[u8] = d.as_ref();
                        assemble::date_timestamp(&String::from_utf8_lossy(bytes))
                    });
                Some((
                    uid,
                    SortKeys {
                        date,
                        arrival: f.internal_date().map(|d| d.timestamp()).unwrap_or_default(),
                        size: f.size.unwrap_or_default(),
                    },
                ))
            })
            .collect();

        Ok(order(uids, &keys, sort).into_iter().map(Uid).collect())
    }

    fn resolve_seq(&mut self, uid: Uid) -> TransportResult<SeqNo> {
        let fetches = self
            .session()?
            .uid_fetch(uid.to_string(), "UID")
            .map_err(|e| TransportError::new(format!("IMAP UID FETCH {uid} failed: {e}")))?;
        fetches
            .iter()
            .find(|f| f.uid == Some(uid.get()))
            .map(|f| SeqNo(f.message))
            .ok_or_else(|| TransportError::new(format!("no message with uid {uid}")))
    }

    fn resolve_uid(&mut self, seq: SeqNo) -> TransportResult<Uid> {
        let fetches = self
            .session()?
            .fetch(seq.to_string(), "UID")
            .map_err(|e| TransportError::new(format!("IMAP FETCH {seq} failed: {e}")))?;
        fetches
            .iter()
            .find_map(|f| f.uid)
            .map(Uid)
            .ok_or_else(|| TransportError::new(format!("no message with sequence number {seq}")))
    }

    fn fetch_header(&mut self, seq: SeqNo) -> TransportResult<Option<HeaderInfo>> {
        let fetches = self
            .session()?
            .fetch(seq.to_string(), "(FLAGS RFC822.SIZE RFC822.HEADER)")
            .map_err(|e| TransportError::new(format!("IMAP FETCH {seq} header failed: {e}")))?;
        let Some(fetch) = fetches.iter().next() else {
            return Ok(None);
        };
        let Some(header) = fetch.header() else {
            return Ok(None);
        };
        let flags: Vec<Flag> = fetch.flags().iter().filter_map(system_flag).collect();
        Ok(header_info(seq, header, &flags, fetch.size.map(u64::from)))
    }

    fn fetch_structure(&mut self, uid: Uid) -> TransportResult<Option<MimeNode>> {
        let fetches = self
            .session()?
            .uid_fetch(uid.to_string(), "BODYSTRUCTURE")
            .map_err(|e| TransportError::new(format!("IMAP UID FETCH {uid} structure failed: {e}")))?;
        Ok(fetches.iter().find_map(|f| f.bodystructure()).map(structure))
    }

    fn fetch_header_text(&mut self, uid: Uid) -> TransportResult<String> {
        let fetches = self
            .session()?
            .uid_fetch(uid.to_string(), "RFC822.HEADER")
            .map_err(|e| TransportError::new(format!("IMAP UID FETCH {uid} header failed: {e}")))?;
        Ok(fetches
            .iter()
            .find_map(|f| f.header())
            .map(|h| String::from_utf8_lossy(h).into_owned())
            .unwrap_or_default())
    }

    fn fetch_body(&mut self, uid: Uid, part: &PartAddress) -> TransportResult<Vec<u8>> {
        let raw = self.raw_message(uid)?;
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| TransportError::new(format!("message {uid} could not be parsed")))?;
        part_body(&message, part)
            .ok_or_else(|| TransportError::new(format!("message {uid} has no part {part}")))
    }

    fn set_flags(&mut self, uid: Uid, flags: &[Flag]) -> TransportResult<()> {
        if flags.is_empty() {
            return Ok(());
        }
        self.store(uid, flags)
    }

    fn delete(&mut self, uid: Uid) -> TransportResult<()> {
        self.store(uid, &[Flag::Deleted])
    }

    fn close(&mut self, expunge: bool) -> TransportResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        self.cached = None;
        if expunge {
            session
                .expunge()
                .map_err(|e| TransportError::new(format!("IMAP EXPUNGE failed: {e}")))?;
        }
        session
            .logout()
            .map_err(|e| TransportError::new(format!("IMAP LOGOUT failed: {e}")))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Search criteria as an IMAP search string; empty criteria match all.
fn criteria_string(criteria: &SearchCriteria) -> String {
    if criteria.is_empty() {
        "ALL".to_string()
    } else {
        criteria.to_string()
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// Per-message sort keys gathered in one fetch.
#[derive(Debug, Clone, Copy, Default)]
struct SortKeys {
    /// Envelope `Date:`, when present and parseable.
    date: Option<i64>,
    /// `INTERNALDATE`.
    arrival: i64,
    size: u32,
}

/// Order uids by `sort`, ties broken by uid.
///
/// `Date` falls back to arrival time for messages without a usable
/// `Date:` header. Keys the emulation cannot see (addresses, subject)
/// sort by arrival.
fn order(mut uids: Vec<u32>, keys: &HashMap<u32, SortKeys>, sort: SortSpec) -> Vec<u32> {
    if !matches!(sort.key, SortKey::Date | SortKey::Arrival | SortKey::Size) {
        tracing::trace!(key = sort.key.keyword(), "sorting by arrival instead");
    }
    uids.sort_by_key(|uid| {
        let k = keys.get(uid).copied().unwrap_or_default();
        let primary = match sort.key {
            SortKey::Date => k.date.unwrap_or(k.arrival),
            SortKey::Size => i64::from(k.size),
            _ => k.arrival,
        };
        (primary, *uid)
    });
    if sort.reverse {
        uids.reverse();
    }
    uids
}

fn system_flag(flag: &::imap::types::Flag<'_>) -> Option<Flag> {
    use ::imap::types::Flag as Imap;
    match flag {
        Imap::Seen => Some(Flag::Seen),
        Imap::Answered => Some(Flag::Answered),
        Imap::Flagged => Some(Flag::Flagged),
        Imap::Deleted => Some(Flag::Deleted),
        Imap::Draft => Some(Flag::Draft),
        Imap::Recent => Some(Flag::Recent),
        _ => None,
    }
}

/// Build a header summary from a raw header block.
fn header_info(seq: SeqNo, header: &[u8], flags: &[Flag], size: Option<u64>) -> Option<HeaderInfo> {
    let message = MessageParser::default().parse(header)?;
    let raw = |name: &str| message.header_raw(name).map(|v| v.trim().to_string());

    Some(HeaderInfo {
        msgno: seq,
        message_id: raw("Message-ID"),
        date: raw("Date"),
        subject: message.subject().map(str::to_string),
        to: addresses(message.to()),
        from: addresses(message.from()),
        reply_to: addresses(message.reply_to()),
        sender: message.sender().map(|a| addresses(Some(a))),
        in_reply_to: raw("In-Reply-To"),
        references: raw("References"),
        size,
        status: StatusChars::from_flags(flags),
    })
}

fn addresses(address: Option<&mail_parser::Address<'_>>) -> Vec<AddressEntry> {
    let Some(address) = address else {
        return Vec::new();
    };
    address
        .iter()
        .map(|a| AddressEntry::parse(a.name(), a.address().unwrap_or_default()))
        .collect()
}

/// Structure tree of a `BODYSTRUCTURE` response.
fn structure(body: &BodyStructure<'_>) -> MimeNode {
    match body {
        BodyStructure::Multipart { common, bodies, .. } => {
            let subtype: &str = common.ty.subtype.as_ref();
            let node = MimeNode::multipart(subtype, bodies.iter().map(structure).collect());
            with_common(node, common)
        }
        BodyStructure::Basic { common, other, .. }
        | BodyStructure::Text { common, other, .. }
        | BodyStructure::Message { common, other, .. } => {
            let primary: &str = common.ty.ty.as_ref();
            let subtype: &str = common.ty.subtype.as_ref();
            let node = MimeNode::leaf(PrimaryType::from_name(primary), subtype)
                .with_encoding(encoding(&other.transfer_encoding))
                .with_bytes(u64::from(other.octets));
            with_common(node, common)
        }
    }
}

/// Content-type parameters and disposition shared by every body kind.
fn with_common(mut node: MimeNode, common: &BodyContentCommon<'_>) -> MimeNode {
    for (attribute, value) in common.ty.params.iter().flatten() {
        let attribute: &str = attribute.as_ref();
        let value: &str = value.as_ref();
        if TYPE_PARAMS.iter().any(|p| p.eq_ignore_ascii_case(attribute)) {
            node = node.with_param(&attribute.to_ascii_lowercase(), value);
        }
    }
    if let Some(disposition) = &common.disposition {
        let kind: &str = disposition.ty.as_ref();
        node = node.with_disposition(kind);
        for (attribute, value) in disposition.params.iter().flatten() {
            let attribute: &str = attribute.as_ref();
            let value: &str = value.as_ref();
            if attribute.eq_ignore_ascii_case("filename") {
                node = node.with_dparam("filename", value);
            }
        }
    }
    node
}

fn encoding(value: &ContentEncoding<'_>) -> TransferEncoding {
    match value {
        ContentEncoding::SevenBit => TransferEncoding::SevenBit,
        ContentEncoding::EightBit => TransferEncoding::EightBit,
        ContentEncoding::Binary => TransferEncoding::Binary,
        ContentEncoding::Base64 => TransferEncoding::Base64,
        ContentEncoding::QuotedPrintable => TransferEncoding::QuotedPrintable,
        ContentEncoding::Other(other) => {
            let other: &str = other.as_ref();
            TransferEncoding::from_header(other)
        }
    }
}

/// Still-encoded body bytes of the part at `address`.
fn part_body(message: &Message<'_>, address: &PartAddress) -> Option<Vec<u8>> {
    let root = message.root_part();
    let mut current = root;
    let single = !matches!(root.body, PartType::Multipart(_));

    if !(single && address.segments() == [1]) {
        for &segment in address.segments() {
            let PartType::Multipart(ids) = &current.body else {
                return None;
            };
            let index = (segment as usize).checked_sub(1)?;
            let id = *ids.get(index)?;
            current = message.parts.get(id as usize)?;
        }
    }

    let raw = message.raw_message();
    let start = current.raw_body_offset() as usize;
    let end = (current.raw_end_offset() as usize).min(raw.len());
    raw.get(start..end).map(<[u8]>::to_vec)
}
