//! In-memory mail server for tests and embedding.
//!
//! The mailbox is shared through `Arc<Mutex<_>>`, so a test can keep a
//! clone of the [`MockTransport`] it hands to a source and inspect flags,
//! opens and closes afterwards. Failures can be scripted per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::DateTime;

use crate::assemble;
use crate::config::ConnectionTarget;
use crate::flag::Flag;
use crate::ids::{SeqNo, Uid};
use crate::mime::{MimeNode, PartAddress, PrimaryType};
use crate::query::{SearchCriteria, SearchToken, SortSpec};

use super::{
    AddressEntry, Capabilities, HeaderInfo, MailStream, MailTransport, StatusChars, TransportError,
    TransportResult,
};

/// Base timestamp of generated `Date:` headers; each uid adds a minute.
const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// What a mock session advertises.
const MOCK_CAPABILITIES: [&str; 3] = ["IMAP4rev1", "SORT", "THREAD=REFERENCES"];

// ── MockMessage ─────────────────────────────────────────────────────────

/// A message stored in the mock mailbox, built fluently.
#[derive(Debug, Clone)]
pub struct MockMessage {
    uid: Uid,
    header: HeaderInfo,
    flags: Vec<Flag>,
    structure: Option<MimeNode>,
    header_text: String,
    bodies: BTreeMap<String, Vec<u8>>,
}

impl MockMessage {
    /// A plain-text message whose date grows with its uid.
    pub fn new(uid: u32) -> Self {
        let date = DateTime::from_timestamp(BASE_TIMESTAMP + i64::from(uid) * 60, 0)
            .map(|d| d.to_rfc2822());
        Self {
            uid: Uid(uid),
            header: HeaderInfo {
                message_id: Some(format!("<{uid}@mock.invalid>")),
                date,
                ..HeaderInfo::default()
            },
            flags: Vec::new(),
            structure: Some(MimeNode::leaf(PrimaryType::Text, "PLAIN")),
            header_text: String::new(),
            bodies: BTreeMap::new(),
        }
    }

    pub fn from(mut self, personal: Option<&str>, address: &str) -> Self {
        self.header.from.push(AddressEntry::parse(personal, address));
        self
    }

    pub fn to(mut self, personal: Option<&str>, address: &str) -> Self {
        self.header.to.push(AddressEntry::parse(personal, address));
        self
    }

    pub fn reply_to(mut self, personal: Option<&str>, address: &str) -> Self {
        self.header
            .reply_to
            .push(AddressEntry::parse(personal, address));
        self
    }

    pub fn sender(mut self, personal: Option<&str>, address: &str) -> Self {
        self.header
            .sender
            .get_or_insert_with(Vec::new)
            .push(AddressEntry::parse(personal, address));
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.header.subject = Some(subject.to_string());
        self
    }

    pub fn message_id(mut self, message_id: &str) -> Self {
        self.header.message_id = Some(message_id.to_string());
        self
    }

    pub fn in_reply_to(mut self, value: &str) -> Self {
        self.header.in_reply_to = Some(value.to_string());
        self
    }

    pub fn references(mut self, value: &str) -> Self {
        self.header.references = Some(value.to_string());
        self
    }

    pub fn date(mut self, date: &str) -> Self {
        self.header.date = Some(date.to_string());
        self
    }

    /// Drop the `Date:` header.
    pub fn without_date(mut self) -> Self {
        self.header.date = None;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.header.size = Some(size);
        self
    }

    pub fn flags(mut self, flags: &[Flag]) -> Self {
        self.flags = flags.to_vec();
        self
    }

    pub fn structure(mut self, structure: MimeNode) -> Self {
        self.structure = Some(structure);
        self
    }

    /// Make the structure fetch come back empty.
    pub fn without_structure(mut self) -> Self {
        self.structure = None;
        self
    }

    pub fn header_text(mut self, text: &str) -> Self {
        self.header_text = text.to_string();
        self
    }

    /// Raw body of the part at the dotted `section` (e.g. `"1.2"`).
    pub fn body(mut self, section: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(section.to_string(), body.into());
        self
    }

    fn has(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    fn timestamp(&self) -> i64 {
        self.header
            .date
            .as_deref()
            .and_then(assemble::date_timestamp)
            .unwrap_or_default()
    }

    fn matches(&self, criteria: &SearchCriteria) -> bool {
        criteria.tokens().iter().all(|token| match token {
            SearchToken::Flag { flag, set } => self.has(*flag) == *set,
            SearchToken::From(needle) => {
                let needle = needle.to_lowercase();
                self.header.from.iter().any(|a| {
                    let address = format!(
                        "{} <{}@{}>",
                        a.personal.as_deref().unwrap_or_default(),
                        a.mailbox.as_deref().unwrap_or_default(),
                        a.host.as_deref().unwrap_or_default(),
                    );
                    address.to_lowercase().contains(&needle)
                })
            }
        })
    }
}

// ── MockTransport ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MockMailbox {
    messages: Vec<MockMessage>,
    fail_opens: u32,
    fail_probes: u32,
    broken_identity: BTreeSet<Uid>,
    fail_flag_updates: bool,
    failing_deletes: BTreeSet<Uid>,
    opens: u32,
    closes: Vec<bool>,
    searches: Vec<String>,
    last_error: Option<String>,
}

impl MockMailbox {
    fn position(&self, uid: Uid) -> TransportResult<usize> {
        self.messages
            .iter()
            .position(|m| m.uid == uid)
            .ok_or_else(|| TransportError::new(format!("no message with uid {uid}")))
    }

    fn message(&self, uid: Uid) -> TransportResult<&MockMessage> {
        let index = self.position(uid)?;
        Ok(&self.messages[index])
    }

    fn fail(&mut self, message: &str) -> TransportError {
        self.last_error = Some(message.to_string());
        TransportError::new(message)
    }
}

/// Shared in-memory mailbox implementing [`MailTransport`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockMailbox>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockMailbox> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message; its sequence number is its position.
    pub fn add(&self, message: MockMessage) {
        self.lock().messages.push(message);
    }

    /// A stream on the mailbox without going through `open`.
    pub fn stream(&self) -> Box<dyn MailStream> {
        Box::new(MockStream {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Make the next `n` opens fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    /// Make the next `n` health probes report an unusable session.
    pub fn fail_next_probes(&self, n: u32) {
        self.lock().fail_probes = n;
    }

    /// Make the uid of `uid`'s sequence number resolve to a different uid.
    pub fn break_identity(&self, uid: u32) {
        self.lock().broken_identity.insert(Uid(uid));
    }

    /// Make every flag update fail.
    pub fn fail_flag_updates(&self) {
        self.lock().fail_flag_updates = true;
    }

    /// Make deleting `uid` fail.
    pub fn fail_delete(&self, uid: u32) {
        self.lock().failing_deletes.insert(Uid(uid));
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.lock().messages.iter().map(|m| m.uid).collect()
    }

    pub fn flags_of(&self, uid: u32) -> Option<Vec<Flag>> {
        let mailbox = self.lock();
        mailbox.message(Uid(uid)).ok().map(|m| m.flags.clone())
    }

    /// Number of `open` calls, successful or not.
    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    /// The `expunge` argument of every close, in order.
    pub fn closes(&self) -> Vec<bool> {
        self.lock().closes.clone()
    }

    /// Every search or sort criteria received, rendered.
    pub fn searches(&self) -> Vec<String> {
        self.lock().searches.clone()
    }
}

impl MailTransport for MockTransport {
    fn open(
        &mut self,
        target: &ConnectionTarget,
        username: &str,
        _password: &str,
    ) -> TransportResult<Box<dyn MailStream>> {
        let mut mailbox = self.lock();
        mailbox.opens += 1;
        if mailbox.fail_opens > 0 {
            mailbox.fail_opens -= 1;
            return Err(mailbox.fail(&format!("connection to {target} refused")));
        }
        tracing::trace!(mailbox = %target, username, "mock session opened");
        drop(mailbox);
        Ok(self.stream())
    }

    fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }
}

// ── MockStream ──────────────────────────────────────────────────────────

struct MockStream {
    inner: Arc<Mutex<MockMailbox>>,
}

impl MockStream {
    fn lock(&self) -> MutexGuard<'_, MockMailbox> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn matching(&self, criteria: &SearchCriteria) -> Vec<MockMessage> {
        let mut mailbox = self.lock();
        mailbox.searches.push(criteria.to_string());
        mailbox
            .messages
            .iter()
            .filter(|m| m.matches(criteria))
            .cloned()
            .collect()
    }
}

impl MailStream for MockStream {
    fn probe(&mut self) -> TransportResult<Option<Capabilities>> {
        let mut mailbox = self.lock();
        if mailbox.fail_probes > 0 {
            mailbox.fail_probes -= 1;
            mailbox.last_error = Some("thread probe returned nothing".to_string());
            return Ok(None);
        }
        Ok(Some(Capabilities::new(MOCK_CAPABILITIES)))
    }

    fn search(&mut self, criteria: &SearchCriteria) -> TransportResult<Vec<Uid>> {
        Ok(self.matching(criteria).iter().map(|m| m.uid).collect())
    }

    fn sort(&mut self, sort: SortSpec, criteria: &SearchCriteria) -> TransportResult<Vec<Uid>> {
        let mut found = self.matching(criteria);
        found.sort_by_key(|m| (m.timestamp(), m.uid));
        if sort.reverse {
            found.reverse();
        }
        Ok(found.iter().map(|m| m.uid).collect())
    }

    fn resolve_seq(&mut self, uid: Uid) -> TransportResult<SeqNo> {
        let index = self.lock().position(uid)?;
        Ok(SeqNo(index as u32 + 1))
    }

    fn resolve_uid(&mut self, seq: SeqNo) -> TransportResult<Uid> {
        let mailbox = self.lock();
        let message = (seq.get() as usize)
            .checked_sub(1)
            .and_then(|i| mailbox.messages.get(i))
            .ok_or_else(|| TransportError::new(format!("no message with sequence number {seq}")))?;
        if mailbox.broken_identity.contains(&message.uid) {
            return Ok(Uid(message.uid.get() + 1));
        }
        Ok(message.uid)
    }

    fn fetch_header(&mut self, seq: SeqNo) -> TransportResult<Option<HeaderInfo>> {
        let mailbox = self.lock();
        let Some(message) = (seq.get() as usize)
            .checked_sub(1)
            .and_then(|i| mailbox.messages.get(i))
        else {
            return Ok(None);
        };
        Ok(Some(HeaderInfo {
            msgno: seq,
            status: StatusChars::from_flags(&message.flags),
            ..message.header.clone()
        }))
    }

    fn fetch_structure(&mut self, uid: Uid) -> TransportResult<Option<MimeNode>> {
        Ok(self.lock().message(uid)?.structure.clone())
    }

    fn fetch_header_text(&mut self, uid: Uid) -> TransportResult<String> {
        Ok(self.lock().message(uid)?.header_text.clone())
    }

    fn fetch_body(&mut self, uid: Uid, part: &PartAddress) -> TransportResult<Vec<u8>> {
        let mailbox = self.lock();
        let message = mailbox.message(uid)?;
        Ok(message
            .bodies
            .get(&part.section())
            .cloned()
            .unwrap_or_default())
    }

    fn set_flags(&mut self, uid: Uid, flags: &[Flag]) -> TransportResult<()> {
        let mut mailbox = self.lock();
        if mailbox.fail_flag_updates {
            return Err(mailbox.fail("flag store refused: mailbox is read-only"));
        }
        let index = mailbox.position(uid)?;
        let message = &mut mailbox.messages[index];
        for flag in flags {
            if !message.flags.contains(flag) {
                message.flags.push(*flag);
            }
        }
        Ok(())
    }

    fn delete(&mut self, uid: Uid) -> TransportResult<()> {
        let mut mailbox = self.lock();
        if mailbox.failing_deletes.contains(&uid) {
            return Err(mailbox.fail(&format!("cannot delete message {uid}")));
        }
        let index = mailbox.position(uid)?;
        let message = &mut mailbox.messages[index];
        if !message.flags.contains(&Flag::Deleted) {
            message.flags.push(Flag::Deleted);
        }
        Ok(())
    }

    fn close(&mut self, expunge: bool) -> TransportResult<()> {
        let mut mailbox = self.lock();
        mailbox.closes.push(expunge);
        if expunge {
            mailbox.messages.retain(|m| !m.has(Flag::Deleted));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailboxConfig;
    use crate::query::SortKey;

    fn seen() -> SearchCriteria {
        SearchCriteria::new(vec![SearchToken::Flag {
            flag: Flag::Seen,
            set: true,
        }])
    }

    #[test]
    fn open_failures_are_scripted() {
        let mut mock = MockTransport::new();
        mock.fail_next_opens(1);
        let target = MailboxConfig::default().target();
        assert!(mock.open(&target, "u", "p").is_err());
        assert!(mock.last_error().unwrap().contains("refused"));
        assert!(mock.open(&target, "u", "p").is_ok());
        assert_eq!(mock.opens(), 2);
    }

    #[test]
    fn sort_orders_by_date() {
        let mock = MockTransport::new();
        for uid in [1, 3, 5] {
            mock.add(MockMessage::new(uid).flags(&[Flag::Seen]));
        }
        mock.add(MockMessage::new(4));
        let mut stream = mock.stream();

        let newest_first = SortSpec::default();
        assert_eq!(
            stream.sort(newest_first, &seen()).unwrap(),
            vec![Uid(5), Uid(3), Uid(1)]
        );
        let oldest_first = SortSpec {
            key: SortKey::Date,
            reverse: false,
        };
        assert_eq!(
            stream.sort(oldest_first, &seen()).unwrap(),
            vec![Uid(1), Uid(3), Uid(5)]
        );
        assert_eq!(mock.searches(), vec!["SEEN", "SEEN"]);
    }

    #[test]
    fn probe_advertises_capabilities() {
        let mock = MockTransport::new();
        mock.fail_next_probes(1);
        let mut stream = mock.stream();
        assert_eq!(stream.probe().unwrap(), None);
        let caps = stream.probe().unwrap().unwrap();
        assert!(caps.has("imap4rev1"));
        assert!(!caps.has("QRESYNC"));
    }

    #[test]
    fn from_search_is_case_insensitive_substring() {
        let mock = MockTransport::new();
        mock.add(MockMessage::new(1).from(Some("Ann"), "ann@example.com"));
        mock.add(MockMessage::new(2).from(None, "bob@example.com"));
        let mut stream = mock.stream();
        let criteria = SearchCriteria::new(vec![SearchToken::From("ANN@".into())]);
        assert_eq!(stream.search(&criteria).unwrap(), vec![Uid(1)]);
    }

    #[test]
    fn identity_round_trip_and_breakage() {
        let mock = MockTransport::new();
        mock.add(MockMessage::new(10));
        mock.add(MockMessage::new(20));
        mock.break_identity(20);
        let mut stream = mock.stream();

        let seq = stream.resolve_seq(Uid(10)).unwrap();
        assert_eq!(seq, SeqNo(1));
        assert_eq!(stream.resolve_uid(seq).unwrap(), Uid(10));

        let seq = stream.resolve_seq(Uid(20)).unwrap();
        assert_ne!(stream.resolve_uid(seq).unwrap(), Uid(20));
        assert!(stream.resolve_seq(Uid(99)).is_err());
    }

    #[test]
    fn expunge_removes_deleted_messages() {
        let mock = MockTransport::new();
        mock.add(MockMessage::new(1));
        mock.add(MockMessage::new(2));
        let mut stream = mock.stream();
        stream.delete(Uid(1)).unwrap();
        assert_eq!(mock.flags_of(1), Some(vec![Flag::Deleted]));
        stream.close(true).unwrap();
        assert_eq!(mock.uids(), vec![Uid(2)]);
        assert_eq!(mock.closes(), vec![true]);
    }

    #[test]
    fn header_status_reflects_flags() {
        let mock = MockTransport::new();
        mock.add(MockMessage::new(1).flags(&[Flag::Flagged]));
        let mut stream = mock.stream();
        let header = stream.fetch_header(SeqNo(1)).unwrap().unwrap();
        assert_eq!(header.msgno, SeqNo(1));
        assert_eq!(header.status.unseen, 'U');
        assert_eq!(header.status.flagged, 'F');
        assert!(stream.fetch_header(SeqNo(2)).unwrap().is_none());
    }
}
