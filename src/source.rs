//! The query-facing mailbox data source.
//!
//! [`MailSource::read`] runs the whole pipeline: translate conditions,
//! ensure a session, search and sort on the server when no ids are pinned,
//! paginate, then shape the result as ids, a count or assembled records.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assemble::RecordAssembler;
use crate::config::MailboxConfig;
use crate::connection::ConnectionManager;
use crate::error::{MailError, MailResult};
use crate::ids::Uid;
use crate::query::{Conditions, QueryTranslator, Translation};
use crate::record::{CountRecord, FetchedMail, FieldSpec, SCHEMA};
use crate::report::{self, Arg, Reporter};
use crate::transport::MailTransport;

// ── FindType ────────────────────────────────────────────────────────────

/// Result shape requested by a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindType {
    /// Unique ids only.
    List,
    /// Number of matching ids.
    Count,
    /// Full records.
    #[default]
    All,
    /// The first full record.
    First,
}

impl FindType {
    pub fn as_str(self) -> &'static str {
        match self {
            FindType::List => "list",
            FindType::Count => "count",
            FindType::All => "all",
            FindType::First => "first",
        }
    }
}

impl fmt::Display for FindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindType {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(FindType::List),
            "count" => Ok(FindType::Count),
            "all" => Ok(FindType::All),
            "first" => Ok(FindType::First),
            _ => Err(MailError::UnknownQueryShape {
                message: report::format("Unknown find type %s", &[Arg::from(s)]),
            }),
        }
    }
}

// ── Query ───────────────────────────────────────────────────────────────

/// A generic query: conditions, pagination, result shape and depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub conditions: Conditions,
    /// Offset into the id list.
    pub start: usize,
    /// Exclusive end offset; only used together with a non-zero `start`.
    pub end: usize,
    pub limit: usize,
    pub find: FindType,
    /// Values above zero include attachments in full records.
    pub recursive: i32,
}

impl Query {
    pub fn new(find: FindType) -> Self {
        Self {
            find,
            ..Self::default()
        }
    }

    /// Set the result shape by name.
    pub fn find_named(mut self, name: &str) -> MailResult<Self> {
        self.find = name.parse().map_err(|_| MailError::UnknownQueryShape {
            message: report::format(
                "Unknown find type %s for query %s",
                &[Arg::from(name), self.to_arg()],
            ),
        })?;
        Ok(self)
    }

    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn end(mut self, end: usize) -> Self {
        self.end = end;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn recursive(mut self, recursive: i32) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn wants_attachments(&self) -> bool {
        self.recursive > 0
    }

    /// Render for failure messages.
    pub fn to_arg(&self) -> Arg {
        Arg::list([
            ("conditions", self.conditions.to_arg()),
            ("start", Arg::from(self.start)),
            ("end", Arg::from(self.end)),
            ("limit", Arg::from(self.limit)),
            ("find", Arg::from(self.find.as_str())),
            ("recursive", Arg::Int(i64::from(self.recursive))),
        ])
    }
}

/// Trim an ordered id list to the requested page.
///
/// `start` and `end` together select `[start, end)`; otherwise `limit`
/// takes that many ids from `start`; otherwise a `first` query keeps one.
pub fn paginate(uids: Vec<Uid>, query: &Query) -> Vec<Uid> {
    if query.start > 0 && query.end > 0 {
        let length = signed(query.end).saturating_sub(signed(query.start));
        slice(uids, query.start, length)
    } else if query.limit > 0 {
        slice(uids, query.start, signed(query.limit))
    } else if query.find == FindType::First {
        slice(uids, 0, 1)
    } else {
        uids
    }
}

/// Saturating `usize` to `i64`.
fn signed(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// `length` ids from `offset`; a negative length stops that many short of
/// the end.
fn slice(uids: Vec<Uid>, offset: usize, length: i64) -> Vec<Uid> {
    let len = uids.len();
    let from = offset.min(len);
    let magnitude = usize::try_from(length.unsigned_abs()).unwrap_or(usize::MAX);
    let to = if length >= 0 {
        from.saturating_add(magnitude).min(len)
    } else {
        len.saturating_sub(magnitude).max(from)
    };
    uids.into_iter().skip(from).take(to - from).collect()
}

// ── Outcomes ────────────────────────────────────────────────────────────

/// Shaped result of a read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Ids(Vec<Uid>),
    Count(CountRecord),
    Mails(Vec<FetchedMail>),
}

impl QueryResult {
    fn empty(find: FindType) -> Self {
        match find {
            FindType::List => QueryResult::Ids(Vec::new()),
            FindType::Count => QueryResult::Count(CountRecord::default()),
            FindType::All | FindType::First => QueryResult::Mails(Vec::new()),
        }
    }

    /// Number of ids, records, or the count itself.
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Ids(ids) => ids.len(),
            QueryResult::Count(record) => record.count(),
            QueryResult::Mails(mails) => mails.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A read result plus the recoverable failures collected on the way.
#[derive(Debug)]
pub struct ReadOutcome {
    pub result: QueryResult,
    pub failures: Vec<MailError>,
}

impl ReadOutcome {
    /// Unique ids of the result, for id and record shapes.
    pub fn uids(&self) -> Vec<Uid> {
        match &self.result {
            QueryResult::Ids(ids) => ids.clone(),
            QueryResult::Mails(mails) => mails.iter().map(|m| m.message.id).collect(),
            QueryResult::Count(_) => Vec::new(),
        }
    }
}

/// Outcome of a delete: `success` is false when nothing matched or any
/// message could not be flagged.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub success: bool,
    pub failures: Vec<MailError>,
}

// ── MailSource ──────────────────────────────────────────────────────────

/// Query-based access to one mailbox.
pub struct MailSource<T: MailTransport> {
    config: Arc<MailboxConfig>,
    connection: ConnectionManager<T>,
    translator: QueryTranslator,
}

impl<T: MailTransport> MailSource<T> {
    pub fn new(config: MailboxConfig, transport: T) -> Self {
        let config = Arc::new(config);
        Self {
            connection: ConnectionManager::new(Arc::clone(&config), transport),
            config,
            translator: QueryTranslator::default(),
        }
    }

    /// Use a different model alias and primary key for condition lookup.
    pub fn with_translator(mut self, translator: QueryTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    /// Ensure a live session.
    pub fn connect(&mut self) -> MailResult<()> {
        self.connection.connect()
    }

    /// Run a query.
    pub fn read(&mut self, query: &Query) -> MailResult<ReadOutcome> {
        let mut reporter = Reporter::new(self.config.error_handler);
        self.connection.connect()?;

        let uids = match self.translator.translate(&query.conditions) {
            Translation::Ids(ids) => ids,
            Translation::Search { criteria, sort } => {
                let stream = self.connection.stream()?;
                let found = if query.find == FindType::Count {
                    stream.search(&criteria)
                } else {
                    stream.sort(sort, &criteria)
                };
                found.map_err(|e| reporter.fatal(e.into()))?
            }
        };
        tracing::debug!(find = %query.find, found = uids.len(), "query matched");

        if uids.is_empty() {
            return Ok(ReadOutcome {
                result: QueryResult::empty(query.find),
                failures: reporter.take_failures(),
            });
        }

        let uids = paginate(uids, query);
        let result = match query.find {
            FindType::List => QueryResult::Ids(uids),
            FindType::Count => QueryResult::Count(CountRecord::new(uids.len())),
            FindType::All | FindType::First => {
                QueryResult::Mails(self.assemble_all(&uids, query.wants_attachments(), &mut reporter)?)
            }
        };

        Ok(ReadOutcome {
            result,
            failures: reporter.take_failures(),
        })
    }

    /// Assemble each uid in order, skipping messages with per-message failures.
    fn assemble_all(
        &mut self,
        uids: &[Uid],
        include_attachments: bool,
        reporter: &mut Reporter,
    ) -> MailResult<Vec<FetchedMail>> {
        let assembler = RecordAssembler::new(&self.config);
        let stream = self.connection.stream()?;
        let mut mails = Vec::with_capacity(uids.len());

        for &uid in uids {
            match assembler.assemble(stream, uid, include_attachments, reporter) {
                Ok(mail) => mails.push(mail),
                Err(e) if e.is_per_message() => reporter.report(e)?,
                Err(e) => return Err(e),
            }
        }
        Ok(mails)
    }

    /// Flag every message matching `conditions` as deleted.
    ///
    /// Messages are removed when the session closes.
    pub fn delete(&mut self, conditions: &Conditions) -> MailResult<DeleteOutcome> {
        let mut reporter = Reporter::new(self.config.error_handler);

        let uids = match self.translator.translate(conditions) {
            Translation::Ids(ids) => {
                self.connection.connect()?;
                ids
            }
            Translation::Search { .. } => {
                let listed = self.read(&Query::new(FindType::List).conditions(conditions.clone()))?;
                listed.uids()
            }
        };

        if uids.is_empty() {
            tracing::debug!("nothing to delete");
            return Ok(DeleteOutcome {
                success: false,
                failures: reporter.take_failures(),
            });
        }

        let stream = self.connection.stream()?;
        let mut success = true;
        for uid in uids {
            if let Err(e) = stream.delete(uid) {
                tracing::debug!(uid = %uid, error = %e, "delete refused");
                success = false;
                reporter.report(MailError::Delete {
                    message: report::format(
                        "Unable to delete email with uid: %s",
                        &[Arg::from(uid)],
                    ),
                })?;
            }
        }

        Ok(DeleteOutcome {
            success,
            failures: reporter.take_failures(),
        })
    }

    /// The fixed record schema.
    pub fn describe(&self) -> &'static [FieldSpec] {
        SCHEMA
    }

    /// Expunge and close the session now instead of on drop.
    pub fn close(&mut self) -> MailResult<()> {
        self.connection.close()
    }
}

impl<T: MailTransport> fmt::Debug for MailSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSource")
            .field("connection", &self.connection)
            .field("alias", &self.translator.alias())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::Flag;
    use crate::report::ErrorMode;
    use crate::transport::{MockMessage, MockTransport};

    fn ids(list: &[u32]) -> Vec<Uid> {
        list.iter().copied().map(Uid).collect()
    }

    fn mailbox(uids: &[u32]) -> MockTransport {
        let mock = MockTransport::new();
        for &uid in uids {
            mock.add(MockMessage::new(uid).flags(&[Flag::Seen]));
        }
        mock
    }

    #[test]
    fn find_type_parsing() {
        assert_eq!("count".parse::<FindType>().unwrap(), FindType::Count);
        assert_eq!("First".parse::<FindType>().unwrap(), FindType::First);
        let err = "neighbors".parse::<FindType>().unwrap_err();
        assert!(matches!(err, MailError::UnknownQueryShape { .. }));
    }

    #[test]
    fn find_named_reports_query() {
        let err = Query::default().limit(5).find_named("threaded").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Unknown find type 'threaded' for query conditions: [], start: 0"));
        assert!(text.contains("limit: 5"));
    }

    #[test]
    fn paginate_start_end() {
        let q = Query::new(FindType::All).start(1).end(3);
        assert_eq!(paginate(ids(&[9, 8, 7, 6]), &q), ids(&[8, 7]));
    }

    #[test]
    fn paginate_limit_from_start() {
        let q = Query::new(FindType::All).limit(2);
        assert_eq!(paginate(ids(&[5, 3, 1]), &q), ids(&[5, 3]));
        let q = Query::new(FindType::All).start(2).limit(5);
        assert_eq!(paginate(ids(&[5, 3, 1]), &q), ids(&[1]));
    }

    #[test]
    fn paginate_first_and_passthrough() {
        let q = Query::new(FindType::First);
        assert_eq!(paginate(ids(&[5, 3, 1]), &q), ids(&[5]));
        let q = Query::new(FindType::List);
        assert_eq!(paginate(ids(&[5, 3, 1]), &q), ids(&[5, 3, 1]));
    }

    #[test]
    fn paginate_negative_window_and_overflow() {
        let q = Query::new(FindType::All).start(3).end(1);
        assert_eq!(paginate(ids(&[1, 2, 3, 4, 5, 6]), &q), ids(&[4]));
        let q = Query::new(FindType::All).start(10).end(12);
        assert!(paginate(ids(&[1, 2]), &q).is_empty());
    }

    #[test]
    fn paginate_huge_bounds_keep_every_id() {
        let q = Query::new(FindType::All).limit(usize::MAX);
        assert_eq!(paginate(ids(&[5, 3, 1]), &q), ids(&[5, 3, 1]));
        let q = Query::new(FindType::All).start(1).end(usize::MAX);
        assert_eq!(paginate(ids(&[5, 3, 1]), &q), ids(&[3, 1]));
        let q = Query::new(FindType::All).start(usize::MAX).end(1);
        assert!(paginate(ids(&[5, 3, 1]), &q).is_empty());
    }

    #[test]
    fn list_and_count_shapes() {
        let mut source = MailSource::new(MailboxConfig::default(), mailbox(&[1, 3, 5]));
        let out = source.read(&Query::new(FindType::List)).unwrap();
        assert_eq!(out.result, QueryResult::Ids(ids(&[5, 3, 1])));

        let out = source.read(&Query::new(FindType::Count).limit(2)).unwrap();
        assert_eq!(out.result, QueryResult::Count(CountRecord::new(2)));
        assert_eq!(out.result.len(), 2);
        assert_eq!(
            serde_json::to_string(&out.result).unwrap(),
            r#"{"Mail":{"count":2}}"#
        );
    }

    #[test]
    fn pinned_ids_skip_the_search() {
        let mock = mailbox(&[1, 2, 3]);
        let mut source = MailSource::new(MailboxConfig::default(), mock.clone());
        let query = Query::new(FindType::List)
            .conditions(Conditions::new().with("Mail.id", vec![3u32, 1]));
        let out = source.read(&query).unwrap();
        assert_eq!(out.result, QueryResult::Ids(ids(&[3, 1])));
        assert!(mock.searches().is_empty());
    }

    #[test]
    fn per_message_failure_raises_in_raise_mode() {
        let mock = mailbox(&[1, 2]);
        mock.break_identity(2);
        let config = MailboxConfig {
            error_handler: ErrorMode::Raise,
            ..MailboxConfig::default()
        };
        let mut source = MailSource::new(config, mock);
        let err = source.read(&Query::new(FindType::All)).unwrap_err();
        assert!(matches!(err, MailError::IdentityMismatch { .. }));
    }

    #[test]
    fn delete_pinned_ids() {
        let mock = mailbox(&[1, 2, 3]);
        let mut source = MailSource::new(MailboxConfig::default(), mock.clone());
        let out = source
            .delete(&Conditions::new().with("id", vec![1u32, 3]))
            .unwrap();
        assert!(out.success);
        assert!(out.failures.is_empty());
        assert!(mock.flags_of(1).unwrap().contains(&Flag::Deleted));
        assert!(!mock.flags_of(2).unwrap().contains(&Flag::Deleted));
        source.close().unwrap();
        assert_eq!(mock.uids(), ids(&[2]));
    }

    #[test]
    fn delete_by_search_and_nothing_found() {
        let mock = mailbox(&[1, 2]);
        mock.add(MockMessage::new(3));
        let mut source = MailSource::new(MailboxConfig::default(), mock.clone());

        let out = source.delete(&Conditions::new().with("seen", false)).unwrap();
        assert!(out.success);
        assert!(mock.flags_of(3).unwrap().contains(&Flag::Deleted));

        let out = source.delete(&Conditions::new().with("from", "nobody@x")).unwrap();
        assert!(!out.success);
        assert!(out.failures.is_empty());
    }

    #[test]
    fn delete_failures_are_aggregated() {
        let mock = mailbox(&[1, 2]);
        mock.fail_delete(2);
        let mut source = MailSource::new(MailboxConfig::default(), mock.clone());
        let out = source
            .delete(&Conditions::new().with("id", vec![1u32, 2]))
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(
            out.failures[0].to_string(),
            "delete failed: Unable to delete email with uid: 2"
        );
        assert!(mock.flags_of(1).unwrap().contains(&Flag::Deleted));
    }

    #[test]
    fn describe_lists_schema() {
        let source = MailSource::new(MailboxConfig::default(), MockTransport::new());
        let names: Vec<_> = source.describe().iter().map(|f| f.name).collect();
        assert_eq!(names.first(), Some(&"id"));
        assert!(names.contains(&"thread_count"));
        assert!(names.contains(&"created"));
    }
}
