//! Translation of generic query conditions into mailbox search terms.
//!
//! A condition set either pins the primary key, in which case the ids are
//! used as-is and no search is issued, or it is compiled into an
//! implicitly AND-ed sequence of search tokens plus a sort directive.
//!
//! Supported conditions:
//! - `recent`, `seen`, `flagged`, `answered`, `draft`, `deleted`: boolean
//!   flag tests. There is no `UNRECENT`, so `recent = false` is dropped.
//! - `from`: substring match on the `From:` header.
//!
//! Anything else is ignored. OR is not supported, and results are always
//! sorted by date, newest first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flag::Flag;
use crate::ids::Uid;
use crate::report::Arg;

// ── ConditionValue ──────────────────────────────────────────────────────

/// The value side of a query condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Null,
    Bool(bool),
    Int(i64),
    Ids(Vec<u32>),
    Text(String),
}

impl ConditionValue {
    /// Loose truthiness: `false`, `0`, `""`, `"0"`, `[]` and null are false.
    pub fn truthy(&self) -> bool {
        match self {
            ConditionValue::Null => false,
            ConditionValue::Bool(b) => *b,
            ConditionValue::Int(n) => *n != 0,
            ConditionValue::Ids(ids) => !ids.is_empty(),
            ConditionValue::Text(s) => !s.is_empty() && s != "0",
        }
    }

    /// Interpret the value as one or more unique ids, if it is numeric.
    pub fn as_ids(&self) -> Option<Vec<Uid>> {
        match self {
            ConditionValue::Int(n) => u32::try_from(*n).ok().map(|id| vec![Uid(id)]),
            ConditionValue::Ids(ids) => Some(ids.iter().copied().map(Uid).collect()),
            ConditionValue::Text(s) => s.trim().parse::<u32>().ok().map(|id| vec![Uid(id)]),
            ConditionValue::Null | ConditionValue::Bool(_) => None,
        }
    }

    /// Render the value as text (for string predicates).
    pub fn as_text(&self) -> String {
        match self {
            ConditionValue::Null => String::new(),
            ConditionValue::Bool(b) => if *b { "1" } else { "" }.to_string(),
            ConditionValue::Int(n) => n.to_string(),
            ConditionValue::Ids(ids) => ids
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(","),
            ConditionValue::Text(s) => s.clone(),
        }
    }

    fn to_arg(&self) -> Arg {
        match self {
            ConditionValue::Null => Arg::Str(String::new()),
            ConditionValue::Bool(b) => Arg::Bool(*b),
            ConditionValue::Int(n) => Arg::Int(*n),
            ConditionValue::Ids(ids) => Arg::list(
                ids.iter()
                    .enumerate()
                    .map(|(i, id)| (i.to_string(), Arg::from(*id))),
            ),
            ConditionValue::Text(s) => Arg::Str(s.clone()),
        }
    }
}

impl From<bool> for ConditionValue {
    fn from(v: bool) -> Self {
        ConditionValue::Bool(v)
    }
}

impl From<i64> for ConditionValue {
    fn from(v: i64) -> Self {
        ConditionValue::Int(v)
    }
}

impl From<u32> for ConditionValue {
    fn from(v: u32) -> Self {
        ConditionValue::Int(i64::from(v))
    }
}

impl From<Vec<u32>> for ConditionValue {
    fn from(v: Vec<u32>) -> Self {
        ConditionValue::Ids(v)
    }
}

impl From<&str> for ConditionValue {
    fn from(v: &str) -> Self {
        ConditionValue::Text(v.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(v: String) -> Self {
        ConditionValue::Text(v)
    }
}

// ── Conditions ──────────────────────────────────────────────────────────

/// An ordered set of `field => value` conditions.
///
/// Keys may be bare (`seen`), dotted-qualified (`Mail.seen`) or
/// quoted-qualified (`` `Mail`.`seen` ``).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<(String, ConditionValue)>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConditionValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a condition, keeping first-insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConditionValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConditionValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConditionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render for failure messages.
    pub fn to_arg(&self) -> Arg {
        Arg::list(self.0.iter().map(|(k, v)| (k.clone(), v.to_arg())))
    }
}

impl<K: Into<String>, V: Into<ConditionValue>> FromIterator<(K, V)> for Conditions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut conditions = Conditions::new();
        for (k, v) in iter {
            conditions.insert(k, v);
        }
        conditions
    }
}

// ── Search terms ────────────────────────────────────────────────────────

/// One predicate of a server-side search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchToken {
    /// `SEEN` when `set`, `UNSEEN` otherwise.
    Flag { flag: Flag, set: bool },
    /// `FROM "<value>"`.
    From(String),
}

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchToken::Flag { flag, set: true } => f.write_str(flag.keyword()),
            SearchToken::Flag { flag, set: false } => write!(f, "UN{}", flag.keyword()),
            SearchToken::From(value) => write!(f, "FROM {}", quote(value)),
        }
    }
}

/// Implicitly AND-ed search tokens. Empty criteria match every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria(Vec<SearchToken>);

impl SearchCriteria {
    pub fn new(tokens: Vec<SearchToken>) -> Self {
        Self(tokens)
    }

    pub fn tokens(&self) -> &[SearchToken] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Each token rendered on its own.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join(" "))
    }
}

/// Quote a search string, escaping backslashes and double quotes.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

// ── Sorting ─────────────────────────────────────────────────────────────

/// Sort criteria understood by the SORT extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// `Date:` header.
    Date,
    Arrival,
    From,
    Subject,
    To,
    Cc,
    Size,
}

impl SortKey {
    pub fn keyword(self) -> &'static str {
        match self {
            SortKey::Date => "DATE",
            SortKey::Arrival => "ARRIVAL",
            SortKey::From => "FROM",
            SortKey::Subject => "SUBJECT",
            SortKey::To => "TO",
            SortKey::Cc => "CC",
            SortKey::Size => "SIZE",
        }
    }
}

/// A sort key plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub reverse: bool,
}

impl Default for SortSpec {
    /// Newest first.
    fn default() -> Self {
        Self {
            key: SortKey::Date,
            reverse: true,
        }
    }
}

// ── QueryTranslator ─────────────────────────────────────────────────────

/// Outcome of translating a condition set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    /// The primary key was pinned: fetch exactly these ids, in this order.
    Ids(Vec<Uid>),
    /// Run a server-side search, ordered by `sort`.
    Search {
        criteria: SearchCriteria,
        sort: SortSpec,
    },
}

/// Compiles condition sets for one model alias and primary key.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    alias: String,
    primary_key: String,
}

impl QueryTranslator {
    pub fn new(alias: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            primary_key: primary_key.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Look up `field` under its quoted-qualified, dotted-qualified and
    /// bare names, in that order.
    pub fn cond<'c>(&self, conditions: &'c Conditions, field: &str) -> Option<&'c ConditionValue> {
        let quoted = format!("`{}`.`{}`", self.alias, field);
        let dotted = format!("{}.{}", self.alias, field);
        [quoted.as_str(), dotted.as_str(), field]
            .into_iter()
            .find_map(|key| conditions.get(key))
    }

    /// Translate conditions into explicit ids or a search plus sort.
    ///
    /// Never fails; unsupported fields are ignored.
    pub fn translate(&self, conditions: &Conditions) -> Translation {
        if let Some(value) = self.cond(conditions, &self.primary_key) {
            if value.truthy() {
                match value.as_ids() {
                    Some(ids) => return Translation::Ids(ids),
                    None => tracing::debug!(
                        key = %self.primary_key,
                        "ignoring non-numeric primary key condition"
                    ),
                }
            }
        }

        let mut tokens = Vec::new();
        for flag in Flag::ALL {
            let Some(value) = self.cond(conditions, flag.field()) else {
                continue;
            };
            if *value == ConditionValue::Null {
                continue;
            }
            let set = value.truthy();
            if !set && !flag.has_negation() {
                continue;
            }
            tokens.push(SearchToken::Flag { flag, set });
        }

        if let Some(value) = self.cond(conditions, "from") {
            if value.truthy() {
                tokens.push(SearchToken::From(value.as_text()));
            }
        }

        Translation::Search {
            criteria: SearchCriteria::new(tokens),
            sort: self.order(),
        }
    }

    /// Sort directive; only date-descending is produced for now.
    pub fn order(&self) -> SortSpec {
        SortSpec::default()
    }
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self::new("Mail", "id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_strings(t: Translation) -> Vec<String> {
        match t {
            Translation::Search { criteria, .. } => criteria.to_strings(),
            Translation::Ids(ids) => panic!("expected a search, got ids {ids:?}"),
        }
    }

    #[test]
    fn primary_key_list_bypasses_search() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new()
            .with("id", vec![9u32, 3, 7])
            .with("seen", true);
        assert_eq!(
            tr.translate(&conditions),
            Translation::Ids(vec![Uid(9), Uid(3), Uid(7)])
        );
    }

    #[test]
    fn primary_key_accepts_all_three_key_forms() {
        let tr = QueryTranslator::default();
        for key in ["`Mail`.`id`", "Mail.id", "id"] {
            let conditions = Conditions::new().with(key, 42u32);
            assert_eq!(tr.translate(&conditions), Translation::Ids(vec![Uid(42)]));
        }
    }

    #[test]
    fn numeric_text_primary_key() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new().with("id", "17");
        assert_eq!(tr.translate(&conditions), Translation::Ids(vec![Uid(17)]));
    }

    #[test]
    fn falsy_primary_key_falls_through_to_search() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new().with("id", Vec::<u32>::new());
        assert!(search_strings(tr.translate(&conditions)).is_empty());
    }

    #[test]
    fn flags_emit_positive_and_negated_tokens() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new()
            .with("seen", false)
            .with("flagged", true)
            .with("answered", false)
            .with("draft", true)
            .with("deleted", false);
        assert_eq!(
            search_strings(tr.translate(&conditions)),
            vec!["UNSEEN", "FLAGGED", "UNANSWERED", "DRAFT", "UNDELETED"]
        );
    }

    #[test]
    fn recent_false_is_dropped() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new().with("recent", false);
        assert!(search_strings(tr.translate(&conditions)).is_empty());

        let conditions = Conditions::new().with("recent", true);
        assert_eq!(search_strings(tr.translate(&conditions)), vec!["RECENT"]);
    }

    #[test]
    fn seen_and_from_example() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new().with("seen", true).with("from", "a@b.com");
        assert_eq!(
            search_strings(tr.translate(&conditions)),
            vec!["SEEN", "FROM \"a@b.com\""]
        );
    }

    #[test]
    fn from_value_is_escaped() {
        let token = SearchToken::From("say \"hi\"".into());
        assert_eq!(token.to_string(), "FROM \"say \\\"hi\\\"\"");
    }

    #[test]
    fn qualified_flag_keys_are_found() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new().with("Mail.seen", true);
        assert_eq!(search_strings(tr.translate(&conditions)), vec!["SEEN"]);
    }

    #[test]
    fn null_flag_and_unknown_fields_are_ignored() {
        let tr = QueryTranslator::default();
        let conditions = Conditions::new()
            .with("seen", ConditionValue::Null)
            .with("subject", "hello")
            .with("from", "");
        assert!(search_strings(tr.translate(&conditions)).is_empty());
    }

    #[test]
    fn sort_is_date_descending() {
        let tr = QueryTranslator::default();
        match tr.translate(&Conditions::new()) {
            Translation::Search { sort, criteria } => {
                assert_eq!(sort.key, SortKey::Date);
                assert!(sort.reverse);
                assert_eq!(criteria.to_string(), "");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn criteria_display_joins_tokens() {
        let criteria = SearchCriteria::new(vec![
            SearchToken::Flag {
                flag: Flag::Seen,
                set: true,
            },
            SearchToken::From("x@y".into()),
        ]);
        assert_eq!(criteria.to_string(), "SEEN FROM \"x@y\"");
    }

    #[test]
    fn conditions_deserialize_from_json_pairs() {
        let conditions: Conditions =
            serde_json::from_str(r#"[["seen", true], ["id", [1, 2]], ["from", "a@b"]]"#).unwrap();
        assert_eq!(conditions.get("seen"), Some(&ConditionValue::Bool(true)));
        assert_eq!(conditions.get("id"), Some(&ConditionValue::Ids(vec![1, 2])));
        assert_eq!(
            conditions.get("from"),
            Some(&ConditionValue::Text("a@b".into()))
        );
    }
}
