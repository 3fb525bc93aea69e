//! Centralized failure formatting and propagation.
//!
//! Failure messages are built from a `%s` template and positional [`Arg`]s,
//! each rendered through [`sensible`]. A [`Reporter`] then decides, based on
//! the configured [`ErrorMode`], whether a recoverable failure is merely
//! logged and collected or whether it aborts the current call.

use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};
use crate::ids::{SeqNo, Uid};

/// Maximum rendered length of a list value before it is cut.
const MAX_VALUE_LEN: usize = 33;

/// Length a cut list value is shortened to (before the `...`).
const CUT_VALUE_LEN: usize = 30;

// ── Arg ─────────────────────────────────────────────────────────────────

/// A positional argument for a failure message.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Key/value pairs, rendered as `key: value, ...`.
    List(Vec<(String, Arg)>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Arg {
    /// A key/value list argument.
    pub fn list<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Arg>,
        I: IntoIterator<Item = (K, V)>,
    {
        Arg::List(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    fn is_numeric(&self) -> bool {
        match self {
            Arg::Int(_) | Arg::Float(_) => true,
            Arg::Str(s) => is_numeric_str(s),
            _ => false,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Arg::Str(s) => Value::String(s.clone()),
            Arg::Int(n) => Value::from(*n),
            Arg::Float(f) => Value::from(*f),
            Arg::Bool(b) => Value::Bool(*b),
            Arg::List(pairs) => {
                let sequential = pairs
                    .iter()
                    .enumerate()
                    .all(|(i, (k, _))| k.parse::<usize>() == Ok(i));
                if sequential {
                    Value::Array(pairs.iter().map(|(_, v)| v.to_json()).collect())
                } else {
                    Value::Object(
                        pairs
                            .iter()
                            .map(|(k, v)| (k.clone(), v.to_json()))
                            .collect(),
                    )
                }
            }
        }
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<&String> for Arg {
    fn from(v: &String) -> Self {
        Arg::Str(v.clone())
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::Int(i64::from(v))
    }
}

impl From<usize> for Arg {
    fn from(v: usize) -> Self {
        Arg::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<Uid> for Arg {
    fn from(v: Uid) -> Self {
        Arg::Int(i64::from(v.get()))
    }
}

impl From<SeqNo> for Arg {
    fn from(v: SeqNo) -> Self {
        Arg::Int(i64::from(v.get()))
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Arg::Str(String::new()),
        }
    }
}

// ── sensible ────────────────────────────────────────────────────────────

/// Render an argument for inclusion in a failure message.
///
/// Scalars are quoted unless numeric or boolean, and lists become `key: value` pairs joined by `, `, with nested
/// lists JSON-encoded and long values cut to 30 characters plus `...`.
pub fn sensible(arg: &Arg) -> String {
    match arg {
        Arg::List(pairs) => pairs
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Arg::List(_) => value.to_json().to_string(),
                    other => scalar(other),
                };
                format!("{key}: {}", cut(&rendered))
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => scalar(other),
    }
}

fn scalar(arg: &Arg) -> String {
    match arg {
        Arg::Int(n) => n.to_string(),
        Arg::Float(f) => f.to_string(),
        Arg::Bool(b) => b.to_string(),
        Arg::Str(s) if arg.is_numeric() => s.clone(),
        Arg::Str(s) => format!("'{s}'"),
        Arg::List(_) => arg.to_json().to_string(),
    }
}

fn cut(value: &str) -> String {
    if value.chars().count() > MAX_VALUE_LEN {
        let mut short: String = value.chars().take(CUT_VALUE_LEN).collect();
        short.push_str("...");
        short
    } else {
        value.to_string()
    }
}

fn is_numeric_str(s: &str) -> bool {
    let t = s.trim();
    !t.is_empty() && t.parse::<f64>().is_ok_and(|f| f.is_finite())
}

/// Substitute each `%s` in `template` with the next sensibly rendered arg.
///
/// `%%` yields a literal `%`. Placeholders without a matching argument are
/// rendered empty.
pub fn format(template: &str, args: &[Arg]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('s') => {
                chars.next();
                if let Some(arg) = args.next() {
                    out.push_str(&sensible(arg));
                }
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    out
}

// ── Reporter ────────────────────────────────────────────────────────────

/// What to do with recoverable failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Log, collect into the call outcome, and carry on.
    #[default]
    Collect,
    /// Log and abort the call with the failure.
    Raise,
}

/// Funnels every failure of a call through consistent logging and the
/// configured [`ErrorMode`].
#[derive(Debug)]
pub struct Reporter {
    mode: ErrorMode,
    failures: Vec<MailError>,
}

impl Reporter {
    pub fn new(mode: ErrorMode) -> Self {
        Self {
            mode,
            failures: Vec::new(),
        }
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    /// Report a recoverable failure.
    ///
    /// Returns `Err` only in [`ErrorMode::Raise`]; otherwise the failure is
    /// kept for [`Reporter::take_failures`].
    ///
    /// A failure that is not [recoverable](MailError::is_recoverable) aborts
    /// the call in either mode.
    pub fn report(&mut self, err: MailError) -> MailResult<()> {
        if !err.is_recoverable() {
            return Err(self.fatal(err));
        }
        tracing::warn!(error = %err, "mailbox operation failed");
        match self.mode {
            ErrorMode::Collect => {
                self.failures.push(err);
                Ok(())
            }
            ErrorMode::Raise => Err(err),
        }
    }

    /// Log a failure that aborts the call regardless of mode, and hand it back.
    pub fn fatal(&mut self, err: MailError) -> MailError {
        tracing::error!(error = %err, "mailbox call aborted");
        err
    }

    /// Drain the failures collected so far.
    pub fn take_failures(&mut self) -> Vec<MailError> {
        std::mem::take(&mut self.failures)
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(ErrorMode::default())
    }
}
