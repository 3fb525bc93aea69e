//! Message flags as understood by the search translator, the record
//! assembler and the auto-mark side effect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// One of the six per-message flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Recent,
    Seen,
    Flagged,
    Answered,
    Draft,
    Deleted,
}

impl Flag {
    /// All flags, in the order search tokens are emitted.
    pub const ALL: [Flag; 6] = [
        Flag::Recent,
        Flag::Seen,
        Flag::Flagged,
        Flag::Answered,
        Flag::Draft,
        Flag::Deleted,
    ];

    /// Lower-case condition field name (e.g. `"seen"`).
    pub fn field(self) -> &'static str {
        match self {
            Flag::Recent => "recent",
            Flag::Seen => "seen",
            Flag::Flagged => "flagged",
            Flag::Answered => "answered",
            Flag::Draft => "draft",
            Flag::Deleted => "deleted",
        }
    }

    /// Upper-case search keyword (e.g. `"SEEN"`).
    pub fn keyword(self) -> &'static str {
        match self {
            Flag::Recent => "RECENT",
            Flag::Seen => "SEEN",
            Flag::Flagged => "FLAGGED",
            Flag::Answered => "ANSWERED",
            Flag::Draft => "DRAFT",
            Flag::Deleted => "DELETED",
        }
    }

    /// IMAP system flag name (e.g. `"\\Seen"`).
    pub fn system_name(self) -> &'static str {
        match self {
            Flag::Recent => "\\Recent",
            Flag::Seen => "\\Seen",
            Flag::Flagged => "\\Flagged",
            Flag::Answered => "\\Answered",
            Flag::Draft => "\\Draft",
            Flag::Deleted => "\\Deleted",
        }
    }

    /// Whether clients may set this flag. `\Recent` is server-managed.
    pub fn is_markable(self) -> bool {
        self != Flag::Recent
    }

    /// Whether the search grammar has a negated (`UN`-prefixed) form.
    pub fn has_negation(self) -> bool {
        self != Flag::Recent
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

impl FromStr for Flag {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches('\\').to_lowercase();
        Flag::ALL
            .into_iter()
            .find(|f| f.field() == name)
            .ok_or_else(|| MailError::Config {
                message: format!("unknown flag \"{s}\""),
            })
    }
}

/// Render a flag set as the space-separated list the STORE command expects.
pub fn flag_list(flags: &[Flag]) -> String {
    flags
        .iter()
        .map(|f| f.system_name())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_system_names() {
        assert_eq!("\\Seen".parse::<Flag>().unwrap(), Flag::Seen);
        assert_eq!("DRAFT".parse::<Flag>().unwrap(), Flag::Draft);
        assert!("important".parse::<Flag>().is_err());
    }

    #[test]
    fn recent_is_special() {
        assert!(!Flag::Recent.is_markable());
        assert!(!Flag::Recent.has_negation());
        assert!(Flag::Seen.has_negation());
    }

    #[test]
    fn flag_list_joins_system_names() {
        assert_eq!(flag_list(&[Flag::Seen, Flag::Flagged]), "\\Seen \\Flagged");
        assert_eq!(flag_list(&[]), "");
    }
}
