//! Message identity: persistent unique ids versus transient sequence numbers.
//!
//! The two numbering schemes are distinct types; neither converts into the
//! other implicitly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persistent unique id of a message, stable across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u32);

/// Transient sequence number: the position of a message in the mailbox.
///
/// Only valid for the current mailbox state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNo(pub u32);

impl Uid {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl SeqNo {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Uid {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<u32> for SeqNo {
    fn from(v: u32) -> Self {
        Self(v)
    }
}
