use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Category, Message};

/// Title given to sessions that have no messages yet.
pub const PLACEHOLDER_TITLE: &str = "محادثة جديدة";

/// Stable, creation-ordered identifier of a session.
///
/// The value is derived from the creation time in milliseconds and doubles as the insertion-order
/// key: a larger id is a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw ordering value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw ordering value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(SessionId)
    }
}

/// One independent conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique within the collection.
    pub id: SessionId,
    /// Derived from the first message, or the placeholder.
    pub title: String,
    /// Only changed by explicit recategorization.
    pub category: Category,
    /// Committed messages in conversation order.
    pub messages: Vec<Message>,
}

impl Session {
    /// Create an empty session with the placeholder title.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            title: PLACEHOLDER_TITLE.to_string(),
            category: Category::Uncategorized,
            messages: Vec::new(),
        }
    }

    /// Returns the number of committed messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing has been said yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
