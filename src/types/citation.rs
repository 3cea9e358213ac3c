use serde::{Deserialize, Serialize};

/// A source reference attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Where the source lives.
    pub uri: String,
    /// Human-readable title of the source.
    pub title: String,
}

impl Citation {
    /// Create a new `Citation`.
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }

    /// The title, or the URI when the backend supplied no title.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.uri
        } else {
            &self.title
        }
    }
}
