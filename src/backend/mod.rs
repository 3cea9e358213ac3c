//! The generation backend seam.
//!
//! The aggregator never talks HTTP. It asks a [`GenerationBackend`] for a [`Conversation`] bound to
//! one session, then asks that conversation for a stream of [`Delta`]s per user turn.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::error::Result;
use crate::types::{Citation, Message};

mod client;
mod scripted;
mod sse;

pub use client::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, MessagesBackend};
pub use scripted::{ScriptStep, ScriptedBackend};

/// The persona used when none is configured.
pub const DEFAULT_PERSONA: &str = "You are a knowledgeable and gentle assistant for questions about Islam. \
Answer in the language of the question. Ground answers in the Quran and authentic hadith, name \
your sources, and say plainly when scholars differ or when you do not know.";

/// One incremental fragment of a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// Text to append to the reply.
    pub text: String,
    /// Sources for the reply. Only the final delta of a stream is expected to carry these.
    pub citations: Vec<Citation>,
}

impl Delta {
    /// A delta carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    /// A delta carrying text and citations.
    pub fn with_citations(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            text: text.into(),
            citations,
        }
    }
}

/// A stream of reply fragments. An `Err` item terminates the reply.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta>> + Send>>;

/// The system instruction a conversation is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    persona: String,
    display_name: Option<String>,
}

impl Instruction {
    /// Creates an instruction from a persona and an optional display name.
    pub fn new(persona: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            persona: persona.into(),
            display_name: display_name.filter(|name| !name.trim().is_empty()),
        }
    }

    /// The persona text.
    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// The user's display name, if known.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Renders the system prompt.
    pub fn system_prompt(&self) -> String {
        match &self.display_name {
            Some(name) => format!(
                "{}\n\nThe user's name is {}. Address them by name when it is natural.",
                self.persona,
                name.trim()
            ),
            None => self.persona.clone(),
        }
    }
}

impl Default for Instruction {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA, None)
    }
}

/// A conversational handle bound to one session.
#[async_trait::async_trait]
pub trait Conversation: Send + Sync {
    /// Sends a user turn and returns the reply stream.
    async fn send(&self, text: &str) -> Result<DeltaStream>;

    /// Records the reply that was committed for the last turn, so later turns replay it.
    fn record_reply(&self, text: &str);
}

/// Opens conversations.
pub trait GenerationBackend: Send + Sync {
    /// Opens a conversation seeded with a session's committed history.
    fn open(&self, instruction: &Instruction, history: &[Message]) -> Arc<dyn Conversation>;
}
