use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream;

use super::{Conversation, Delta, DeltaStream, GenerationBackend, Instruction};
use crate::error::{Error, Result};
use crate::types::Message;

/// One step of a scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield a delta.
    Delta(Delta),
    /// Fail the stream with an error. Later steps are not reached.
    Fail(Error),
    /// Wait before the next step.
    Pause(Duration),
    /// Never produce anything again.
    Hang,
}

impl ScriptStep {
    /// A text-only delta.
    pub fn text(text: impl Into<String>) -> Self {
        ScriptStep::Delta(Delta::text(text))
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    turns: VecDeque<Vec<ScriptStep>>,
    prompts: Vec<String>,
    system_prompts: Vec<String>,
    replies: Vec<String>,
}

impl ScriptState {
    fn next_turn(&mut self) -> Vec<ScriptStep> {
        if self.turns.len() > 1 {
            self.turns.pop_front().unwrap_or_default()
        } else {
            self.turns.front().cloned().unwrap_or_default()
        }
    }
}

/// A backend that replays scripted replies.
///
/// Each send consumes the next queued script; the last script repeats for every later send.
/// Everything sent and recorded is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBackend {
    /// A backend that replays `steps` for every send.
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        let backend = Self::default();
        backend.lock().turns.push_back(steps);
        backend
    }

    /// A backend that replies with `texts` as consecutive deltas.
    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| ScriptStep::text(*text)).collect())
    }

    /// Queues a script for a later send.
    pub fn then(self, steps: Vec<ScriptStep>) -> Self {
        self.lock().turns.push_back(steps);
        self
    }

    /// Every user text sent, across all conversations.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    /// The system prompt of every conversation opened, in order.
    pub fn system_prompts(&self) -> Vec<String> {
        self.lock().system_prompts.clone()
    }

    /// Every reply recorded back into a conversation.
    pub fn replies(&self) -> Vec<String> {
        self.lock().replies.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GenerationBackend for ScriptedBackend {
    fn open(&self, instruction: &Instruction, _: &[Message]) -> Arc<dyn Conversation> {
        self.lock().system_prompts.push(instruction.system_prompt());
        Arc::new(self.clone())
    }
}

#[async_trait::async_trait]
impl Conversation for ScriptedBackend {
    async fn send(&self, text: &str) -> Result<DeltaStream> {
        let steps: VecDeque<ScriptStep> = {
            let mut state = self.lock();
            state.prompts.push(text.to_string());
            state.next_turn().into()
        };
        Ok(Box::pin(stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    ScriptStep::Delta(delta) => return Some((Ok(delta), steps)),
                    ScriptStep::Fail(err) => return Some((Err(err), VecDeque::new())),
                    ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        })))
    }

    fn record_reply(&self, text: &str) {
        self.lock().replies.push(text.to_string());
    }
}
