//! The streaming aggregator.
//!
//! [`StreamingAggregator::send_message`] drives one generation per session: it commits the user's
//! message, streams the reply into a [`DisplaySink`] by re-rendering the whole buffer on every
//! delta, and commits the assistant's message at most once when the stream closes cleanly.
//!
//! The commit target is the session id captured when the call started. If that session was
//! deleted or is no longer current when the reply finishes, the reply is dropped rather than
//! written anywhere else.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{Conversation, DEFAULT_PERSONA, GenerationBackend, Instruction};
use crate::directory::{SessionDirectory, SharedDirectory};
use crate::display::{DisplaySink, ReplyHandle};
use crate::error::{Error, Result};
use crate::markup::{ListWrapping, render_with};
use crate::observability::{
    STREAM_BUSY, STREAM_COMMITS, STREAM_DELTAS, STREAM_DISCARDS, STREAM_DURATION,
    STREAM_FAILURES, STREAM_STARTS, STREAM_TTFB,
};
use crate::types::{Citation, Message, SessionId};

/// Shown in place of a reply that failed or came back empty.
pub const STREAM_FAILURE_MESSAGE: &str = "عذراً، حدث خطأ أثناء توليد الإجابة. يرجى المحاولة مرة أخرى.";

/// Shown in place of a reply the user stopped.
pub const STREAM_CANCELLED_MESSAGE: &str = "تم إيقاف الإجابة.";

/// Shown in place of a reply whose session was deleted or deselected while it streamed.
pub const STREAM_DISCARDED_MESSAGE: &str = "تم تجاهل الإجابة لأن المحادثة لم تعد محددة.";

/// Where a session's stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No stream is outstanding.
    Idle,
    /// The request is open and nothing has arrived yet.
    AwaitingFirstDelta,
    /// At least one delta has arrived.
    Streaming,
    /// The reply is being appended to the session.
    Committing,
    /// The stream failed; the failure rendering is being shown.
    Failed,
}

/// What a completed `send_message` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The reply was appended to the session.
    Committed,
    /// The stream closed without any text.
    Empty,
    /// The stream failed or timed out.
    Failed,
    /// The stream was cancelled.
    Cancelled,
    /// The reply finished after its session was deleted or deselected and was dropped.
    Discarded,
}

/// Tunables for the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Persona text for the backend instruction.
    pub persona: String,
    /// Maximum wait for the stream to open and between deltas.
    pub stream_timeout: Option<Duration>,
    /// How list runs are wrapped when rendering.
    pub list_wrapping: ListWrapping,
    /// Shown when a stream fails or returns nothing.
    pub failure_message: String,
}

impl AggregatorConfig {
    /// Sets the persona.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Sets the stream timeout.
    pub fn with_stream_timeout(mut self, stream_timeout: Option<Duration>) -> Self {
        self.stream_timeout = stream_timeout;
        self
    }

    /// Sets the list wrapping policy.
    pub fn with_list_wrapping(mut self, list_wrapping: ListWrapping) -> Self {
        self.list_wrapping = list_wrapping;
        self
    }

    /// Sets the failure message.
    pub fn with_failure_message(mut self, failure_message: impl Into<String>) -> Self {
        self.failure_message = failure_message.into();
        self
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            stream_timeout: None,
            list_wrapping: ListWrapping::default(),
            failure_message: STREAM_FAILURE_MESSAGE.to_string(),
        }
    }
}

struct InFlight {
    token: CancellationToken,
    state: StreamState,
}

struct OpenConversation {
    session_id: SessionId,
    instruction: Instruction,
    conversation: Arc<dyn Conversation>,
}

/// Removes the in-flight entry however the call ends, including when its future is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<SessionId, InFlight>>,
    session_id: SessionId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

enum StreamEnd {
    Completed,
    Failed(Error),
    Cancelled,
}

/// Drives generation requests and commits their replies.
pub struct StreamingAggregator {
    directory: SharedDirectory,
    backend: Arc<dyn GenerationBackend>,
    config: AggregatorConfig,
    in_flight: Mutex<HashMap<SessionId, InFlight>>,
    conversation: Mutex<Option<OpenConversation>>,
}

impl StreamingAggregator {
    /// Creates an aggregator over a shared directory.
    pub fn new(
        directory: SharedDirectory,
        backend: Arc<dyn GenerationBackend>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            directory,
            backend,
            config,
            in_flight: Mutex::new(HashMap::new()),
            conversation: Mutex::new(None),
        }
    }

    /// The shared directory.
    pub fn directory(&self) -> SharedDirectory {
        Arc::clone(&self.directory)
    }

    /// The configuration.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// The stream state of `session_id`.
    pub fn state(&self, session_id: SessionId) -> StreamState {
        self.in_flight()
            .get(&session_id)
            .map(|entry| entry.state)
            .unwrap_or(StreamState::Idle)
    }

    /// True if a stream is outstanding for `session_id`.
    pub fn is_streaming(&self, session_id: SessionId) -> bool {
        self.in_flight().contains_key(&session_id)
    }

    /// Cancels the stream for `session_id`. Returns false if none was outstanding.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        match self.in_flight().get(&session_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every outstanding stream and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let in_flight = self.in_flight();
        for entry in in_flight.values() {
            entry.token.cancel();
        }
        in_flight.len()
    }

    /// Deletes a session, cancelling its stream first.
    pub fn delete_session(&self, session_id: SessionId) {
        self.cancel(session_id);
        {
            let mut open = self.open_conversation();
            if open.as_ref().is_some_and(|o| o.session_id == session_id) {
                *open = None;
            }
        }
        self.lock_directory().delete(session_id);
    }

    /// Sends `text` to `session_id` and streams the reply into `sink`.
    ///
    /// The user's message is committed before the backend is contacted and stays committed
    /// whatever happens to the reply. Stream failures are rendered into the sink and reported
    /// through the returned [`StreamOutcome`], never as an `Err`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist.
    /// - `NotSelected` if the session is not the current one.
    /// - `Busy` if a stream is already outstanding for the session.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        text: &str,
        sink: &mut dyn DisplaySink,
    ) -> Result<StreamOutcome> {
        {
            let directory = self.lock_directory();
            if !directory.contains(session_id) {
                return Err(Error::not_found("cannot send message", Some(session_id)));
            }
            if directory.current_id() != Some(session_id) {
                return Err(Error::not_selected(session_id));
            }
        }

        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight();
            if in_flight.contains_key(&session_id) {
                STREAM_BUSY.click();
                tracing::debug!(
                    session_id = %session_id,
                    "rejecting send while a reply is streaming"
                );
                return Err(Error::busy(session_id));
            }
            in_flight.insert(
                session_id,
                InFlight {
                    token: token.clone(),
                    state: StreamState::AwaitingFirstDelta,
                },
            );
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            session_id,
        };

        let conversation = {
            let mut directory = self.lock_directory();
            let conversation = self.conversation_for(&directory, session_id)?;
            directory.append_message(session_id, Message::user(text))?;
            conversation
        };
        STREAM_STARTS.click();
        tracing::info!(session_id = %session_id, "sending message");

        sink.show_user_message(session_id, &render_with(text, self.config.list_wrapping));
        let handle = sink.show_placeholder(session_id);
        let started = Instant::now();
        let (buffer, citations, end) = self
            .consume(session_id, &conversation, text, &token, sink, handle, started)
            .await;
        STREAM_DURATION.add(started.elapsed().as_secs_f64());

        let outcome = match end {
            StreamEnd::Completed if buffer.is_empty() => {
                STREAM_FAILURES.click();
                tracing::warn!(session_id = %session_id, "stream closed without any text");
                self.set_state(session_id, StreamState::Failed);
                sink.show_error(handle, &self.render(&self.config.failure_message));
                StreamOutcome::Empty
            }
            StreamEnd::Completed => {
                self.set_state(session_id, StreamState::Committing);
                self.commit(session_id, &conversation, buffer, citations, sink, handle)
            }
            StreamEnd::Failed(err) => {
                STREAM_FAILURES.click();
                tracing::warn!(session_id = %session_id, error = %err, "stream failed");
                self.set_state(session_id, StreamState::Failed);
                sink.show_error(handle, &self.render(&self.config.failure_message));
                StreamOutcome::Failed
            }
            StreamEnd::Cancelled => {
                tracing::info!(session_id = %session_id, "stream cancelled");
                sink.show_error(handle, &self.render(STREAM_CANCELLED_MESSAGE));
                StreamOutcome::Cancelled
            }
        };
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume(
        &self,
        session_id: SessionId,
        conversation: &Arc<dyn Conversation>,
        text: &str,
        token: &CancellationToken,
        sink: &mut dyn DisplaySink,
        handle: ReplyHandle,
        started: Instant,
    ) -> (String, Vec<Citation>, StreamEnd) {
        let mut buffer = String::new();
        let mut citations = Vec::new();
        let mut stream = match self.guarded(token, conversation.send(text)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) | Err(err) => return (buffer, citations, end_for(err)),
        };
        let mut first = true;
        loop {
            let delta = match self.guarded(token, stream.next()).await {
                Ok(Some(Ok(delta))) => delta,
                Ok(None) => return (buffer, citations, StreamEnd::Completed),
                Ok(Some(Err(err))) | Err(err) => return (buffer, citations, end_for(err)),
            };
            STREAM_DELTAS.click();
            if first {
                first = false;
                STREAM_TTFB.add(started.elapsed().as_secs_f64());
                self.set_state(session_id, StreamState::Streaming);
            }
            buffer.push_str(&delta.text);
            if !delta.citations.is_empty() {
                citations = delta.citations;
            }
            sink.update_content(handle, &self.render(&buffer));
        }
    }

    fn commit(
        &self,
        session_id: SessionId,
        conversation: &Arc<dyn Conversation>,
        buffer: String,
        citations: Vec<Citation>,
        sink: &mut dyn DisplaySink,
        handle: ReplyHandle,
    ) -> StreamOutcome {
        let markup = self.render(&buffer);
        let committed = {
            let mut directory = self.lock_directory();
            if directory.current_id() != Some(session_id) {
                false
            } else {
                let reply = Message::assistant(buffer.clone(), citations.clone());
                directory.append_message(session_id, reply).is_ok()
            }
        };
        if !committed {
            STREAM_DISCARDS.click();
            tracing::warn!(
                session_id = %session_id,
                "reply finished after its session was deleted or deselected; dropping it"
            );
            sink.show_error(handle, &self.render(STREAM_DISCARDED_MESSAGE));
            return StreamOutcome::Discarded;
        }
        conversation.record_reply(&buffer);
        STREAM_COMMITS.click();
        tracing::info!(session_id = %session_id, citations = citations.len(), "committed reply");
        sink.finalize(handle, &markup, &citations);
        StreamOutcome::Committed
    }

    /// Races `fut` against cancellation and the configured timeout.
    async fn guarded<F: Future>(&self, token: &CancellationToken, fut: F) -> Result<F::Output> {
        let timed = async {
            match self.config.stream_timeout {
                Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                    Error::timeout(
                        "no reply fragment within the stream timeout",
                        Some(limit.as_secs_f64()),
                    )
                }),
                None => Ok(fut.await),
            }
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::cancelled("stream cancelled")),
            output = timed => output,
        }
    }

    /// Returns the conversation for `session_id`, opening a new one when the session or its
    /// instruction changed since the last send.
    fn conversation_for(
        &self,
        directory: &SessionDirectory,
        session_id: SessionId,
    ) -> Result<Arc<dyn Conversation>> {
        let session = directory
            .get(session_id)
            .ok_or_else(|| Error::not_found("cannot open conversation", Some(session_id)))?;
        let instruction = Instruction::new(self.config.persona.clone(), directory.display_name());
        let mut open = self.open_conversation();
        if let Some(existing) = open.as_ref()
            && existing.session_id == session_id
            && existing.instruction == instruction
        {
            return Ok(Arc::clone(&existing.conversation));
        }
        tracing::debug!(
            session_id = %session_id,
            history = session.messages.len(),
            "opening conversation"
        );
        let conversation = self.backend.open(&instruction, &session.messages);
        *open = Some(OpenConversation {
            session_id,
            instruction,
            conversation: Arc::clone(&conversation),
        });
        Ok(conversation)
    }

    fn render(&self, text: &str) -> String {
        render_with(text, self.config.list_wrapping)
    }

    fn set_state(&self, session_id: SessionId, state: StreamState) {
        if let Some(entry) = self.in_flight().get_mut(&session_id) {
            entry.state = state;
        }
    }

    fn lock_directory(&self) -> MutexGuard<'_, SessionDirectory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<SessionId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_conversation(&self) -> MutexGuard<'_, Option<OpenConversation>> {
        self.conversation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn end_for(err: Error) -> StreamEnd {
    if err.is_cancelled() {
        StreamEnd::Cancelled
    } else {
        StreamEnd::Failed(err)
    }
}
