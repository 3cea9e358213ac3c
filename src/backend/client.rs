use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use super::sse::{StreamEvent, process_sse};
use super::{Conversation, Delta, DeltaStream, GenerationBackend, Instruction};
use crate::error::{Error, Result};
use crate::types::{Citation, Message, Sender};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/";
const API_VERSION: &str = "2023-06-01";
const API_KEY_VAR: &str = "MAJLIS_API_KEY";
/// The model requested when none is configured.
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5";
/// The reply token limit when none is configured.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const WEB_SEARCH_MAX_USES: u32 = 5;

/// A generation backend speaking the Messages streaming protocol over HTTP.
#[derive(Debug, Clone)]
pub struct MessagesBackend {
    api_key: String,
    client: ReqwestClient,
    base_url: Url,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    web_search: bool,
}

impl MessagesBackend {
    /// Create a new backend.
    ///
    /// The API key can be provided directly or read from the MAJLIS_API_KEY environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new backend with a custom base URL and request timeout.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_VAR).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {API_KEY_VAR} environment variable not set"
                ))
            })?,
        };
        HeaderValue::from_str(&api_key)
            .map_err(|_| Error::authentication("API key contains invalid header characters"))?;

        let mut base_url = Url::parse(base_url.unwrap_or(DEFAULT_API_URL))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key,
            client,
            base_url,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout,
            web_search: false,
        })
    }

    /// Sets the model to request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the maximum number of tokens per reply.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Enables the server-side web search tool, which is what produces citations.
    pub fn with_web_search(mut self, web_search: bool) -> Self {
        self.web_search = web_search;
        self
    }

    /// The model requested.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| Error::authentication("API key contains invalid header characters"))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorDetail>,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            #[serde(rename = "type")]
            error_type: Option<String>,
            message: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        let detail = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error);
        let error_type = detail.as_ref().and_then(|e| e.error_type.clone());
        let error_message = detail
            .and_then(|e| e.message)
            .unwrap_or_else(|| error_body.clone());

        match status_code {
            401 | 403 => Error::authentication(error_message),
            408 => Error::timeout(error_message, None),
            _ => Error::api(status_code, error_type, error_message),
        }
    }

    async fn stream(&self, system: &str, messages: Vec<WireMessage>) -> Result<DeltaStream> {
        let url = self.base_url.join("messages")?;
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages,
            stream: true,
            tools: self.web_search.then(|| {
                vec![serde_json::json!({
                    "type": "web_search_20250305",
                    "name": "web_search",
                    "max_uses": WEB_SEARCH_MAX_USES,
                })]
            }),
        };

        let response = self
            .client
            .post(url)
            .headers(self.default_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {e}"),
                        Some(self.timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        Ok(into_deltas(process_sse(response.bytes_stream())))
    }
}

impl GenerationBackend for MessagesBackend {
    fn open(&self, instruction: &Instruction, history: &[Message]) -> Arc<dyn Conversation> {
        Arc::new(MessagesConversation {
            backend: self.clone(),
            system: instruction.system_prompt(),
            history: Mutex::new(history.iter().map(WireMessage::from).collect()),
        })
    }
}

/// A conversation whose history is replayed on every request.
struct MessagesConversation {
    backend: MessagesBackend,
    system: String,
    history: Mutex<Vec<WireMessage>>,
}

#[async_trait::async_trait]
impl Conversation for MessagesConversation {
    async fn send(&self, text: &str) -> Result<DeltaStream> {
        let messages = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push(WireMessage::new(Sender::User, text));
            merge_turns(&history)
        };
        self.backend.stream(&self.system, messages).await
    }

    fn record_reply(&self, text: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push(WireMessage::new(Sender::Assistant, text));
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl WireMessage {
    fn new(sender: Sender, content: impl Into<String>) -> Self {
        let role = match sender {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        };
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.sender, message.content.clone())
    }
}

/// Joins consecutive turns from the same role.
///
/// A failed reply leaves two user turns in a row; the endpoint requires roles to alternate.
fn merge_turns(history: &[WireMessage]) -> Vec<WireMessage> {
    let mut merged: Vec<WireMessage> = Vec::with_capacity(history.len());
    for message in history {
        match merged.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => merged.push(message.clone()),
        }
    }
    merged
}

/// Converts decoded events into reply deltas.
///
/// Citations are collected as they arrive and delivered together on one final delta. A stream
/// that closes before `message_stop` ends with an error so a truncated reply is never committed.
fn into_deltas<S>(events: S) -> DeltaStream
where
    S: futures::Stream<Item = Result<StreamEvent>> + Send + 'static,
{
    let events = Box::pin(events);
    Box::pin(stream::unfold(
        (events, Vec::<Citation>::new(), false),
        |(mut events, mut citations, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match events.next().await {
                    Some(Ok(StreamEvent::Text(text))) => {
                        return Some((Ok(Delta::text(text)), (events, citations, false)));
                    }
                    Some(Ok(StreamEvent::Citation(citation))) => {
                        if !citations.iter().any(|c| c.uri == citation.uri) {
                            citations.push(citation);
                        }
                    }
                    Some(Ok(StreamEvent::Other)) => {}
                    None => {
                        tracing::warn!("event stream closed without message_stop");
                        return Some((
                            Err(Error::streaming("stream ended before message_stop", None)),
                            (events, Vec::new(), true),
                        ));
                    }
                    Some(Ok(StreamEvent::Stop)) => {
                        if citations.is_empty() {
                            return None;
                        }
                        let citations = std::mem::take(&mut citations);
                        return Some((
                            Ok(Delta::with_citations("", citations)),
                            (events, Vec::new(), true),
                        ));
                    }
                    Some(Err(e)) => return Some((Err(e), (events, citations, true))),
                }
            }
        },
    ))
}
