//! Server-sent events processing for streaming replies.
//!
//! Turns the raw byte stream of a Messages-style streaming response into [`StreamEvent`]s. Only the
//! events the aggregator cares about are decoded: text deltas, web-search citations, the end of the
//! message and errors. Everything else is reported as [`StreamEvent::Other`].

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::Citation;

/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    /// A fragment of reply text.
    Text(String),
    /// A source cited by the reply.
    Citation(Citation),
    /// The message is complete.
    Stop,
    /// An event with no bearing on the reply text.
    Other,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaPayload,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaPayload {
    TextDelta {
        text: String,
    },
    CitationsDelta {
        citation: WireCitation,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireCitation {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

/// Process a stream of bytes into a stream of server-sent events.
pub(crate) fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + Send + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, Vec::<u8>::new(), false),
        move |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some((event, remaining)) = extract_event(&buffer) {
                    buffer = remaining;
                    return Some((event, (stream, buffer, false)));
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, false)));
                    }
                    None => {
                        // A final event may arrive without its trailing blank line.
                        if buffer.iter().all(u8::is_ascii_whitespace) {
                            return None;
                        }
                        buffer.extend_from_slice(b"\n\n");
                        let (event, _) = extract_event(&buffer)?;
                        return Some((event, (stream, Vec::new(), true)));
                    }
                }
            }
        },
    )
}

/// Extract a complete SSE event from the front of `buffer`.
///
/// Events are delimited by a blank line. Bytes are buffered raw so a multi-byte character split
/// across chunks is decoded only once it is complete.
fn extract_event(buffer: &[u8]) -> Option<(Result<StreamEvent>, Vec<u8>)> {
    let (end, delimiter) = find_delimiter(buffer)?;
    let rest = buffer[end + delimiter..].to_vec();
    let event_text = match std::str::from_utf8(&buffer[..end]) {
        Ok(text) => text,
        Err(e) => {
            return Some((
                Err(Error::streaming("event is not valid UTF-8", Some(Box::new(e)))),
                rest,
            ));
        }
    };

    let mut event_type = None;
    let mut data = String::new();
    for line in event_text.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim());
        }
    }

    let Some(event_type) = event_type else {
        return Some((
            Err(Error::serialization(
                format!("Malformed SSE event: missing event type in '{event_text}'"),
                None,
            )),
            rest,
        ));
    };
    Some((parse_event_type(event_type, &data), rest))
}

fn find_delimiter(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|idx| (idx, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| (idx, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parse a specific SSE event type and its data.
fn parse_event_type(event_type: &str, data: &str) -> Result<StreamEvent> {
    match event_type {
        "content_block_delta" => {
            let event: ContentBlockDelta = serde_json::from_str(data)?;
            Ok(match event.delta {
                DeltaPayload::TextDelta { text } => StreamEvent::Text(text),
                DeltaPayload::CitationsDelta {
                    citation:
                        WireCitation {
                            url: Some(url),
                            title,
                        },
                } => StreamEvent::Citation(Citation::new(url, title.unwrap_or_default())),
                DeltaPayload::CitationsDelta { .. } | DeltaPayload::Other => StreamEvent::Other,
            })
        }
        "message_stop" => Ok(StreamEvent::Stop),
        "ping" | "message_start" | "message_delta" | "content_block_start"
        | "content_block_stop" => Ok(StreamEvent::Other),
        "error" => {
            let (error_type, message) = match serde_json::from_str::<ErrorEvent>(data) {
                Ok(event) => (
                    event.error.error_type,
                    event.error.message.unwrap_or_else(|| data.to_string()),
                ),
                Err(_) => (None, data.to_string()),
            };
            Err(Error::api(
                500,
                Some(error_type.unwrap_or_else(|| "stream_error".to_string())),
                message,
            ))
        }
        _ => {
            tracing::debug!(event_type, "ignoring unknown SSE event type");
            Ok(StreamEvent::Other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn once(
        data: &'static [u8],
    ) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + Send {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn parse_ping_event() {
        let mut sse_stream = Box::pin(process_sse(once(b"event: ping\ndata: {}\n\n")));
        let event = sse_stream.next().await.unwrap();
        assert!(matches!(event, Ok(StreamEvent::Other)));
        assert!(sse_stream.next().await.is_none());
    }

    #[tokio::test]
    async fn parse_text_delta() {
        let data = b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n";
        let mut sse_stream = Box::pin(process_sse(once(data)));
        let event = sse_stream.next().await.unwrap().unwrap();
        assert_eq!(event, StreamEvent::Text("Hello".to_string()));
    }

    #[tokio::test]
    async fn parse_web_search_citation() {
        let data = b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"citations_delta\",\"citation\":{\"type\":\"web_search_result_location\",\"url\":\"https://sunnah.com/bukhari:1\",\"title\":\"Sahih al-Bukhari 1\",\"cited_text\":\"...\"}}}\n\n";
        let mut sse_stream = Box::pin(process_sse(once(data)));
        let event = sse_stream.next().await.unwrap().unwrap();
        assert_eq!(
            event,
            StreamEvent::Citation(Citation::new(
                "https://sunnah.com/bukhari:1",
                "Sahih al-Bukhari 1"
            ))
        );
    }

    #[tokio::test]
    async fn parse_multiple_events() {
        let data = b"event: ping\ndata: {}\n\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
        let mut sse_stream = Box::pin(process_sse(once(data)));
        assert!(matches!(sse_stream.next().await, Some(Ok(StreamEvent::Other))));
        assert!(matches!(sse_stream.next().await, Some(Ok(StreamEvent::Stop))));
        assert!(sse_stream.next().await.is_none());
    }

    #[tokio::test]
    async fn handle_split_multibyte_text() {
        let full = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"سلام\"}}\n\n";
        let bytes = full.as_bytes();
        let split = full.find("سلام").unwrap() + 1;
        let chunks: Vec<std::result::Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let stream = stream::iter(chunks);
        let mut sse_stream = Box::pin(process_sse(stream));
        let event = sse_stream.next().await.unwrap().unwrap();
        assert_eq!(event, StreamEvent::Text("سلام".to_string()));
    }

    #[tokio::test]
    async fn handle_crlf_delimiters() {
        let data = b"event: message_stop\r\ndata: {}\r\n\r\n";
        let mut sse_stream = Box::pin(process_sse(once(data)));
        assert!(matches!(sse_stream.next().await, Some(Ok(StreamEvent::Stop))));
    }

    #[tokio::test]
    async fn handle_trailing_event_without_delimiter() {
        let mut sse_stream = Box::pin(process_sse(once(b"event: message_stop\ndata: {}")));
        assert!(matches!(sse_stream.next().await, Some(Ok(StreamEvent::Stop))));
        assert!(sse_stream.next().await.is_none());
    }

    #[tokio::test]
    async fn handle_malformed_event() {
        let data = b"malformed data without proper format\n\n";
        let mut sse_stream = Box::pin(process_sse(once(data)));
        assert!(sse_stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn error_event_is_api_error() {
        let data = b"event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        let mut sse_stream = Box::pin(process_sse(once(data)));
        let err = sse_stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.to_string(), "overloaded_error (500): Overloaded");
    }
}
