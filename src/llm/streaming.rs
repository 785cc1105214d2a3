//! Streaming response handling
//!
//! Turns the raw byte stream of an OpenAI-compatible `chat/completions`
//! request (`stream: true`) into a stream of text deltas.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::errors::MindcareError;
use crate::errors::Result;

/// Boxed stream of generated text chunks
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming response from LLM
pub struct StreamingResponse {
    stream: TokenStream,
}

impl StreamingResponse {
    pub fn new(stream: TokenStream) -> Self {
        Self { stream }
    }

    /// Wrap already-known chunks
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    /// Collect all chunks into a single string
    pub async fn collect_all(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(chunk) = self.stream.next().await {
            result.push_str(&chunk?);
        }
        Ok(result)
    }

    /// Get the underlying stream
    pub fn into_stream(self) -> TokenStream {
        self.stream
    }
}

/// One decoded server-sent event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Line-oriented SSE decoder that tolerates events split across network reads
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was never newline-terminated
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest)
    }

    fn decode_line(line: &[u8]) -> Option<SseEvent> {
        // A full line always ends on a char boundary since '\n' is ASCII
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);
        let payload = line.strip_prefix("data:")?.trim_start();
        if payload == "[DONE]" {
            Some(SseEvent::Done)
        } else if payload.is_empty() {
            None
        } else {
            Some(SseEvent::Data(payload.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    #[serde(default)]
    error: Option<ChatStreamError>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamError {
    message: String,
}

/// Extract the text delta of one `data:` payload
pub fn parse_chat_delta(payload: &str) -> Result<Option<String>> {
    let chunk: ChatStreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparsable stream payload: {}", e);
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(MindcareError::LlmError(error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

struct SseState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Returns an error to surface, if the event carried one
    fn absorb(&mut self, event: SseEvent) -> Option<MindcareError> {
        match event {
            SseEvent::Done => {
                self.finished = true;
                None
            }
            SseEvent::Data(payload) => match parse_chat_delta(&payload) {
                Ok(Some(delta)) => {
                    self.pending.push_back(delta);
                    None
                }
                Ok(None) => None,
                Err(e) => Some(e),
            },
        }
    }
}

/// Adapt an SSE byte stream into a [`StreamingResponse`] of text deltas
pub fn chat_delta_stream<S, B, E>(bytes: S) -> StreamingResponse
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = SseState {
        inner: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    for event in state.decoder.push(bytes.as_ref()) {
                        if let Some(error) = state.absorb(event) {
                            state.finished = true;
                            state.pending.clear();
                            return Some((Err(error), state));
                        }
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.clear();
                    let error = MindcareError::LlmError(format!("Stream error: {e}"));
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    if let Some(event) = state.decoder.finish() {
                        if let Some(error) = state.absorb(event) {
                            return Some((Err(error), state));
                        }
                    }
                }
            }
        }
    });

    StreamingResponse::new(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(parts: Vec<&'static str>) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_decoder_ignores_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\n\n").is_empty());
    }

    #[test]
    fn test_parse_chat_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"안녕"}}]}"#;
        assert_eq!(parse_chat_delta(payload).unwrap(), Some("안녕".to_string()));

        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_chat_delta(role_only).unwrap(), None);

        let error = r#"{"error":{"message":"overloaded"}}"#;
        assert!(matches!(parse_chat_delta(error), Err(MindcareError::LlmError(_))));
    }

    #[tokio::test]
    async fn test_chat_delta_stream_reassembles_multibyte_text() {
        // "마음" split in the middle of a UTF-8 sequence
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"마음\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = body.as_bytes();
        let split = body.find('마').unwrap() + 1;
        let parts: Vec<std::result::Result<Vec<u8>, String>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];

        let text = chat_delta_stream(futures::stream::iter(parts))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(text, "마음");
    }

    #[tokio::test]
    async fn test_chat_delta_stream_stops_at_done() {
        let stream = chat_delta_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ]));
        assert_eq!(stream.collect_all().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_transport_error_is_terminal() {
        let parts: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err("connection reset".to_string()),
        ];
        let mut stream = chat_delta_stream(futures::stream::iter(parts)).into_stream();
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
