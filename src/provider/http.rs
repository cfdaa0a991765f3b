//! Shared HTTP client, SSE parsing, and auth utilities.

use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::error::AgentError;

use super::TextStream;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// Only connect and per-read timeouts are set so long streamed replies are
/// not cut off by a whole-request deadline.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Build Anthropic-style headers (x-api-key).
pub fn anthropic_headers(api_key: &str, version: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", val);
    }
    if let Ok(val) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", val);
    }
    headers
}

/// Map a non-success HTTP status to an upstream error.
pub fn status_to_error(status: u16, body: &str) -> AgentError {
    AgentError::upstream(status, body)
}

/// Send a request and fail with [`AgentError::Upstream`] on non-2xx.
pub async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response, AgentError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body_text = resp.text().await.unwrap_or_default();
        return Err(status_to_error(status.as_u16(), &body_text));
    }
    Ok(resp)
}

/// Send a request and parse the reply body as JSON.
///
/// A body that is not JSON at all is a [`AgentError::MalformedResponse`].
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, AgentError> {
    let resp = send_checked(request).await?;
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        debug!(error = %e, "reply body is not JSON");
        AgentError::MalformedResponse(format!("reply body is not JSON: {e}"))
    })
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and non-data lines.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// One decoded server-sent-event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

/// Reassembles SSE lines from arbitrarily split network chunks.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete `data:` line it finished.
    ///
    /// Blank lines, `:` comments and other SSE fields (`event:`, `id:`) are
    /// dropped. Bytes after the last newline are kept for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(decoded) = decode_line(line.trim()) {
                lines.push(decoded);
            }
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseLine> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw);
        decode_line(line.trim())
    }
}

/// What a vendor-specific frame parser made of one `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A text delta to forward.
    Text(String),
    /// Nothing to forward (metadata, tool deltas, malformed JSON).
    Skip,
    /// Vendor end-of-stream marker.
    Stop,
    /// The vendor reported a failure mid-stream.
    Error(String),
}

/// Human-readable text for a vendor `error` object.
///
/// All three dialects put the text under `message`; anything else is shown raw.
pub fn vendor_error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Turn an SSE response into a stream of text deltas.
///
/// `[DONE]` and [`FrameOutcome::Stop`] end the stream, as does the connection
/// closing. A transport error or a vendor error frame is yielded once as an
/// `Err` and ends the stream.
pub fn sse_text_stream<F>(resp: reqwest::Response, mut parse_frame: F) -> TextStream
where
    F: FnMut(&str) -> FrameOutcome + Send + 'static,
{
    let byte_stream = resp.bytes_stream();

    let stream = async_stream::stream! {
        let mut decoder = SseLineDecoder::new();
        futures::pin_mut!(byte_stream);

        'outer: while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(AgentError::Network(e));
                    break;
                }
            };

            for line in decoder.push(&chunk) {
                let data = match line {
                    SseLine::Done => break 'outer,
                    SseLine::Data(data) => data,
                };
                match parse_frame(&data) {
                    FrameOutcome::Text(text) if !text.is_empty() => yield Ok(text),
                    FrameOutcome::Text(_) | FrameOutcome::Skip => {}
                    FrameOutcome::Stop => break 'outer,
                    FrameOutcome::Error(message) => {
                        debug!(%message, "vendor error frame");
                        yield Err(AgentError::Stream(message));
                        return;
                    }
                }
            }
        }

        if let Some(SseLine::Data(data)) = decoder.finish() {
            match parse_frame(&data) {
                FrameOutcome::Text(text) if !text.is_empty() => yield Ok(text),
                FrameOutcome::Error(message) => yield Err(AgentError::Stream(message)),
                _ => {}
            }
        }
    };

    Box::pin(stream)
}

fn decode_line(line: &str) -> Option<SseLine> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if !line.starts_with("data:") {
        return None;
    }
    match parse_sse_data(line) {
        Some(data) => Some(SseLine::Data(data.to_string())),
        None => Some(SseLine::Done),
    }
}
