pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::history::Message;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("submission cancelled by user")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Generation parameters forwarded untouched by the session; each provider
/// picks out the keys it understands (Ollama-style names).
pub type GenerationParams = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(default)]
    pub params: GenerationParams,
}

impl ChatRequest {
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Value::as_i64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDelta {
    pub delta: Option<String>,
}

pub type ChatStream = BoxStream<'static, Result<ChatDelta, ProviderError>>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream, ProviderError>;
}

/// Like `error_for_status`, but keeps the response body in the error.
pub(crate) async fn check_status(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Status { status: status.as_u16(), body })
}

/// Payload of one server-sent event line, skipping the `[DONE]` terminator,
/// blank payloads and non-`data:` fields.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

/// Regroups a response body into complete lines. Bytes are buffered until a
/// `\n` arrives, so a frame or a multi-byte character split across network
/// chunks is decoded whole. An unterminated last line is yielded at the end.
pub(crate) fn lines<S, B, E>(body: S) -> BoxStream<'static, Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let state = (body.boxed(), Vec::<u8>::new(), false);
    stream::unfold(state, |(mut body, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim_end().to_string();
                return Some((Ok(line), (body, buf, done)));
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                buf.clear();
                return Some((Ok(line), (body, buf, done)));
            }
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buf.clear();
                    return Some((Err(e.into()), (body, buf, true)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

/// Turns a line-oriented response body into text deltas; `parse` extracts
/// the text carried by one line, if any.
pub(crate) fn text_stream<S, B, E>(body: S, parse: fn(&str) -> Option<String>) -> ChatStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    lines(body)
        .filter_map(move |line| {
            let item = match line {
                Ok(line) => parse(&line)
                    .filter(|text| !text.is_empty())
                    .map(|text| Ok(ChatDelta { delta: Some(text) })),
                Err(e) => Some(Err(e)),
            };
            futures_util::future::ready(item)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_are_read_by_type() {
        let mut params = GenerationParams::new();
        params.insert("temperature".into(), json!(0.7));
        params.insert("seed".into(), json!(42));
        params.insert("stop".into(), json!(""));
        let req = ChatRequest { model: "m".into(), messages: vec![], stream: false, params };
        assert_eq!(req.param_f64("temperature"), Some(0.7));
        assert_eq!(req.param_i64("seed"), Some(42));
        assert_eq!(req.param_str("stop"), None);
        assert_eq!(req.param_f64("top_p"), None);
    }

    #[test]
    fn sse_data_skips_noise() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("  data:{\"b\":2}  "), Some("{\"b\":2}"));
        assert_eq!(sse_data("event: message_start"), None);
        assert_eq!(sse_data("data:[DONE]"), None);
        assert_eq!(sse_data("data: "), None);
        assert_eq!(sse_data(""), None);
    }

    fn chunked(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Vec<u8>, ProviderError>> {
        stream::iter(parts.into_iter().map(|p| Ok(p.to_vec())))
    }

    #[tokio::test]
    async fn lines_are_rejoined_across_chunks() {
        // "é" is 0xC3 0xA9, split between the second and third chunk
        let body = chunked(vec![&b"first\r\nsec"[..], &b"ond caf\xC3"[..], &b"\xA9\n\ntail"[..]]);
        let got: Vec<String> = lines(body).map(Result::unwrap).collect().await;
        assert_eq!(got, vec!["first", "second café", "", "tail"]);
    }

    #[tokio::test]
    async fn body_errors_end_the_line_stream() {
        let body = stream::iter(vec![
            Ok(b"partial".to_vec()),
            Err(ProviderError::Other("reset".into())),
            Ok(b" never seen\n".to_vec()),
        ]);
        let got: Vec<Result<String, ProviderError>> = lines(body).collect().await;
        assert_eq!(got.len(), 1);
        assert!(matches!(&got[0], Err(ProviderError::Other(m)) if m == "reset"));
    }
}
