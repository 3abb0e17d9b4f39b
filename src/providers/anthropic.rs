use super::{
    ChatRequest, ChatResponse, ChatStream, LlmProvider, ProviderError, check_status, sse_data,
    text_stream,
};
use crate::history::Role;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_TOKENS: i64 = 1024;

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    version: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(
        base_url: String,
        api_key: String,
        version: String,
        default_model: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().build()?;
        Ok(Self { client, base_url, api_key, version, default_model })
    }

    fn messages_request(&self) -> RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
    }
}

#[derive(Serialize, Debug)]
struct ReqMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct Body<'a> {
    model: &'a str,
    messages: Vec<ReqMsg<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<&'a str>,
    stream: bool,
}

/// The messages API takes the system prompt as a top-level field, so system
/// messages are lifted out of the turn list.
fn body_for<'a>(req: &'a ChatRequest, stream: bool) -> Body<'a> {
    let system: Vec<&str> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let messages = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| ReqMsg { role: m.role.as_str(), content: &m.content })
        .collect();
    Body {
        model: &req.model,
        messages,
        system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
        max_tokens: req.param_i64("num_predict").filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: req.param_f64("temperature").filter(|t| *t > 0.0),
        top_p: req.param_f64("top_p").filter(|p| *p > 0.0),
        top_k: req.param_i64("top_k").filter(|k| *k > 0),
        stop_sequences: req.param_str("stop").into_iter().collect(),
        stream,
    }
}

#[derive(Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Event {
    r#type: String,
    #[serde(default)]
    delta: Option<TextDelta>,
}

/// Text of a `content_block_delta` event; other events carry none.
fn line_text(line: &str) -> Option<String> {
    let ev: Event = serde_json::from_str(sse_data(line)?).ok()?;
    if ev.r#type != "content_block_delta" {
        return None;
    }
    ev.delta.map(|d| d.text)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![self.default_model.clone()])
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum RespContent {
            Text { text: String },
            #[serde(other)]
            Other,
        }
        #[derive(Deserialize)]
        struct RespUsage {
            input_tokens: u32,
            output_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<RespContent>,
            usage: Option<RespUsage>,
        }

        let resp = self.messages_request().json(&body_for(&req, false)).send().await?;
        let resp: Resp = check_status(resp).await?.json().await?;

        let mut text_acc = String::new();
        for c in resp.content {
            if let RespContent::Text { text } = c {
                text_acc.push_str(&text);
            }
        }
        let usage = resp.usage.map(|u| super::Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });
        Ok(ChatResponse { content: Some(text_acc), usage })
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        let resp = self.messages_request().json(&body_for(&req, true)).send().await?;
        let resp = check_status(resp).await?;
        Ok(text_stream(resp.bytes_stream(), line_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Message;
    use serde_json::json;

    #[test]
    fn system_prompt_is_lifted_out_of_messages() {
        let req = ChatRequest {
            model: "claude-3-5-sonnet-latest".into(),
            messages: vec![
                Message::system("be terse"),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("again"),
            ],
            stream: false,
            params: json!({ "num_predict": 300, "top_k": 40, "stop": "END" })
                .as_object()
                .cloned()
                .unwrap(),
        };
        let v = serde_json::to_value(body_for(&req, false)).unwrap();
        assert_eq!(v["system"], json!("be terse"));
        assert_eq!(v["messages"].as_array().unwrap().len(), 3);
        assert_eq!(v["messages"][1]["role"], json!("assistant"));
        assert_eq!(v["max_tokens"], json!(300));
        assert_eq!(v["top_k"], json!(40));
        assert_eq!(v["stop_sequences"], json!(["END"]));
    }

    #[test]
    fn max_tokens_defaults_when_unset() {
        let req = ChatRequest {
            model: "claude-3-haiku".into(),
            messages: vec![Message::user("hi")],
            stream: true,
            params: Default::default(),
        };
        let body = body_for(&req, true);
        assert_eq!(body.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(body.system.is_none());
    }

    #[test]
    fn only_content_deltas_yield_text() {
        let delta = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(line_text(delta).as_deref(), Some("Hi"));
        assert_eq!(line_text("event: content_block_delta"), None);
        assert_eq!(line_text(r#"data: {"type":"message_stop"}"#), None);
    }
}
