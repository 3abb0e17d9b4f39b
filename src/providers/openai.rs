use super::{
    ChatRequest, ChatResponse, ChatStream, LlmProvider, ProviderError, check_status, sse_data,
    text_stream,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: String,
        api_key: String,
        organization: Option<String>,
        default_model: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().build()?;
        Ok(Self { client, base_url, api_key, organization, default_model })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.bearer_auth(&self.api_key);
        match &self.organization {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize, Debug, PartialEq)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize, Debug, PartialEq)]
struct Body<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
    stream: bool,
}

/// Maps Ollama-style parameters onto the chat completions body.
fn body_for<'a>(req: &'a ChatRequest, stream: bool) -> Body<'a> {
    let frequency_penalty = req
        .param_f64("repeat_penalty")
        .filter(|rp| *rp > 0.0)
        .map(|rp| ((rp - 1.0) * 0.5).min(2.0));
    Body {
        model: &req.model,
        messages: req
            .messages
            .iter()
            .map(|m| Msg { role: m.role.as_str(), content: &m.content })
            .collect(),
        temperature: req.param_f64("temperature").filter(|t| *t > 0.0),
        top_p: req.param_f64("top_p").filter(|p| *p > 0.0),
        max_tokens: req.param_i64("num_predict").filter(|n| *n > 0),
        frequency_penalty,
        seed: req.param_i64("seed").filter(|s| *s > 0),
        stop: req.param_str("stop").into_iter().collect(),
        stream,
    }
}

#[derive(Deserialize)]
struct DeltaMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct DeltaChoice {
    delta: DeltaMsg,
}

#[derive(Deserialize)]
struct Chunk {
    choices: Vec<DeltaChoice>,
}

/// Text carried by one SSE line of a streamed completion.
fn line_text(line: &str) -> Option<String> {
    let chunk: Chunk = serde_json::from_str(sse_data(line)?).ok()?;
    Some(chunk.choices.into_iter().filter_map(|c| c.delta.content).collect())
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        #[derive(Deserialize)]
        struct Model {
            id: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            data: Vec<Model>,
        }
        let resp = self.authed(self.client.get(self.url("models"))).send().await?;
        let resp: Resp = check_status(resp).await?.json().await?;
        Ok(resp.data.into_iter().map(|m| m.id).collect())
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: u32,
            completion_tokens: u32,
            total_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            usage: Option<Usage>,
        }

        let resp = self
            .authed(self.client.post(self.url("chat/completions")))
            .json(&body_for(&req, false))
            .send()
            .await?;
        let resp: Resp = check_status(resp).await?.json().await?;
        let usage = resp.usage.map(|u| super::Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let content = resp.choices.into_iter().next().and_then(|c| c.message.content);
        Ok(ChatResponse { content, usage })
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        let resp = self
            .authed(self.client.post(self.url("chat/completions")))
            .json(&body_for(&req, true))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(text_stream(resp.bytes_stream(), line_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Message;
    use futures_util::{StreamExt, stream};
    use serde_json::json;

    fn request(params: serde_json::Value) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::system("s"), Message::user("u"), Message::assistant("a")],
            stream: true,
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn payload_keeps_every_role_in_order() {
        let v = serde_json::to_value(body_for(&request(json!({})), true)).unwrap();
        let roles: Vec<&str> = v["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(v["stream"], json!(true));
        assert!(v.get("temperature").is_none());
    }

    #[test]
    fn ollama_params_are_mapped() {
        let req = request(json!({
            "temperature": 0.7,
            "num_predict": 2048,
            "repeat_penalty": 1.1,
            "seed": -1,
            "stop": "###"
        }));
        let body = body_for(&req, false);
        assert_eq!(body.temperature, Some(0.7));
        assert_eq!(body.max_tokens, Some(2048));
        assert!((body.frequency_penalty.unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(body.seed, None);
        assert_eq!(body.stop, vec!["###"]);
        assert_eq!(body.messages.len(), 3);
    }

    #[test]
    fn frequency_penalty_is_capped() {
        let req = request(json!({ "repeat_penalty": 9.0 }));
        let body = body_for(&req, false);
        assert_eq!(body.frequency_penalty, Some(2.0));
    }

    #[tokio::test]
    async fn stream_reassembles_frames_split_mid_json() {
        let parts: Vec<Result<Vec<u8>, ProviderError>> = vec![
            Ok(br#"data: {"choices":[{"delta":{"content":"Hello "}}]}"#.to_vec()),
            Ok(b"\n\ndata: {\"choices\":[{\"del".to_vec()),
            Ok(b"ta\":{\"content\":\"world\"}}]}\n\ndata: [DONE]\n\n".to_vec()),
        ];
        let text: String = text_stream(stream::iter(parts), line_text)
            .map(|d| d.unwrap().delta.unwrap_or_default())
            .collect()
            .await;
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn role_only_deltas_carry_no_text() {
        assert_eq!(line_text(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), Some(String::new()));
        assert_eq!(line_text("data: [DONE]"), None);
        assert_eq!(line_text(": keep-alive"), None);
    }
}
