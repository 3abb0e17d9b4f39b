use super::{
    ChatRequest, ChatResponse, ChatStream, GenerationParams, LlmProvider, ProviderError,
    check_status, text_stream,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    default_model: String,
}

impl OllamaProvider {
    pub fn new(base_url: String, default_model: String) -> Result<Self, ProviderError> {
        let client = Client::builder().build()?;
        Ok(Self { client, base_url, default_model })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Body<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    stream: bool,
    // Ollama understands the model-definition names as-is
    #[serde(skip_serializing_if = "GenerationParams::is_empty")]
    options: &'a GenerationParams,
}

fn body_for(req: &ChatRequest, stream: bool) -> Body<'_> {
    Body {
        model: &req.model,
        messages: req
            .messages
            .iter()
            .map(|m| Msg { role: m.role.as_str(), content: &m.content })
            .collect(),
        stream,
        options: &req.params,
    }
}

#[derive(Deserialize)]
struct ChunkMsg {
    content: String,
}

#[derive(Deserialize)]
struct Chunk {
    message: Option<ChunkMsg>,
}

/// Message content of one NDJSON line; the final `done` record has none.
fn line_text(line: &str) -> Option<String> {
    let chunk: Chunk = serde_json::from_str(line.trim()).ok()?;
    chunk.message.map(|m| m.content)
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        #[derive(Deserialize)]
        struct Model {
            name: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            models: Vec<Model>,
        }
        let resp = self.client.get(self.url("api/tags")).send().await?;
        let resp: Resp = check_status(resp).await?.json().await?;
        Ok(resp.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        #[derive(Deserialize)]
        struct Resp {
            message: ChunkMsg,
            #[serde(default)]
            prompt_eval_count: Option<u32>,
            #[serde(default)]
            eval_count: Option<u32>,
        }

        let resp = self.client.post(self.url("api/chat")).json(&body_for(&req, false)).send().await?;
        let resp: Resp = check_status(resp).await?.json().await?;
        let usage = match (resp.prompt_eval_count, resp.eval_count) {
            (Some(input), Some(output)) => Some(super::Usage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }),
            _ => None,
        };
        Ok(ChatResponse { content: Some(resp.message.content), usage })
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        let resp = self.client.post(self.url("api/chat")).json(&body_for(&req, true)).send().await?;
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

    #[test]
    fn params_pass_through_as_options() {
        let req = ChatRequest {
            model: "llama3.1".into(),
            messages: vec![Message::system("s"), Message::user("u")],
            stream: true,
            params: json!({ "num_ctx": 8192, "mirostat": 2 }).as_object().cloned().unwrap(),
        };
        let v = serde_json::to_value(body_for(&req, true)).unwrap();
        assert_eq!(v["options"], json!({ "num_ctx": 8192, "mirostat": 2 }));
        assert_eq!(v["messages"][0]["role"], json!("system"));

        let bare = ChatRequest { params: Default::default(), ..req };
        let v = serde_json::to_value(body_for(&bare, false)).unwrap();
        assert!(v.get("options").is_none());
    }

    #[tokio::test]
    async fn ndjson_lines_split_across_chunks_are_concatenated() {
        let parts: Vec<Result<Vec<u8>, ProviderError>> = vec![
            Ok(b"{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"con".to_vec()),
            Ok(b"tent\":\"lo\"},\"done\":false}\n\n{\"done\":true}\nnot json".to_vec()),
        ];
        let text: String = text_stream(stream::iter(parts), line_text)
            .map(|d| d.unwrap().delta.unwrap_or_default())
            .collect()
            .await;
        assert_eq!(text, "Hello");
    }
}
