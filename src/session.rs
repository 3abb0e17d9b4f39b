use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{self, ContextError, ContextFile, ContextStats};
use crate::history::{ConversationHistory, Message};
use crate::model::ModelDefinition;
use crate::providers::{ChatRequest, GenerationParams, ProviderError};
use crate::tokens::estimate_tokens;
use crate::window::resolve_window;

/// Sends one outbound request and returns the assistant's text.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Transport(#[from] ProviderError),
    #[error("a request is already in flight")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

/// One conversation: history, attached files, and the active model.
pub struct ChatSession {
    default_model: String,
    model: Option<ModelDefinition>,
    history: ConversationHistory,
    files: Vec<ContextFile>,
    last_context: Vec<Message>,
    stream: bool,
    state: SessionState,
}

impl ChatSession {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            model: None,
            history: ConversationHistory::new(None),
            files: Vec::new(),
            last_context: Vec::new(),
            stream: true,
            state: SessionState::Idle,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Activates a model definition. A non-empty system prompt starts a fresh
    /// history; otherwise the conversation carries over.
    pub fn set_model(&mut self, model: ModelDefinition) {
        if let Some(sys) = model.system_prompt() {
            self.history = ConversationHistory::new(Some(sys));
        }
        info!(model = %model.name, "model definition loaded");
        self.model = Some(model);
    }

    /// Drops every turn, keeping the active model's system prompt.
    pub fn clear_history(&mut self) {
        let sys = self.model.as_ref().and_then(ModelDefinition::system_prompt);
        self.history = ConversationHistory::new(sys);
    }

    pub fn model_name(&self) -> &str {
        self.model.as_ref().map(|m| m.name.as_str()).unwrap_or(&self.default_model)
    }

    pub fn model(&self) -> Option<&ModelDefinition> {
        self.model.as_ref()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn files(&self) -> &[ContextFile] {
        &self.files
    }

    pub fn last_context(&self) -> &[Message] {
        &self.last_context
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn window_size(&self) -> usize {
        let override_size = self.model.as_ref().and_then(ModelDefinition::window_override);
        resolve_window(self.model_name(), override_size)
    }

    pub fn params(&self) -> GenerationParams {
        self.model.as_ref().map(ModelDefinition::generation_params).unwrap_or_default()
    }

    pub fn stats(&self) -> ContextStats {
        let sys = self.model.as_ref().and_then(ModelDefinition::system_prompt);
        context::compute_stats(self.window_size(), &self.files, &self.history, sys)
    }

    /// Attaches a file unless it would push usage past the window. On
    /// rejection the file list is left exactly as it was.
    pub fn attach_file(
        &mut self,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<&ContextFile, SessionError> {
        let file = ContextFile::new(name, content);
        let stats = self.stats();
        let tokens = file.tokens();
        context::check_attach(&stats, tokens)?;
        debug!(file = %file.name, tokens, used = stats.used_tokens, "attached context file");
        self.files.push(file);
        Ok(self.files.last().unwrap_or_else(|| unreachable!("file was just pushed")))
    }

    /// Runs one turn: appends `text`, trims history to what the window leaves
    /// after attached files, and hands the outbound messages to `transport`.
    ///
    /// On transport failure the user message stays in history without a reply
    /// and the session returns to idle.
    pub async fn submit<T>(&mut self, text: &str, transport: &T) -> Result<String, SessionError>
    where
        T: Transport + ?Sized,
    {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        self.state = SessionState::AwaitingResponse;

        let request = self.prepare(text);
        let result = transport.complete(request).await;
        self.state = SessionState::Idle;

        match result {
            Ok(reply) => {
                debug!(tokens = estimate_tokens(&reply), "assistant reply received");
                self.history.append_assistant(reply.clone());
                Ok(reply)
            }
            Err(e) => {
                warn!(error = %e, "turn failed; user message kept");
                Err(e.into())
            }
        }
    }

    fn prepare(&mut self, text: &str) -> ChatRequest {
        let window = self.window_size();
        // Rendered before the user turn is appended so the usage header
        // reflects the state the user saw when asking.
        let context_msg = context::context_message(&self.files, &self.stats());

        self.history.append_user(text);
        let budget = window.saturating_sub(context::file_tokens(&self.files));
        let removed = self.history.trim_to_fit(budget);
        if removed > 0 {
            info!(removed, budget, "trimmed oldest turns to fit context window");
        }

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.extend(context_msg);
        messages.extend_from_slice(self.history.messages());
        self.last_context = messages.clone();

        ChatRequest {
            model: self.model_name().to_string(),
            messages,
            stream: self.stream,
            params: self.params(),
        }
    }
}
