use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tokens::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Capitalised label for transcripts, e.g. `[User]`.
    pub fn title(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Estimated tokens per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleTokens {
    pub system: usize,
    pub user: usize,
    pub assistant: usize,
}

impl RoleTokens {
    pub fn total(&self) -> usize {
        self.system + self.user + self.assistant
    }
}

/// Ordered conversation. Holds at most one system message, and only at index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let messages = match system_prompt {
            Some(sys) if !sys.is_empty() => vec![Message::system(sys)],
            _ => Vec::new(),
        };
        Self { messages }
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Completed user/assistant exchanges, not counting the system message.
    pub fn exchange_count(&self) -> usize {
        let offset = usize::from(self.system_prompt().is_some());
        (self.messages.len() - offset) / 2
    }

    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(Message::tokens).sum()
    }

    pub fn role_tokens(&self) -> RoleTokens {
        let mut out = RoleTokens::default();
        for m in &self.messages {
            let t = m.tokens();
            match m.role {
                Role::System => out.system += t,
                Role::User => out.user += t,
                Role::Assistant => out.assistant += t,
            }
        }
        out
    }

    /// Drops the oldest user/assistant pairs until the estimate fits `token_limit`.
    ///
    /// The leading system message is never removed but still counts toward the
    /// limit. At least two non-system messages are left in place when more than
    /// two were present, so the result may remain over budget. Returns how many
    /// messages were removed.
    pub fn trim_to_fit(&mut self, token_limit: usize) -> usize {
        let mut total = self.estimate_tokens();
        if total <= token_limit {
            return 0;
        }

        let pinned = usize::from(self.system_prompt().is_some());
        let mut removed = 0;
        while self.messages.len() - pinned > 2 && total > token_limit {
            let pair: Vec<Message> = self.messages.drain(pinned..pinned + 2).collect();
            total -= pair.iter().map(Message::tokens).sum::<usize>();
            removed += pair.len();
        }
        removed
    }
}
