use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

use crate::history::{ConversationHistory, Message, Role};
use crate::tokens::estimate_tokens;

/// Opening line of the synthetic user message that carries attached files.
pub const CONTEXT_PREAMBLE: &str =
    "Here is the current context. Use this information to answer my next question:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error(
        "adding this file ({file_tokens} tokens) would exceed the context window size of {window_size} tokens (currently using {used_tokens} tokens)"
    )]
    BudgetExceeded {
        file_tokens: usize,
        window_size: usize,
        used_tokens: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    pub name: String,
    pub content: String,
    pub language: String,
}

impl ContextFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let language = detect_language(&name).to_string();
        Self { name, content: content.into(), language }
    }

    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextStats {
    pub window_size: usize,
    pub used_tokens: usize,
    pub remaining_tokens: usize,
    pub usage_percent: f64,
}

impl ContextStats {
    pub fn from_usage(window_size: usize, used_tokens: usize) -> Self {
        Self {
            window_size,
            used_tokens,
            remaining_tokens: window_size.saturating_sub(used_tokens),
            usage_percent: used_tokens as f64 / window_size as f64 * 100.0,
        }
    }

    pub fn is_near_full(&self) -> bool {
        self.usage_percent > 90.0
    }
}

pub fn file_tokens(files: &[ContextFile]) -> usize {
    files.iter().map(ContextFile::tokens).sum()
}

/// Usage across attached files, history and the system prompt.
///
/// `system_prompt` is only counted when `history` does not already open with a
/// system message, so the prompt is never counted twice.
pub fn compute_stats(
    window_size: usize,
    files: &[ContextFile],
    history: &ConversationHistory,
    system_prompt: Option<&str>,
) -> ContextStats {
    let mut used = file_tokens(files) + history.estimate_tokens();
    if history.system_prompt().is_none()
        && let Some(sys) = system_prompt
    {
        used += estimate_tokens(sys);
    }
    ContextStats::from_usage(window_size, used)
}

/// Accepts a candidate costing `candidate_tokens` iff it still fits the window.
pub fn check_attach(stats: &ContextStats, candidate_tokens: usize) -> Result<(), ContextError> {
    if stats.used_tokens + candidate_tokens > stats.window_size {
        return Err(ContextError::BudgetExceeded {
            file_tokens: candidate_tokens,
            window_size: stats.window_size,
            used_tokens: stats.used_tokens,
        });
    }
    Ok(())
}

pub fn detect_language(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "go" => "Go",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "py" => "Python",
        "java" => "Java",
        "c" => "C",
        "cpp" | "cc" => "C++",
        "rs" => "Rust",
        "md" => "Markdown",
        _ => "plaintext",
    }
}

/// Reads a file for attachment, returning its base name and text.
pub fn load_file(path: &Path) -> Result<(String, String)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read file {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((name, content))
}

/// Renders attached files as one markdown block headed by current usage.
/// Returns `None` when nothing is attached.
pub fn render_files(files: &[ContextFile], stats: &ContextStats) -> Option<String> {
    if files.is_empty() {
        return None;
    }
    let mut b = String::new();
    b.push_str(&format!(
        "Context Window Usage: {:.1}% ({}/{} tokens, {} remaining)\n\n",
        stats.usage_percent, stats.used_tokens, stats.window_size, stats.remaining_tokens
    ));
    b.push_str("Files in context:\n\n");
    for file in files {
        b.push_str(&format!(
            "File: {} (Language: {}, ~{} tokens)\n",
            file.name,
            file.language,
            file.tokens()
        ));
        b.push_str(&format!("```{}\n", file.language.to_lowercase()));
        b.push_str(&file.content);
        b.push_str("\n```\n\n");
    }
    Some(b)
}

pub fn context_message(files: &[ContextFile], stats: &ContextStats) -> Option<Message> {
    render_files(files, stats).map(|body| Message::user(format!("{CONTEXT_PREAMBLE}\n\n{body}")))
}

/// Estimated tokens of an outbound message list, with the attached-files
/// message split out from ordinary user turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenBreakdown {
    pub system: usize,
    pub context: usize,
    pub user: usize,
    pub assistant: usize,
}

impl TokenBreakdown {
    pub fn of(messages: &[Message]) -> Self {
        let mut out = Self::default();
        for m in messages {
            let t = m.tokens();
            match m.role {
                Role::System => out.system += t,
                Role::User if m.content.starts_with(CONTEXT_PREAMBLE) => out.context += t,
                Role::User => out.user += t,
                Role::Assistant => out.assistant += t,
            }
        }
        out
    }

    pub fn total(&self) -> usize {
        self.system + self.context + self.user + self.assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn costing(n: usize) -> String {
        "abc ".repeat(n)
    }

    #[test]
    fn scenario_a_usage_tracks_appends() {
        let mut h = ConversationHistory::new(None);
        h.append_user(costing(30));
        let s = compute_stats(100, &[], &h, None);
        assert_eq!((s.used_tokens, s.remaining_tokens), (30, 70));

        h.append_assistant(costing(20));
        let s = compute_stats(100, &[], &h, None);
        assert_eq!((s.used_tokens, s.remaining_tokens), (50, 50));
        assert!((s.usage_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn system_prompt_is_not_counted_twice() {
        let sys = costing(10);
        let h = ConversationHistory::new(Some(&sys));
        assert_eq!(compute_stats(100, &[], &h, Some(&sys)).used_tokens, 10);

        let bare = ConversationHistory::new(None);
        assert_eq!(compute_stats(100, &[], &bare, Some(&sys)).used_tokens, 10);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let mut h = ConversationHistory::new(None);
        h.append_user(costing(150));
        let s = compute_stats(100, &[], &h, None);
        assert_eq!(s.remaining_tokens, 0);
        assert!(s.usage_percent > 100.0);
        assert!(s.is_near_full());
    }

    #[test]
    fn files_count_toward_usage() {
        let files = vec![ContextFile::new("a.rs", costing(12)), ContextFile::new("b.txt", costing(8))];
        let h = ConversationHistory::new(None);
        assert_eq!(compute_stats(1000, &files, &h, None).used_tokens, 20);
    }

    #[test]
    fn scenario_c_attach_rejected_when_over_window() {
        let stats = ContextStats::from_usage(100, 50);
        let err = check_attach(&stats, 60).unwrap_err();
        assert_eq!(
            err,
            ContextError::BudgetExceeded { file_tokens: 60, window_size: 100, used_tokens: 50 }
        );
        assert!(check_attach(&stats, 50).is_ok());
    }

    #[test]
    fn language_from_extension() {
        assert_eq!(detect_language("main.go"), "Go");
        assert_eq!(detect_language("lib.RS"), "Rust");
        assert_eq!(detect_language("x.cc"), "C++");
        assert_eq!(detect_language("README"), "plaintext");
        assert_eq!(detect_language("notes.txt"), "plaintext");
    }

    #[test]
    fn context_message_lists_each_file() {
        let files = vec![ContextFile::new("main.rs", "fn main() {}")];
        let stats = ContextStats::from_usage(4096, 3);
        let msg = context_message(&files, &stats).unwrap();
        assert_eq!(msg.role, Role::User);
        assert!(msg.content.starts_with(CONTEXT_PREAMBLE));
        assert!(msg.content.contains("File: main.rs (Language: Rust"));
        assert!(msg.content.contains("```rust\nfn main() {}\n```"));
        assert!(context_message(&[], &stats).is_none());
    }

    #[test]
    fn breakdown_separates_context_from_user_turns() {
        let files = vec![ContextFile::new("a.md", costing(40))];
        let ctx = context_message(&files, &ContextStats::from_usage(4096, 40)).unwrap();
        let msgs = vec![
            Message::system(costing(5)),
            ctx.clone(),
            Message::user(costing(7)),
            Message::assistant(costing(9)),
        ];
        let b = TokenBreakdown::of(&msgs);
        assert_eq!(b.system, 5);
        assert_eq!(b.context, ctx.tokens());
        assert_eq!(b.user, 7);
        assert_eq!(b.assistant, 9);
        assert_eq!(b.total(), 5 + ctx.tokens() + 16);
    }

    #[test]
    fn load_file_returns_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# hi").unwrap();
        let (name, content) = load_file(&path).unwrap();
        assert_eq!(name, "notes.md");
        assert_eq!(content, "# hi");
        assert!(load_file(&dir.path().join("missing.md")).is_err());
    }
}
