//! `/dump`: writes the last outbound context with a per-role token summary.

use anyhow::{Result, bail};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::context::{ContextStats, TokenBreakdown};
use crate::history::Message;
use crate::model::{ModelDefinition, ParamField};

pub const DEFAULT_DUMP_PATH: &str = "context-dump.txt";

/// Everything a dump shows, borrowed from the session.
pub struct Dump<'a> {
    pub model_name: &'a str,
    pub model: Option<&'a ModelDefinition>,
    pub messages: &'a [Message],
    pub window_size: usize,
}

impl Dump<'_> {
    fn breakdown(&self) -> TokenBreakdown {
        TokenBreakdown::of(self.messages)
    }

    fn usage(&self) -> ContextStats {
        ContextStats::from_usage(self.window_size, self.breakdown().total())
    }

    fn params(&self) -> Vec<ParamField> {
        self.model.map(|m| m.parameters.active()).unwrap_or_default()
    }

    fn system(&self) -> Option<&str> {
        self.model.and_then(ModelDefinition::system_prompt)
    }
}

/// Writes the dump to `path`, picking the format from its extension.
pub fn save(path: &Path, dump: &Dump<'_>) -> Result<()> {
    if dump.messages.is_empty() {
        bail!("no context available - send a prompt first");
    }
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let out = match ext {
        "json" => render_json(dump)?,
        "html" => render_html(dump),
        _ => render_text(dump),
    };
    fs::write(path, out)?;
    Ok(())
}

fn render_text(dump: &Dump<'_>) -> String {
    let mut out = String::from("Last Context Sent to LLM\n======================\n\n");
    match dump.model {
        Some(_) => out.push_str(&format!("Model: {}\n", dump.model_name)),
        None => out.push_str(&format!("Model: {} (default)\n", dump.model_name)),
    }
    if let Some(sys) = dump.system() {
        out.push_str(&format!("System Prompt: {sys}\n"));
    }
    let params = dump.params();
    if !params.is_empty() {
        out.push_str("\nActive Parameters:\n");
        for p in &params {
            out.push_str(&format!("  {}: {}\n", p.name, p.value));
        }
    }

    out.push_str("\nMessages:\n---------\n");
    for (i, m) in dump.messages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("[{}] ({} tokens):\n{}\n", m.role.title(), m.tokens(), m.content));
    }

    let b = dump.breakdown();
    let usage = dump.usage();
    out.push_str("\nToken Usage Summary:\n-----------------\n");
    if b.system > 0 {
        out.push_str(&format!("System Messages: {:>7} tokens\n", b.system));
    }
    if b.context > 0 {
        out.push_str(&format!("Loaded Context:  {:>7} tokens\n", b.context));
    }
    out.push_str(&format!("User Messages:   {:>7} tokens\n", b.user));
    out.push_str(&format!("AI Responses:    {:>7} tokens\n", b.assistant));
    out.push_str(&format!("Total Size:      {:>7} tokens\n", b.total()));
    out.push_str(&format!("Context Window:  {:>7} tokens\n", usage.window_size));
    out.push_str(&format!("Window Usage:    {:>7.1}%\n", usage.usage_percent));
    out
}

#[derive(Serialize)]
struct JsonDump<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    parameters: serde_json::Map<String, serde_json::Value>,
    messages: &'a [Message],
    tokens: TokenBreakdown,
    window: ContextStats,
}

fn render_json(dump: &Dump<'_>) -> Result<String> {
    let doc = JsonDump {
        model: dump.model_name,
        system_prompt: dump.system(),
        parameters: dump.params().into_iter().map(|p| (p.name.to_string(), p.value)).collect(),
        messages: dump.messages,
        tokens: dump.breakdown(),
        window: dump.usage(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn render_html(dump: &Dump<'_>) -> String {
    let mut out = String::from(
        "<html><head><meta charset=\"utf-8\"><title>gchai context dump</title></head><body>\n",
    );
    out.push_str(&format!("<h2>{}</h2>\n", html_escape::encode_text(dump.model_name)));
    if let Some(sys) = dump.system() {
        out.push_str(&format!("<p><b>System Prompt:</b> {}</p>\n", html_escape::encode_text(sys)));
    }
    for m in dump.messages {
        out.push_str(&format!(
            "<h3>{} ({} tokens)</h3>\n<pre>{}</pre>\n",
            m.role.title(),
            m.tokens(),
            html_escape::encode_text(&m.content)
        ));
    }
    let b = dump.breakdown();
    let usage = dump.usage();
    out.push_str("<table>\n");
    for (label, n) in [
        ("System Messages", b.system),
        ("Loaded Context", b.context),
        ("User Messages", b.user),
        ("AI Responses", b.assistant),
        ("Total Size", b.total()),
        ("Context Window", usage.window_size),
    ] {
        out.push_str(&format!("<tr><td>{label}</td><td>{n}</td></tr>\n"));
    }
    out.push_str(&format!(
        "<tr><td>Window Usage</td><td>{:.1}%</td></tr>\n</table>\n",
        usage.usage_percent
    ));
    out.push_str("</body></html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextFile, context_message};

    fn sample_messages() -> Vec<Message> {
        let files = vec![ContextFile::new("a.rs", "fn a() {}")];
        let ctx = context_message(&files, &ContextStats::from_usage(4096, 3)).unwrap();
        vec![
            ctx,
            Message::system("be <brief>"),
            Message::user("what does a do?"),
            Message::assistant("nothing"),
            Message::user("sure?"),
        ]
    }

    fn model() -> ModelDefinition {
        let mut m = ModelDefinition { name: "llama3".into(), system: "be <brief>".into(), ..Default::default() };
        m.parameters.temperature = 0.3;
        m.options.num_ctx = 2048;
        m
    }

    #[test]
    fn text_dump_has_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.txt");
        let msgs = sample_messages();
        let m = model();
        let dump = Dump { model_name: "llama3", model: Some(&m), messages: &msgs, window_size: 2048 };
        save(&path, &dump).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Last Context Sent to LLM"));
        assert!(text.contains("Model: llama3\n"));
        assert!(text.contains("System Prompt: be <brief>"));
        assert!(text.contains("  temperature: 0.3"));
        assert!(text.contains("[Assistant] (1 tokens):\nnothing"));
        assert!(text.contains("Loaded Context:"));
        assert!(text.contains("Context Window:     2048 tokens"));
    }

    #[test]
    fn default_model_is_marked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump");
        let msgs = vec![Message::user("hi")];
        let dump = Dump { model_name: "gpt-4o", model: None, messages: &msgs, window_size: 128_000 };
        save(&path, &dump).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Model: gpt-4o (default)"));
        assert!(!text.contains("Active Parameters"));
        assert!(!text.contains("System Messages"));
    }

    #[test]
    fn json_dump_carries_breakdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let msgs = sample_messages();
        let m = model();
        let dump = Dump { model_name: "llama3", model: Some(&m), messages: &msgs, window_size: 2048 };
        save(&path, &dump).unwrap();

        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let expected = TokenBreakdown::of(&msgs);
        assert_eq!(v["tokens"]["user"], expected.user);
        assert_eq!(v["tokens"]["context"], expected.context);
        assert_eq!(v["window"]["window_size"], 2048);
        assert_eq!(v["parameters"]["temperature"], 0.3);
        assert_eq!(v["messages"].as_array().unwrap().len(), msgs.len());
    }

    #[test]
    fn html_dump_escapes_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.html");
        let msgs = sample_messages();
        let m = model();
        let dump = Dump { model_name: "llama3", model: Some(&m), messages: &msgs, window_size: 2048 };
        save(&path, &dump).unwrap();
        let html = fs::read_to_string(&path).unwrap();
        assert!(html.contains("be &lt;brief&gt;"));
        assert!(!html.contains("<brief>"));
    }

    #[test]
    fn empty_context_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dump = Dump { model_name: "x", model: None, messages: &[], window_size: 4096 };
        assert!(save(&dir.path().join("d.txt"), &dump).is_err());
    }
}
