use std::borrow::Cow::{self, Borrowed, Owned};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use futures_util::StreamExt;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tracing::{debug, warn};

use crate::context::{self, ContextStats, TokenBreakdown};
use crate::export::{self, DEFAULT_DUMP_PATH, Dump};
use crate::history::{ConversationHistory, Role};
use crate::metrics::PerfMetrics;
use crate::model::ModelDefinition;
use crate::providers::{ChatRequest, LlmProvider, ProviderError};
use crate::session::{ChatSession, SessionError, Transport};
use crate::tokens::estimate_tokens;

const COMMANDS: &[&str] = &[
    "/help", "/load", "/model", "/status", "/history", "/clear", "/dump", "exit",
];

/// `num_predict` assumed when the model definition leaves it unset.
const DEFAULT_NUM_PREDICT: i64 = 2048;

#[derive(Clone)]
struct ReplHelper {
    commands: Vec<String>,
}

impl ReplHelper {
    fn new() -> Self {
        Self { commands: COMMANDS.iter().map(|c| c.to_string()).collect() }
    }
}

impl Helper for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        if !line.starts_with('/') || line.contains(' ') {
            return Ok((0, vec![]));
        }
        let candidates = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair { display: cmd.clone(), replacement: cmd.clone() })
            .collect();
        Ok((0, candidates))
    }
}

impl Highlighter for ReplHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with('/') {
            Owned(line.bright_cyan().to_string())
        } else {
            Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if line.starts_with('/') && !line.contains(' ') {
            self.commands
                .iter()
                .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
                .map(|cmd| cmd[line.len()..].to_string())
        } else {
            None
        }
    }
}

impl Validator for ReplHelper {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Load(String),
    Model(String),
    Status,
    History,
    Clear,
    Dump(Option<String>),
    Exit,
    Unknown(String),
    Prompt(String),
}

/// Classifies one input line; `None` for blank input.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "exit" {
        return Some(Command::Exit);
    }
    if !line.starts_with('/') {
        return Some(Command::Prompt(line.to_string()));
    }
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    let cmd = match cmd {
        "/help" => Command::Help,
        "/load" => Command::Load(arg.to_string()),
        "/model" => Command::Model(arg.to_string()),
        "/status" => Command::Status,
        "/history" => Command::History,
        "/clear" => Command::Clear,
        "/dump" => Command::Dump(Some(arg.to_string()).filter(|a| !a.is_empty())),
        _ => Command::Unknown(cmd.to_string()),
    };
    Some(cmd)
}

pub fn help_text() -> String {
    [
        "Available commands:",
        "  /help           - Show this help message",
        "  /load <file>    - Load a file into the context",
        "  /model <file>   - Load a model definition file",
        "  /status         - Show current model and context status",
        "  /history        - Show conversation history",
        "  /clear          - Clear conversation history",
        "  /dump [path]    - Write the last context sent (default context-dump.txt)",
        "  exit            - Exit the program",
        "",
    ]
    .join("\n")
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

/// Everything `-c` shows before asking to submit.
pub fn render_preview(req: &ChatRequest, window_size: usize) -> String {
    let mut out = String::from("\nComplete request to be sent:\n============================\n");
    out.push_str(&format!("Model: {}\n", req.model));
    if let Some(sys) = req.messages.iter().find(|m| m.role == Role::System) {
        out.push_str(&format!("System Prompt: {}\n", sys.content));
    }
    if !req.params.is_empty() {
        out.push_str("\nActive Parameters:\n");
        for (k, v) in &req.params {
            out.push_str(&format!("  {k}: {v}\n"));
        }
    }

    let b = TokenBreakdown::of(&req.messages);
    let num_predict = req.param_i64("num_predict").filter(|n| *n > 0).unwrap_or(DEFAULT_NUM_PREDICT);
    let expected = (b.user * 2) as i64;
    if num_predict < expected {
        out.push_str(&format!(
            "\nWarning: num_predict ({num_predict}) may be too small for expected response size ({expected} tokens)\n"
        ));
        out.push_str("   Consider increasing num_predict in the model definition if responses are being truncated.\n");
    }

    let usage = ContextStats::from_usage(window_size, b.total());
    out.push_str("\nEstimated Token Usage:\n---------------------\n");
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
    if usage.is_near_full() {
        out.push_str(&format!(
            "\nWarning: Request is using {:.1}% of the context window!\n",
            usage.usage_percent
        ));
    }

    out.push_str("\nConversation Context and Messages:\n--------------------------------\n");
    for (i, m) in req.messages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("[{}]:\n{}\n", m.role.title(), m.content));
    }
    out
}

pub fn render_status(session: &ChatSession) -> String {
    let mut out = String::from("\nCurrent Status:\n-------------\n");
    match session.model() {
        Some(m) => render_model(&mut out, m),
        None => out.push_str(&format!("Model: {} (default)\n", session.model_name())),
    }

    let stats = session.stats();
    let roles = session.history().role_tokens();
    let file_tokens = context::file_tokens(session.files());
    out.push_str("\nToken Usage:\n-----------\n");
    if let Some(sys) = session.history().system_prompt() {
        out.push_str(&format!("System Prompt:   {:>7} tokens\n", estimate_tokens(sys)));
    }
    if !session.files().is_empty() {
        out.push_str(&format!("Context Files:   {:>7} tokens\n", file_tokens));
    }
    if roles.user > 0 || roles.assistant > 0 {
        out.push_str(&format!("User Messages:   {:>7} tokens\n", roles.user));
        out.push_str(&format!("AI Responses:    {:>7} tokens\n", roles.assistant));
    }
    out.push_str(&format!("\nTotal Used:      {:>7} tokens\n", stats.used_tokens));
    out.push_str(&format!("Window Size:     {:>7} tokens\n", stats.window_size));
    out.push_str(&format!("Remaining:       {:>7} tokens\n", stats.remaining_tokens));
    out.push_str(&format!("Window Usage:    {:>7.1}%\n", stats.usage_percent));
    if stats.is_near_full() {
        out.push_str(&format!(
            "\nWarning: Currently using {:.1}% of the context window!\n",
            stats.usage_percent
        ));
    }

    if session.files().is_empty() {
        out.push_str("\nNo context files loaded\n");
    } else {
        out.push_str("\nLoaded Context Files:\n");
        for f in session.files() {
            out.push_str(&format!("  - {} ({}): {} tokens\n", f.name, f.language, f.tokens()));
        }
    }

    let history = session.history();
    if history.is_empty() {
        out.push_str("\nNo conversation history\n");
    } else {
        out.push_str(&format!("\nConversation History: {} exchanges", history.exchange_count()));
        if history.system_prompt().is_some() {
            out.push_str(" (with system prompt)");
        }
        out.push_str(&format!("\nHistory Size: {} tokens\n", history.estimate_tokens()));
    }
    out
}

fn render_model(out: &mut String, m: &ModelDefinition) {
    out.push_str(&format!("Model: {}\n", m.name));
    if let Some(sys) = m.system_prompt() {
        out.push_str(&format!("System Prompt: {sys}\n"));
    }
    let params = m.parameters.active();
    if !params.is_empty() {
        out.push_str("\nParameters:\n");
        for p in params {
            out.push_str(&format!("  {}: {}\n", p.name, p.value));
        }
    }
    let options = m.options.active();
    if !options.is_empty() {
        out.push_str("\nOptions:\n");
        for p in options {
            out.push_str(&format!("  {}: {}\n", p.name, p.value));
        }
    }
}

pub fn render_history(history: &ConversationHistory) -> String {
    let mut out = String::from("\nConversation History:\n");
    for m in history.messages() {
        out.push_str(&format!("{}: {}\n", m.role.title(), m.content));
    }
    out.push_str(&format!("\nEstimated tokens: {}\n", history.estimate_tokens()));
    out
}

/// Sends turns through a provider, printing the reply and metrics.
pub struct ConsoleTransport<'a> {
    provider: &'a dyn LlmProvider,
    window_size: usize,
    show_context: bool,
    metrics_json: bool,
}

impl<'a> ConsoleTransport<'a> {
    pub fn new(provider: &'a dyn LlmProvider, window_size: usize, opts: &ReplOptions) -> Self {
        Self {
            provider,
            window_size,
            show_context: opts.show_context,
            metrics_json: opts.metrics_json,
        }
    }

    fn confirm(&self) -> Result<bool, ProviderError> {
        print!("\nReady to submit? (yes/no): ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(is_affirmative(&answer))
    }
}

#[async_trait]
impl<'a> Transport for ConsoleTransport<'a> {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
        if self.show_context {
            print!("{}", render_preview(&request, self.window_size));
            if !self.confirm()? {
                return Err(ProviderError::Cancelled);
            }
            println!("\nSubmitting request...");
        }

        let mut metrics = PerfMetrics::start();
        let used = TokenBreakdown::of(&request.messages).total();
        metrics.set_context(ContextStats::from_usage(self.window_size, used));

        let reply = if request.stream {
            let mut stream = self.provider.chat_stream(request).await?;
            let mut acc = String::new();
            while let Some(chunk) = stream.next().await.transpose()? {
                if let Some(text) = chunk.delta {
                    print!("{text}");
                    std::io::stdout().flush()?;
                    metrics.add_text(&text);
                    acc.push_str(&text);
                }
            }
            println!();
            acc
        } else {
            let resp = self.provider.chat(request).await?;
            if let Some(u) = &resp.usage {
                debug!(input = u.input_tokens, output = u.output_tokens, total = u.total_tokens, "provider usage");
            }
            let content = resp.content.unwrap_or_default();
            println!("{content}");
            metrics.add_text(&content);
            content
        };
        metrics.finish();

        if self.metrics_json {
            println!("{}", metrics.to_json()?);
        } else {
            print!("{metrics}");
        }
        Ok(reply)
    }
}

pub struct ReplOptions {
    pub show_context: bool,
    pub metrics_json: bool,
    pub history_file: PathBuf,
}

/// Submits one turn, reporting failures without ending the session.
pub async fn send(session: &mut ChatSession, provider: &dyn LlmProvider, opts: &ReplOptions, text: &str) {
    let transport = ConsoleTransport::new(provider, session.window_size(), opts);
    match session.submit(text, &transport).await {
        Ok(_) => {}
        Err(SessionError::Transport(ProviderError::Cancelled)) => {
            println!("Request cancelled. Type your next prompt or command.");
        }
        Err(e) => eprintln!("{} {e}", "Error:".red()),
    }
}

fn load_context_file(session: &mut ChatSession, arg: &str) -> Result<()> {
    let (name, content) = context::load_file(Path::new(arg))?;
    let file = session.attach_file(name, content)?;
    println!("Loaded file: {} (~{} tokens)", file.name, file.tokens());
    Ok(())
}

fn load_model(session: &mut ChatSession, arg: &str) -> Result<()> {
    let model = ModelDefinition::load(Path::new(arg))?;
    println!("Loaded model: {}", model.name);
    if let Some(sys) = model.system_prompt() {
        println!("System prompt: {sys}");
    }
    session.set_model(model);
    Ok(())
}

fn dump(session: &ChatSession, path: Option<&str>) -> Result<String> {
    let path = path.unwrap_or(DEFAULT_DUMP_PATH);
    let doc = Dump {
        model_name: session.model_name(),
        model: session.model(),
        messages: session.last_context(),
        window_size: session.window_size(),
    };
    export::save(Path::new(path), &doc)?;
    Ok(path.to_string())
}

pub async fn run(session: &mut ChatSession, provider: &dyn LlmProvider, opts: &ReplOptions) -> Result<()> {
    let mut rl = Editor::new()?;
    rl.set_helper(Some(ReplHelper::new()));
    if let Err(e) = rl.load_history(&opts.history_file) {
        debug!(path = %opts.history_file.display(), error = %e, "no readline history loaded");
    }

    println!("{}", "Interactive AI Assistant".bold());
    println!("{}", help_text());

    loop {
        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let Some(cmd) = parse_line(&line) else {
            continue;
        };
        let _ = rl.add_history_entry(line.trim());

        match cmd {
            Command::Exit => {
                println!("Goodbye!");
                break;
            }
            Command::Help => println!("{}", help_text()),
            Command::Load(arg) if arg.is_empty() => println!("usage: /load <file>"),
            Command::Load(arg) => {
                if let Err(e) = load_context_file(session, &arg) {
                    println!("{} {e:#}", "Error loading file:".red());
                }
            }
            Command::Model(arg) if arg.is_empty() => println!("usage: /model <file>"),
            Command::Model(arg) => {
                if let Err(e) = load_model(session, &arg) {
                    println!("{} {e:#}", "Error loading model:".red());
                }
            }
            Command::Status => print!("{}", render_status(session)),
            Command::History => print!("{}", render_history(session.history())),
            Command::Clear => {
                session.clear_history();
                println!("Conversation history cleared.");
            }
            Command::Dump(path) => match dump(session, path.as_deref()) {
                Ok(p) => println!("Context dumped to {p}"),
                Err(e) => println!("{} {e:#}", "Error:".red()),
            },
            Command::Unknown(c) => println!("Unknown command: {c} (try /help)"),
            Command::Prompt(text) => {
                println!();
                send(session, provider, opts, &text).await;
                println!();
            }
        }
    }

    if let Err(e) = rl.save_history(&opts.history_file) {
        warn!(path = %opts.history_file.display(), error = %e, "failed to save readline history");
    }
    Ok(())
}
