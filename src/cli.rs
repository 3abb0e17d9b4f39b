use clap::{ArgAction, Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gchai", author, version, about = "Chat with LLMs while tracking context-window usage", long_about = None)]
pub struct Cli {
    /// Optional path to a config file (toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[allow(clippy::large_enum_variant)]
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session
    Chat(ChatArgs),
    /// Write a model definition template
    InitModel {
        /// Where to write the template
        path: PathBuf,
    },
    /// Print the context window size used for a model name
    Window {
        model: String,
    },
    /// Run the JSON-RPC tool server
    ServeTools {
        #[arg(long, default_value = "127.0.0.1:8081")]
        addr: SocketAddr,
    },
    /// List models for a provider
    ListModels(ListModelsArgs),
    /// Show available providers
    Providers,
    /// Print the default config path
    ConfigPath,
    /// Create an example config file if missing
    InitConfig,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Provider key, e.g. openai, anthropic, ollama; defaults to [chat].provider
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Base URL of the provider API; a bare OpenAI host gets `/v1` appended
    #[arg(long)]
    pub url: Option<String>,

    /// Path to a model definition file
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Model used when no definition file is loaded
    #[arg(long)]
    pub default_model: Option<String>,

    /// Path to a file sent as the first prompt
    #[arg(long, value_name = "FILE")]
    pub prompt: Option<PathBuf>,

    /// Show the full request and ask before sending it
    #[arg(short = 'c', long)]
    pub context: bool,

    /// Wait for complete responses instead of streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Print performance metrics as JSON
    #[arg(long)]
    pub metrics_json: bool,
}

#[derive(Args, Debug)]
pub struct ListModelsArgs {
    /// Provider key, e.g. openai, ollama
    #[arg(short, long, default_value = "openai")]
    pub provider: String,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::try_parse_from([
            "gchai", "chat", "-c", "--model", "m.json", "--provider", "ollama", "--no-stream", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "debug");
        let Commands::Chat(args) = cli.command else { panic!("expected chat") };
        assert!(args.context);
        assert!(args.no_stream);
        assert!(!args.metrics_json);
        assert_eq!(args.model, Some(PathBuf::from("m.json")));
        assert_eq!(args.provider.as_deref(), Some("ollama"));
    }

    #[test]
    fn serve_tools_defaults_to_loopback() {
        let cli = Cli::try_parse_from(["gchai", "serve-tools"]).unwrap();
        assert_eq!(cli.log_level(), "warn");
        let Commands::ServeTools { addr } = cli.command else { panic!("expected serve-tools") };
        assert_eq!(addr, "127.0.0.1:8081".parse().unwrap());
    }

    #[test]
    fn window_takes_a_model_name() {
        let cli = Cli::try_parse_from(["gchai", "window", "gpt-4o"]).unwrap();
        assert!(matches!(cli.command, Commands::Window { model } if model == "gpt-4o"));
    }
}
