mod cli;
mod config;
mod context;
mod export;
mod history;
mod metrics;
mod model;
mod providers;
mod repl;
mod session;
mod tokens;
mod tools;
mod window;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cli::{ChatArgs, Cli, Commands};
use colored::*;
use config::Config;
use model::ModelDefinition;
use providers::registry::ProviderRegistry;
use repl::ReplOptions;
use session::ChatSession;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat(args) => chat(&mut cfg, args).await?,
        Commands::InitModel { path } => {
            ModelDefinition::write_template(&path)?;
            println!("Wrote model template to {}", path.display());
        }
        Commands::Window { model } => {
            println!("{}", window::window_for(&model));
        }
        Commands::ServeTools { addr } => {
            let registry = Arc::new(tools::ToolRegistry::with_default());
            tools::server::serve(addr, registry).await?;
        }
        Commands::ListModels(cmd) => {
            let registry = ProviderRegistry::from_config(&cfg)?;
            let provider = registry.get(&cmd.provider)?;
            for m in provider.list_models().await? {
                println!("{m}");
            }
        }
        Commands::Providers => {
            let registry = ProviderRegistry::from_config(&cfg)?;
            println!("{}", "Available providers:".bold());
            for key in registry.list() {
                match registry.get(&key) {
                    Ok(p) => println!("- {} ({})", key, p.default_model()),
                    Err(_) => println!("- {key}"),
                }
            }
        }
        Commands::ConfigPath => {
            println!("{}", Config::default_path()?.display());
        }
        Commands::InitConfig => {
            let path = Config::write_example_if_absent()?;
            println!("Wrote example config to {}", path.display());
        }
    }

    Ok(())
}

async fn chat(cfg: &mut Config, args: ChatArgs) -> Result<()> {
    let chat_cfg = cfg.chat();
    let provider_key = args
        .provider
        .or(chat_cfg.provider)
        .unwrap_or_else(|| "openai".to_string());
    if let Some(url) = &args.url {
        cfg.override_base_url(&provider_key, url)?;
    }

    let registry = ProviderRegistry::from_config(cfg)?;
    let provider = registry.get(&provider_key)?;
    let default_model = args
        .default_model
        .unwrap_or_else(|| provider.default_model().to_string());
    let stream = !args.no_stream && chat_cfg.stream.unwrap_or(true);
    info!(provider = provider.name(), model = %default_model, stream, "starting chat");

    let mut session = ChatSession::new(default_model).with_stream(stream);
    match &args.model {
        Some(path) => match ModelDefinition::load(path) {
            Ok(model) => {
                println!("\nLoaded model configuration: {}", model.name);
                if let Some(sys) = model.system_prompt() {
                    println!("System prompt: {sys}");
                }
                session.set_model(model);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load model definition"),
        },
        None => println!("\nNo model definition loaded, using default model"),
    }

    let opts = ReplOptions {
        show_context: args.context,
        metrics_json: args.metrics_json,
        history_file: chat_cfg
            .history_file
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(".gchai_history")),
    };

    if let Some(path) = &args.prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file {}", path.display()))?;
        println!("\nPrompt from {}:\n{prompt}\n", path.display());
        repl::send(&mut session, provider, &opts, &prompt).await;
        println!();
    }

    repl::run(&mut session, provider, &opts).await
}
