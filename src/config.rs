use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub openai: Option<OpenAiConfig>,
    pub anthropic: Option<AnthropicConfig>,
    pub ollama: Option<OllamaConfig>,
    pub chat: Option<ChatConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OllamaConfig {
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatConfig {
    /// Provider key used when `--provider` is not given
    pub provider: Option<String>,
    pub stream: Option<bool>,
    /// Readline history file; defaults to the temp dir
    pub history_file: Option<String>,
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(p) = path {
            let text = fs::read_to_string(p).with_context(|| format!("reading config at {p}"))?;
            return parse(&text).with_context(|| "parsing config");
        }
        let default = Self::default_path()?;
        if default.exists() {
            let text = fs::read_to_string(&default)
                .with_context(|| format!("reading config at {}", default.display()))?;
            parse(&text).with_context(|| "parsing config")
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| anyhow!("cannot resolve config dir"))?;
        Ok(base.join("gchai").join("config.toml"))
    }

    pub fn write_example_if_absent() -> Result<PathBuf> {
        let path = Self::default_path()?;
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, EXAMPLE)?;
        }
        Ok(path)
    }

    /// Points `provider` at `url`, e.g. from `--url`. A bare OpenAI host gets
    /// the `/v1` API root appended.
    pub fn override_base_url(&mut self, provider: &str, url: &str) -> Result<()> {
        match provider {
            "openai" => {
                self.openai.get_or_insert_with(Default::default).base_url = Some(openai_root(url))
            }
            "anthropic" => {
                self.anthropic.get_or_insert_with(Default::default).base_url = Some(url.to_string())
            }
            "ollama" => {
                self.ollama.get_or_insert_with(Default::default).base_url = Some(url.to_string())
            }
            other => return Err(anyhow!("unknown provider: {other}")),
        }
        Ok(())
    }

    pub fn chat(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }
}

const EXAMPLE: &str = r#"# gchai config (TOML)

[openai]
# api_key can be omitted to use env var OPENAI_API_KEY
api_key = ""
base_url = "https://api.openai.com/v1"
default_model = "gpt-4o-mini"

[anthropic]
# api_key can be omitted to use env var ANTHROPIC_API_KEY
api_key = ""
base_url = "https://api.anthropic.com"
version = "2023-06-01"
default_model = "claude-3-5-sonnet-latest"

[ollama]
base_url = "http://localhost:11434"
default_model = "llama3.1"

[chat]
provider = "openai"
stream = true
"#;

fn parse(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| anyhow!(e))
}

/// Empty strings in the config file count as unset.
fn non_empty(v: &Option<String>) -> Option<String> {
    v.clone().filter(|s| !s.trim().is_empty())
}

fn openai_root(url: &str) -> String {
    let url = url.trim_end_matches('/');
    let host_and_path = url.split_once("://").map_or(url, |(_, rest)| rest);
    if host_and_path.contains('/') {
        url.to_string()
    } else {
        format!("{url}/v1")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl OpenAiConfig {
    pub fn effective_api_key(&self) -> Option<String> {
        non_empty(&self.api_key).or_else(|| env_var("OPENAI_API_KEY"))
    }
    pub fn effective_organization(&self) -> Option<String> {
        non_empty(&self.organization).or_else(|| env_var("OPENAI_ORG_ID"))
    }
    pub fn effective_base_url(&self) -> String {
        non_empty(&self.base_url).unwrap_or_else(|| "https://api.openai.com/v1".into())
    }
    pub fn effective_default_model(&self) -> String {
        non_empty(&self.default_model).unwrap_or_else(|| "gpt-4o-mini".into())
    }
}

impl AnthropicConfig {
    pub fn effective_api_key(&self) -> Option<String> {
        non_empty(&self.api_key).or_else(|| env_var("ANTHROPIC_API_KEY"))
    }
    pub fn effective_base_url(&self) -> String {
        non_empty(&self.base_url).unwrap_or_else(|| "https://api.anthropic.com".into())
    }
    pub fn effective_version(&self) -> String {
        non_empty(&self.version).unwrap_or_else(|| "2023-06-01".into())
    }
    pub fn effective_default_model(&self) -> String {
        non_empty(&self.default_model).unwrap_or_else(|| "claude-3-5-sonnet-latest".into())
    }
}

impl OllamaConfig {
    pub fn effective_base_url(&self) -> String {
        non_empty(&self.base_url).unwrap_or_else(|| "http://localhost:11434".into())
    }
    pub fn effective_default_model(&self) -> String {
        non_empty(&self.default_model).unwrap_or_else(|| "llama3.1".into())
    }
}
