use std::collections::HashMap;

use tracing::debug;

use crate::config::Config;

use super::{
    LlmProvider, ProviderError, anthropic::AnthropicProvider, ollama::OllamaProvider,
    openai::OpenAiProvider,
};

pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Registers every provider that has enough configuration to make requests.
    /// OpenAI and Anthropic need an API key (config or env); Ollama is always
    /// available since it defaults to localhost.
    pub fn from_config(cfg: &Config) -> Result<Self, ProviderError> {
        let mut map: HashMap<String, Box<dyn LlmProvider>> = HashMap::new();

        let oc = cfg.openai.clone().unwrap_or_default();
        if let Some(key) = oc.effective_api_key() {
            let p = OpenAiProvider::new(
                oc.effective_base_url(),
                key,
                oc.effective_organization(),
                oc.effective_default_model(),
            )?;
            map.insert("openai".into(), Box::new(p));
        } else {
            debug!("openai not registered: no API key");
        }

        let ac = cfg.anthropic.clone().unwrap_or_default();
        if let Some(key) = ac.effective_api_key() {
            let p = AnthropicProvider::new(
                ac.effective_base_url(),
                key,
                ac.effective_version(),
                ac.effective_default_model(),
            )?;
            map.insert("anthropic".into(), Box::new(p));
        } else {
            debug!("anthropic not registered: no API key");
        }

        let lc = cfg.ollama.clone().unwrap_or_default();
        let p = OllamaProvider::new(lc.effective_base_url(), lc.effective_default_model())?;
        map.insert("ollama".into(), Box::new(p));

        Ok(Self { providers: map })
    }

    pub fn get(&self, key: &str) -> Result<&dyn LlmProvider, ProviderError> {
        self.providers.get(key).map(|b| b.as_ref()).ok_or_else(|| {
            let hint = match key {
                "openai" => " (set OPENAI_API_KEY or [openai].api_key)",
                "anthropic" => " (set ANTHROPIC_API_KEY or [anthropic].api_key)",
                _ => "",
            };
            ProviderError::Config(format!("provider '{key}' is not available{hint}"))
        })
    }

    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnthropicConfig, OpenAiConfig};

    #[test]
    fn keyed_providers_register_from_config() {
        let cfg = Config {
            openai: Some(OpenAiConfig { api_key: Some("sk-test".into()), ..Default::default() }),
            anthropic: Some(AnthropicConfig {
                api_key: Some("ak-test".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let reg = ProviderRegistry::from_config(&cfg).unwrap();
        assert_eq!(reg.list(), vec!["anthropic", "ollama", "openai"]);
        assert_eq!(reg.get("openai").unwrap().default_model(), "gpt-4o-mini");
        assert_eq!(reg.get("ollama").unwrap().name(), "ollama");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let reg = ProviderRegistry::from_config(&Config::default()).unwrap();
        let err = reg.get("nope").err().unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
