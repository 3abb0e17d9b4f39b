//! Model definition files: a JSON document naming the model, its system
//! prompt, generation parameters and model-wide options such as `num_ctx`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::providers::GenerationParams;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse model file: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("model name is required")]
    MissingName,
    #[error("failed to serialize model template: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write template file: {0}")]
    Write(#[source] std::io::Error),
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub temperature: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub top_p: f64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub top_k: i64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub repeat_penalty: f64,
    /// -1 asks for a random seed
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub seed: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_predict: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stop: String,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub tfs_z: f64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_thread: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_gpu: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_keep: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_batch: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub repeat_last_n: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub mirostat: i64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub mirostat_tau: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub mirostat_eta: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_ctx: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_batch: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_gpu: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub num_thread: i64,
}

/// One named setting for display; zero values are reported as unset.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub name: &'static str,
    pub value: Value,
    pub is_set: bool,
}

fn f(name: &'static str, v: f64) -> ParamField {
    ParamField { name, value: json!(v), is_set: v != 0.0 }
}

fn i(name: &'static str, v: i64) -> ParamField {
    ParamField { name, value: json!(v), is_set: v != 0 }
}

fn s(name: &'static str, v: &str) -> ParamField {
    ParamField { name, value: json!(v), is_set: !v.is_empty() }
}

impl ModelParameters {
    pub fn fields(&self) -> Vec<ParamField> {
        vec![
            f("temperature", self.temperature),
            f("top_p", self.top_p),
            i("top_k", self.top_k),
            f("repeat_penalty", self.repeat_penalty),
            i("seed", self.seed),
            i("num_predict", self.num_predict),
            s("stop", &self.stop),
            f("tfs_z", self.tfs_z),
            i("num_thread", self.num_thread),
            i("num_gpu", self.num_gpu),
            i("num_keep", self.num_keep),
            i("num_batch", self.num_batch),
            i("repeat_last_n", self.repeat_last_n),
            i("mirostat", self.mirostat),
            f("mirostat_tau", self.mirostat_tau),
            f("mirostat_eta", self.mirostat_eta),
        ]
    }

    pub fn active(&self) -> Vec<ParamField> {
        self.fields().into_iter().filter(|p| p.is_set).collect()
    }

    pub fn to_generation_params(&self) -> GenerationParams {
        self.active().into_iter().map(|p| (p.name.to_string(), p.value)).collect()
    }
}

impl ModelOptions {
    pub fn fields(&self) -> Vec<ParamField> {
        vec![
            i("num_ctx", self.num_ctx),
            i("num_batch", self.num_batch),
            i("num_gpu", self.num_gpu),
            i("num_thread", self.num_thread),
        ]
    }

    pub fn active(&self) -> Vec<ParamField> {
        self.fields().into_iter().filter(|p| p.is_set).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub modelfile: String,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default)]
    pub options: ModelOptions,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub system: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
}

impl ModelDefinition {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let data = fs::read_to_string(path).map_err(ModelError::Read)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ModelError> {
        let model: ModelDefinition = serde_json::from_str(data).map_err(ModelError::Parse)?;
        if model.name.trim().is_empty() {
            return Err(ModelError::MissingName);
        }
        Ok(model)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        Some(self.system.as_str()).filter(|s| !s.is_empty())
    }

    /// Explicit context window from `options.num_ctx`, if positive.
    pub fn window_override(&self) -> Option<usize> {
        usize::try_from(self.options.num_ctx).ok().filter(|n| *n > 0)
    }

    /// Generation parameters forwarded with every request. `num_ctx` is a
    /// model-wide option but Ollama expects it alongside the others.
    pub fn generation_params(&self) -> GenerationParams {
        let mut params = self.parameters.to_generation_params();
        if self.options.num_ctx > 0 {
            params.insert("num_ctx".into(), json!(self.options.num_ctx));
        }
        params
    }

    /// Starter definition written by `init-model`.
    pub fn template() -> Self {
        Self {
            name: "mymodel".into(),
            modelfile: "FROM llama2\nPARAMETER temperature 0.7\nPARAMETER top_p 0.9\nPARAMETER top_k 40\nPARAMETER num_ctx 8192".into(),
            parameters: ModelParameters {
                temperature: 0.7,
                top_p: 0.9,
                top_k: 40,
                repeat_penalty: 1.1,
                num_predict: 2048,
                repeat_last_n: 64,
                seed: -1,
                ..Default::default()
            },
            options: ModelOptions { num_ctx: 8192, num_batch: 512, num_thread: 4, num_gpu: 1 },
            template: "{{ .Prompt }}".into(),
            system: "You are a helpful assistant with expertise in software development.".into(),
            format: "markdown".into(),
        }
    }

    pub fn write_template(path: &Path) -> Result<(), ModelError> {
        let data = serde_json::to_string_pretty(&Self::template()).map_err(ModelError::Serialize)?;
        fs::write(path, data).map_err(ModelError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        ModelDefinition::write_template(&path).unwrap();
        let loaded = ModelDefinition::load(&path).unwrap();
        assert_eq!(loaded, ModelDefinition::template());
        assert_eq!(loaded.window_override(), Some(8192));
    }

    #[test]
    fn name_is_required() {
        let err = ModelDefinition::from_json(r#"{"name": "", "system": "x"}"#).unwrap_err();
        assert!(matches!(err, ModelError::MissingName));
        let err = ModelDefinition::from_json("{not json").unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
    }

    #[test]
    fn template_errors_name_the_failing_step() {
        let json_err = serde_json::from_str::<u8>("x").unwrap_err();
        let msg = ModelError::Serialize(json_err).to_string();
        assert!(msg.starts_with("failed to serialize model template"), "{msg}");

        let dir = tempfile::tempdir().unwrap();
        let err = ModelDefinition::write_template(&dir.path().join("missing/model.json")).unwrap_err();
        assert!(matches!(err, ModelError::Write(_)));
    }

    #[test]
    fn missing_sections_default_to_zero() {
        let m = ModelDefinition::from_json(r#"{"name": "gpt-4o"}"#).unwrap();
        assert!(m.parameters.active().is_empty());
        assert_eq!(m.window_override(), None);
        assert_eq!(m.system_prompt(), None);
        assert!(m.generation_params().is_empty());
    }

    #[test]
    fn active_lists_only_set_fields_in_declared_order() {
        let p = ModelParameters {
            temperature: 0.2,
            seed: -1,
            stop: "###".into(),
            ..Default::default()
        };
        let names: Vec<&str> = p.active().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["temperature", "seed", "stop"]);
        assert_eq!(p.fields().len(), 16);
        let params = p.to_generation_params();
        assert_eq!(params.get("seed"), Some(&json!(-1)));
    }

    #[test]
    fn num_ctx_is_forwarded_with_params() {
        let m = ModelDefinition::template();
        let params = m.generation_params();
        assert_eq!(params.get("num_ctx"), Some(&json!(8192)));
        assert_eq!(params.get("num_predict"), Some(&json!(2048)));
        let names: Vec<&str> = m.options.active().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["num_ctx", "num_batch", "num_gpu", "num_thread"]);
    }
}
