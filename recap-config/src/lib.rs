//! Loader for workspace configuration with YAML + environment overlays.
//!
//! Sources merge in order: YAML file (or inline snippet), then `RECAP_`
//! prefixed environment variables. `${VAR}` placeholders are expanded
//! recursively with a depth cap before the merged tree is deserialized into
//! strongly typed structs.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RecapConfig {
    pub version: Option<String>,
    /// Root directory for pipeline artifacts.
    pub artifacts_dir: Option<String>,
    /// Directory for persisted recipes.
    pub recipes_dir: Option<String>,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    /// When absent, the minimizer's own defaults apply (24 attempts).
    #[serde(default)]
    pub minimizer: Option<BudgetConfig>,
    /// When absent, the verifier's own defaults apply (6 attempts).
    #[serde(default)]
    pub verifier: Option<BudgetConfig>,
}

/// Provider selection; the tag is `provider`.
#[derive(Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum LlmConfig {
    Openai {
        model: String,
        auth_token: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default = "default_openai_endpoint")]
        endpoint: String,
    },
    Ollama {
        model: String,
        #[serde(default = "default_ollama_endpoint")]
        endpoint: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_wall_seconds")]
    pub max_wall_seconds: u64,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_wall_seconds: default_max_wall_seconds(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    24
}
fn default_max_wall_seconds() -> u64 {
    30
}
fn default_pacing_ms() -> u64 {
    250
}
fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_ollama_endpoint() -> String {
    "http://localhost:11434".into()
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hiding the `config` crate wiring (YAML + env overrides).
pub struct RecapConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for RecapConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RecapConfigLoader {
    /// Start with sensible defaults: `RECAP_` env overrides with `__` as the
    /// nesting separator.
    pub fn new() -> Self {
        let builder =
            Config::builder().add_source(Environment::with_prefix("RECAP").separator("__"));
        Self { builder }
    }

    /// Attach a config file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline YAML snippet (tests, CLI overrides).
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Consume the builder and deserialize the merged sources.
    pub fn load(self) -> Result<RecapConfig, ConfigError> {
        let cfg = self.builder.build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))
    }
}
