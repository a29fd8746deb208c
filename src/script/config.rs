//! Script backend configuration, nested under `script` in `engine_config.json`.

use crate::config;
use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptBackendConfig {
    /// "openai" | "ollama" | "anthropic"
    pub backend: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,

    /// Catch-all for backend-specific knobs (e.g. `temperature`, `max_tokens`).
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl ScriptBackendConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        config::resolve_api_key(&self.api_key, &self.api_key_env)
    }

    pub fn extra_f32(&self, key: &str) -> Option<f32> {
        self.extra.get(key).and_then(|v| v.as_f64()).map(|v| v as f32)
    }

    pub fn extra_u32(&self, key: &str) -> Option<u32> {
        self.extra
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptSystemConfig {
    #[serde(default = "default_backend")]
    pub default_backend: String,
    #[serde(default = "RetryPolicy::script_defaults")]
    pub retry: RetryPolicy,
    /// Run the refinement pass when a request does not say either way.
    #[serde(default)]
    pub refine_by_default: bool,
    /// Stock filler phrases that trigger a revision when present in a draft.
    #[serde(default = "default_banned_phrases")]
    pub banned_phrases: Vec<String>,
    #[serde(default = "default_backends")]
    pub backends: Vec<ScriptBackendConfig>,
}

fn default_backend() -> String {
    "openai".to_string()
}

fn default_banned_phrases() -> Vec<String> {
    [
        "delve into",
        "in today's fast-paced world",
        "it's important to note",
        "game-changer",
        "tapestry",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_backends() -> Vec<ScriptBackendConfig> {
    vec![
        ScriptBackendConfig {
            backend: "openai".to_string(),
            enabled: true,
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: Some("https://api.openai.com/v1".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            extra: HashMap::new(),
        },
        ScriptBackendConfig {
            backend: "ollama".to_string(),
            enabled: true,
            api_key: None,
            api_key_env: None,
            base_url: Some("http://localhost:11434".to_string()),
            model: Some("llama3".to_string()),
            extra: HashMap::new(),
        },
        ScriptBackendConfig {
            backend: "anthropic".to_string(),
            enabled: true,
            api_key: None,
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            base_url: Some("https://api.anthropic.com".to_string()),
            model: Some("claude-3-5-haiku-latest".to_string()),
            extra: HashMap::new(),
        },
    ]
}

impl Default for ScriptSystemConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            retry: RetryPolicy::script_defaults(),
            refine_by_default: false,
            banned_phrases: default_banned_phrases(),
            backends: default_backends(),
        }
    }
}

impl ScriptSystemConfig {
    pub fn backend_config(&self, name: &str) -> Option<&ScriptBackendConfig> {
        self.backends
            .iter()
            .find(|b| b.backend.eq_ignore_ascii_case(name))
    }
}
