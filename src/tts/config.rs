use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Provider Config ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// "openai" | "elevenlabs" | "gemini"
    pub provider: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Voice ids handed out, in host order, to hosts without an explicit voice.
    #[serde(default)]
    pub default_voices: Vec<String>,

    /// Catch-all for provider-specific config
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        crate::config::resolve_api_key(&self.api_key, &self.api_key_env)
    }

    fn keyed(provider: &str, env: &str) -> Self {
        Self {
            provider: provider.to_string(),
            enabled: true,
            api_key: None,
            api_key_env: Some(env.to_string()),
            base_url: None,
            model: None,
            default_voices: Vec::new(),
            extra: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Top-Level System Config ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TtsSystemConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "RetryPolicy::tts_defaults")]
    pub retry: RetryPolicy,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::keyed("openai", "OPENAI_API_KEY"),
        ProviderConfig::keyed("elevenlabs", "ELEVENLABS_API_KEY"),
        ProviderConfig::keyed("gemini", "GEMINI_API_KEY"),
    ]
}

impl Default for TtsSystemConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            retry: RetryPolicy::tts_defaults(),
            providers: default_providers(),
        }
    }
}

impl TtsSystemConfig {
    pub fn provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.provider.eq_ignore_ascii_case(name))
    }
}
