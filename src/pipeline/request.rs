//! What a caller asks the engine to produce.

use crate::script::generator::MAX_HOSTS;
use crate::script::interface::{Script, ScriptBackendKind, ScriptOptions};
use crate::script::validate::validate_script;
use crate::tts::interface::{TtsProviderKind, TtsTuning, Voice};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid request: {0}")]
pub struct InvalidRequest(pub String);

/// Exactly one of: inline text, a locator to ingest, or a finished script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ContentInput {
    Text(String),
    Source(String),
    Script(Script),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub content: ContentInput,
    #[serde(default)]
    pub options: ScriptOptions,
    /// Host label → `provider:voice_id`.
    #[serde(default)]
    pub voices: BTreeMap<String, String>,
    #[serde(default)]
    pub tts_provider: Option<String>,
    #[serde(default)]
    pub tuning: TtsTuning,
    #[serde(default)]
    pub owner: Option<String>,
    /// Caller-supplied keys by backend/provider name. Never persisted.
    #[serde(default, skip_serializing)]
    pub api_keys: HashMap<String, String>,
}

impl GenerationRequest {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(ContentInput::Text(text.into()))
    }

    pub fn new(content: ContentInput) -> Self {
        Self {
            content,
            options: ScriptOptions::default(),
            voices: BTreeMap::new(),
            tts_provider: None,
            tuning: TtsTuning::default(),
            owner: None,
            api_keys: HashMap::new(),
        }
    }

    /// Speaker labels the audio will use. A supplied script brings its own.
    pub fn hosts(&self) -> Vec<String> {
        match &self.content {
            ContentInput::Script(script) => {
                script.speakers().into_iter().map(str::to_string).collect()
            }
            _ => self.options.hosts.clone(),
        }
    }

    /// Structural checks done before a job is accepted.
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        match &self.content {
            ContentInput::Text(text) if text.trim().is_empty() => {
                return Err(InvalidRequest("text is empty".into()))
            }
            ContentInput::Source(locator) if locator.trim().is_empty() => {
                return Err(InvalidRequest("source locator is empty".into()))
            }
            ContentInput::Script(script) => {
                validate_script(script, &self.hosts())
                    .map_err(|e| InvalidRequest(format!("script: {}", e)))?;
            }
            _ => {}
        }

        let hosts = self.hosts();
        if hosts.is_empty() || hosts.len() > MAX_HOSTS {
            return Err(InvalidRequest(format!(
                "between 1 and {} hosts required, got {}",
                MAX_HOSTS,
                hosts.len()
            )));
        }
        if hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(InvalidRequest("host names must not be blank".into()));
        }
        let distinct: BTreeSet<String> = hosts.iter().map(|h| h.to_lowercase()).collect();
        if distinct.len() != hosts.len() {
            return Err(InvalidRequest("host names must be distinct".into()));
        }

        if let Some(backend) = &self.options.backend {
            backend
                .parse::<ScriptBackendKind>()
                .map_err(|e| InvalidRequest(e.to_string()))?;
        }
        if let Some(provider) = &self.tts_provider {
            provider
                .parse::<TtsProviderKind>()
                .map_err(|e| InvalidRequest(e.to_string()))?;
        }
        for (host, spec) in &self.voices {
            if !hosts.contains(host) {
                return Err(InvalidRequest(format!(
                    "voice given for '{}', which is not a host",
                    host
                )));
            }
            Voice::parse_qualified(spec).map_err(|e| InvalidRequest(e.to_string()))?;
        }
        if let Some(speed) = self.tuning.speed {
            if !(0.25..=4.0).contains(&speed) {
                return Err(InvalidRequest(format!("speed {} outside 0.25..=4.0", speed)));
            }
        }
        Ok(())
    }
}
