//! Script Generation Interface & Core Types
//!
//! Defines the conversation script model, the options a request can tune,
//! the backend contract every script-generation adapter implements, and the
//! semantic errors the generator surfaces.

use crate::utils::http::ProviderError;
use crate::utils::retry::{RetryHint, Retryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ── Script Model ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: String,
    pub text: String,
}

impl Segment {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(alias = "dialogue", alias = "lines")]
    pub segments: Vec<Segment>,
}

impl Script {
    /// Distinct speaker labels in order of first appearance.
    pub fn speakers(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.segments
            .iter()
            .filter(|s| seen.insert(s.speaker.as_str()))
            .map(|s| s.speaker.as_str())
            .collect()
    }

    pub fn word_count(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.text.split_whitespace().count())
            .sum()
    }

    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }

    /// Persist as pretty JSON so it can be hand-edited and fed back in.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

// ── Generation Options ─────────────────────────────────

/// Target-length bucket for a generated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl ScriptLength {
    pub fn target_segments(self) -> usize {
        match self {
            ScriptLength::Short => 12,
            ScriptLength::Medium => 24,
            ScriptLength::Long => 40,
        }
    }

    pub fn target_words(self) -> usize {
        match self {
            ScriptLength::Short => 600,
            ScriptLength::Medium => 1500,
            ScriptLength::Long => 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptOptions {
    /// Backend name (`openai`, `ollama`, `anthropic`). `None` uses the configured default.
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub length: ScriptLength,
    /// Show format, e.g. "conversation", "interview", "debate".
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub style_tags: Vec<String>,
    /// Speaker labels the script must use, 1 to 3 of them.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Allow one heuristic-driven revision call after the draft.
    #[serde(default)]
    pub refine: Option<bool>,
}

fn default_tone() -> String {
    "casual".to_string()
}

fn default_format() -> String {
    "conversation".to_string()
}

pub fn default_hosts() -> Vec<String> {
    vec!["Alex".to_string(), "Sam".to_string()]
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            backend: None,
            tone: default_tone(),
            length: ScriptLength::default(),
            format: default_format(),
            focus: None,
            style_tags: Vec::new(),
            hosts: default_hosts(),
            refine: None,
        }
    }
}

// ── Backend Contract ───────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the backend for a JSON-only response when it supports that.
    pub json_mode: bool,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// One remote text-generation service. Adapters do a single call; retries
/// and validation live in [`super::generator::ScriptGenerator`].
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    /// Backend name (e.g. "openai", "ollama").
    fn id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

// ── Backend Selection ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptBackendKind {
    OpenAi,
    Ollama,
    Anthropic,
}

impl ScriptBackendKind {
    pub const ALL: [ScriptBackendKind; 3] = [
        ScriptBackendKind::OpenAi,
        ScriptBackendKind::Ollama,
        ScriptBackendKind::Anthropic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptBackendKind::OpenAi => "openai",
            ScriptBackendKind::Ollama => "ollama",
            ScriptBackendKind::Anthropic => "anthropic",
        }
    }

    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ScriptBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptBackendKind {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ScriptError::UnknownBackend {
                name: s.to_string(),
                valid: Self::valid_names(),
            })
    }
}

// ── Error Types ────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unknown script backend '{name}' (valid: {valid})")]
    UnknownBackend { name: String, valid: String },
    #[error("script backend '{backend}' is not configured: {reason}")]
    NotConfigured { backend: String, reason: String },
    #[error("transient script backend error: {0}")]
    Transient(ProviderError),
    #[error("invalid script output: {0}")]
    InvalidOutput(String),
    #[error("script request rejected: {0}")]
    Fatal(String),
    #[error("script generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("script generation cancelled")]
    Cancelled,
}

impl From<ProviderError> for ScriptError {
    fn from(e: ProviderError) -> Self {
        match e.retry_hint() {
            RetryHint::Fatal => ScriptError::Fatal(e.to_string()),
            _ => ScriptError::Transient(e),
        }
    }
}

impl Retryable for ScriptError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            ScriptError::Transient(e) => e.retry_hint(),
            // A re-prompt often fixes malformed output, so it shares the budget.
            ScriptError::InvalidOutput(_) => RetryHint::Retry { min_wait: None },
            _ => RetryHint::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!(
            "OpenAI".parse::<ScriptBackendKind>().unwrap(),
            ScriptBackendKind::OpenAi
        );
        assert_eq!(
            " ollama ".parse::<ScriptBackendKind>().unwrap(),
            ScriptBackendKind::Ollama
        );
    }

    #[test]
    fn unknown_backend_lists_valid_choices() {
        let err = "gpt-neo".parse::<ScriptBackendKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gpt-neo"));
        assert!(msg.contains("openai, ollama, anthropic"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("script.json");
        let script = Script {
            title: "Tides".to_string(),
            summary: "Why the moon matters".to_string(),
            segments: vec![
                Segment::new("Alex", "Let's talk tides."),
                Segment::new("Sam", "Twice a day, every day."),
                Segment::new("Alex", "And the moon is to blame."),
            ],
        };

        script.save(&path).unwrap();
        let loaded = Script::load(&path).unwrap();

        assert_eq!(loaded, script);
        assert_eq!(loaded.speakers(), vec!["Alex", "Sam"]);
    }

    #[test]
    fn dialogue_alias_is_accepted() {
        let json = r#"{"title":"T","dialogue":[{"speaker":"A","text":"hi"}]}"#;
        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.segments.len(), 1);
        assert_eq!(script.summary, "");
    }

    #[test]
    fn provider_errors_map_to_script_errors() {
        let fatal = ScriptError::from(ProviderError::Fatal {
            status: 401,
            body: "bad key".into(),
        });
        assert!(matches!(fatal, ScriptError::Fatal(_)));
        assert_eq!(fatal.retry_hint(), RetryHint::Fatal);

        let transient = ScriptError::from(ProviderError::Network("reset".into()));
        assert!(matches!(transient.retry_hint(), RetryHint::Retry { .. }));
    }
}
