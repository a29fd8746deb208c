//! Engine configuration: one JSON file with a section per area, plus the
//! shared helpers for loading/saving JSON config files and resolving API keys
//! from fields or environment variables.

use crate::assembly::AssemblerConfig;
use crate::ingest::IngestConfig;
use crate::jobs::JobsConfig;
use crate::pipeline::{PipelineSettings, PricingConfig};
use crate::script::config::ScriptSystemConfig;
use crate::server::ServerConfig;
use crate::storage::StorageConfig;
use crate::tts::TtsSystemConfig;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "engine_config.json";
pub const CONFIG_PATH_ENV: &str = "PODCAST_ENGINE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to write config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Built once at startup and handed to every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub script: ScriptSystemConfig,
    #[serde(default)]
    pub tts: TtsSystemConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
}

impl EngineConfig {
    /// `$PODCAST_ENGINE_CONFIG`, else `{data_dir}/podcast-engine/engine_config.json`.
    pub fn default_path() -> PathBuf {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => dirs_next::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("podcast-engine")
                .join(CONFIG_FILE_NAME),
        }
    }

    pub fn load(path: &Path) -> Self {
        load_json_config(path, "Config")
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        save_json_config(path, self, "Config")
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            silence_ms: self.assembler.silence_ms,
            min_chars: self.ingest.min_chars,
            work_dir: Some(self.jobs.work_dir.join("runs")),
        }
    }
}

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                tracing::info!(section = label, path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                tracing::warn!(
                    section = label,
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                T::default()
            }
        },
        Err(_) => {
            tracing::info!(
                section = label,
                path = %path.display(),
                "no config file, using defaults"
            );
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(
    path: &Path,
    config: &T,
    label: &str,
) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).map_err(io_err)?;
    tracing::info!(section = label, path = %path.display(), "saved config");
    Ok(())
}

/// Resolve an API key: check the direct `api_key` field first,
/// then fall back to reading the environment variable named in `api_key_env`.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(ref key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    if let Some(ref env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }
    None
}
