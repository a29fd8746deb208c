//! Factory: build a script backend or a ready-to-use generator from config.

use super::anthropic::AnthropicScriptBackend;
use super::config::ScriptSystemConfig;
use super::generator::ScriptGenerator;
use super::interface::{ScriptBackend, ScriptBackendKind, ScriptError};
use super::ollama::OllamaScriptBackend;
use super::openai::OpenAiScriptBackend;
use std::sync::Arc;

/// Resolve `name` (or the configured default) to a live backend.
///
/// `api_key_override` is a per-request key and wins over the configured one.
pub fn build_backend(
    config: &ScriptSystemConfig,
    name: Option<&str>,
    api_key_override: Option<&str>,
) -> Result<Arc<dyn ScriptBackend>, ScriptError> {
    let name = name.unwrap_or(&config.default_backend);
    let kind: ScriptBackendKind = name.parse()?;

    let cfg = config
        .backend_config(kind.as_str())
        .ok_or_else(|| ScriptError::NotConfigured {
            backend: kind.to_string(),
            reason: "no entry under script.backends".to_string(),
        })?;
    if !cfg.enabled {
        return Err(ScriptError::NotConfigured {
            backend: kind.to_string(),
            reason: "backend is disabled".to_string(),
        });
    }

    let api_key = api_key_override
        .filter(|k| !k.trim().is_empty())
        .map(str::to_string)
        .or_else(|| cfg.resolve_api_key());
    let require_key = |key: Option<String>| {
        key.ok_or_else(|| ScriptError::NotConfigured {
            backend: kind.to_string(),
            reason: "no API key (set api_key, api_key_env or pass one with the request)"
                .to_string(),
        })
    };

    let backend: Arc<dyn ScriptBackend> = match kind {
        ScriptBackendKind::OpenAi => Arc::new(OpenAiScriptBackend::new(
            require_key(api_key)?,
            cfg.base_url.clone(),
            cfg.model.clone(),
        )),
        ScriptBackendKind::Anthropic => Arc::new(AnthropicScriptBackend::new(
            require_key(api_key)?,
            cfg.base_url.clone(),
            cfg.model.clone(),
        )),
        ScriptBackendKind::Ollama => Arc::new(OllamaScriptBackend::new(
            cfg.base_url.clone(),
            cfg.model.clone(),
        )),
    };

    tracing::debug!(
        backend = kind.as_str(),
        model = cfg.model.as_deref().unwrap_or("default"),
        "script backend ready"
    );
    Ok(backend)
}

pub fn build_generator(
    config: &ScriptSystemConfig,
    name: Option<&str>,
    api_key_override: Option<&str>,
) -> Result<ScriptGenerator, ScriptError> {
    let backend = build_backend(config, name, api_key_override)?;
    Ok(ScriptGenerator::new(backend, config.retry.clone())
        .with_banned_phrases(config.banned_phrases.clone())
        .with_refine_default(config.refine_by_default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_fails_fast() {
        let err = build_backend(&ScriptSystemConfig::default(), Some("bard"), None)
            .err()
            .unwrap();
        assert!(matches!(err, ScriptError::UnknownBackend { .. }));
        assert!(err.to_string().contains("openai, ollama, anthropic"));
    }

    #[test]
    fn override_key_satisfies_keyed_backend() {
        let mut config = ScriptSystemConfig::default();
        for b in &mut config.backends {
            b.api_key_env = Some("PODCAST_ENGINE_TEST_UNSET_KEY".into());
        }
        assert!(matches!(
            build_backend(&config, Some("anthropic"), None).err(),
            Some(ScriptError::NotConfigured { .. })
        ));
        let backend = build_backend(&config, Some("anthropic"), Some("sk-test")).unwrap();
        assert_eq!(backend.id(), "anthropic");
    }

    #[test]
    fn ollama_needs_no_key() {
        let backend = build_backend(&ScriptSystemConfig::default(), Some("Ollama"), None).unwrap();
        assert_eq!(backend.id(), "ollama");
    }

    #[test]
    fn disabled_backend_is_rejected() {
        let mut config = ScriptSystemConfig::default();
        for b in &mut config.backends {
            b.enabled = false;
        }
        assert!(matches!(
            build_backend(&config, Some("ollama"), None).err(),
            Some(ScriptError::NotConfigured { .. })
        ));
    }
}
