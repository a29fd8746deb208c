use super::interface::{TtsError, TtsProvider, Voice, VoiceAssignment};
use std::collections::{BTreeMap, HashMap};

/// Default voices per provider, used to fill hosts that have no explicit voice.
#[derive(Default)]
pub struct VoiceRegistry {
    defaults: HashMap<String, Vec<Voice>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's default voices. Overwrites an earlier registration.
    pub fn register_provider(&mut self, provider: &dyn TtsProvider) {
        self.defaults
            .insert(provider.id().to_string(), provider.default_voices());
    }

    pub fn defaults_for(&self, provider: &str) -> &[Voice] {
        self.defaults.get(provider).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Build the speaker → voice map for `hosts`.
    ///
    /// Hosts named in `overrides` (host → `provider:voice`) get that voice. The
    /// rest get `default_provider`'s defaults in host order, skipping voices an
    /// override already took so two hosts don't share a voice when avoidable.
    pub fn assign(
        &self,
        hosts: &[String],
        overrides: &BTreeMap<String, String>,
        default_provider: &str,
    ) -> Result<VoiceAssignment, TtsError> {
        if let Some(unknown) = overrides.keys().find(|k| !hosts.contains(*k)) {
            return Err(TtsError::InvalidVoice(format!(
                "voice given for '{}', which is not a host ({})",
                unknown,
                hosts.join(", ")
            )));
        }

        let mut voices = BTreeMap::new();
        for (host, spec) in overrides {
            voices.insert(host.clone(), Voice::parse_qualified(spec)?);
        }

        let mut pool: Vec<&Voice> = self
            .defaults_for(default_provider)
            .iter()
            .filter(|d| {
                !voices
                    .values()
                    .any(|v: &Voice| v.provider == d.provider && v.id == d.id)
            })
            .collect();
        if pool.is_empty() {
            pool = self.defaults_for(default_provider).iter().collect();
        }

        for (slot, host) in hosts.iter().filter(|h| !overrides.contains_key(*h)).enumerate() {
            let voice = pool.get(slot % pool.len().max(1)).ok_or_else(|| {
                TtsError::NotConfigured {
                    provider: default_provider.to_string(),
                    reason: format!("no default voice available for host '{}'", host),
                }
            })?;
            voices.insert(host.clone(), (*voice).clone());
        }

        VoiceAssignment::new(voices)
    }
}
