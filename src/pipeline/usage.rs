//! Usage counters recorded on completed jobs, and the configurable cost estimate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub script_backend: Option<String>,
    pub script_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tts_provider: Option<String>,
    pub tts_calls: u32,
    pub tts_characters: u64,
}

/// Rates for one backend or provider. Unset rates count as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    #[serde(default)]
    pub per_call: f64,
    #[serde(default)]
    pub per_1k_input_tokens: f64,
    #[serde(default)]
    pub per_1k_output_tokens: f64,
    #[serde(default)]
    pub per_1k_characters: f64,
}

/// Rates keyed by backend/provider name (`openai`, `elevenlabs`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub rates: BTreeMap<String, Rate>,
}

impl PricingConfig {
    /// `None` when neither the script backend nor the TTS provider has a rate.
    pub fn estimate(&self, usage: &UsageCounters) -> Option<f64> {
        let script = usage
            .script_backend
            .as_deref()
            .and_then(|name| self.rates.get(name))
            .map(|rate| {
                rate.per_call * f64::from(usage.script_calls)
                    + rate.per_1k_input_tokens * usage.input_tokens as f64 / 1000.0
                    + rate.per_1k_output_tokens * usage.output_tokens as f64 / 1000.0
            });
        let tts = usage
            .tts_provider
            .as_deref()
            .and_then(|name| self.rates.get(name))
            .map(|rate| {
                rate.per_call * f64::from(usage.tts_calls)
                    + rate.per_1k_characters * usage.tts_characters as f64 / 1000.0
            });

        match (script, tts) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        }
    }
}
