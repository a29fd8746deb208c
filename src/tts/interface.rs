use crate::script::interface::Segment;
use crate::utils::http::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ── Error Types ────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("unknown TTS provider '{name}' (valid: {valid})")]
    UnknownProvider { name: String, valid: String },
    #[error("TTS provider '{provider}' is not configured: {reason}")]
    NotConfigured { provider: String, reason: String },
    #[error("invalid voice: {0}")]
    InvalidVoice(String),
    #[error("{provider} rejected the request: {source}")]
    Fatal {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error("{provider} synthesis failed after {attempts} attempts: {last}")]
    Exhausted {
        provider: String,
        attempts: u32,
        last: ProviderError,
    },
    #[error("synthesis cancelled")]
    Cancelled,
    #[error("audio write failed: {0}")]
    Io(String),
}

// ── Provider Selection ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TtsProviderKind {
    OpenAi,
    ElevenLabs,
    Gemini,
}

impl TtsProviderKind {
    pub const ALL: [TtsProviderKind; 3] = [
        TtsProviderKind::OpenAi,
        TtsProviderKind::ElevenLabs,
        TtsProviderKind::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TtsProviderKind::OpenAi => "openai",
            TtsProviderKind::ElevenLabs => "elevenlabs",
            TtsProviderKind::Gemini => "gemini",
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

impl fmt::Display for TtsProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TtsProviderKind {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TtsError::UnknownProvider {
                name: s.to_string(),
                valid: Self::valid_names(),
            })
    }
}

// ── Voices ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Owning provider, always one of [`TtsProviderKind`]'s names.
    pub provider: String,
    /// Provider-specific voice id.
    pub id: String,
    pub name: String,
}

impl Voice {
    pub fn new(kind: TtsProviderKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: kind.as_str().to_string(),
            id: id.into(),
            name: name.into(),
        }
    }

    /// Parse `provider:voice_id`. The provider name must be a known one.
    pub fn parse_qualified(spec: &str) -> Result<Self, TtsError> {
        let (provider, id) = spec
            .split_once(':')
            .ok_or_else(|| TtsError::InvalidVoice(format!("'{}' is not provider:voice", spec)))?;
        let kind: TtsProviderKind = provider.parse()?;
        let id = id.trim();
        if id.is_empty() {
            return Err(TtsError::InvalidVoice(format!("'{}' has no voice id", spec)));
        }
        Ok(Self::new(kind, id, id))
    }

    pub fn kind(&self) -> Option<TtsProviderKind> {
        self.provider.parse().ok()
    }

    pub fn qualified(&self) -> String {
        format!("{}:{}", self.provider, self.id)
    }
}

pub const MAX_SPEAKERS: usize = 3;

/// Speaker label → voice for every host in a script.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoiceAssignment {
    voices: BTreeMap<String, Voice>,
}

impl VoiceAssignment {
    pub fn new(voices: BTreeMap<String, Voice>) -> Result<Self, TtsError> {
        if voices.is_empty() || voices.len() > MAX_SPEAKERS {
            return Err(TtsError::InvalidVoice(format!(
                "between 1 and {} speakers need voices, got {}",
                MAX_SPEAKERS,
                voices.len()
            )));
        }
        Ok(Self { voices })
    }

    pub fn voice_for(&self, speaker: &str) -> Option<&Voice> {
        self.voices.get(speaker)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Voice)> {
        self.voices.iter()
    }

    pub fn providers(&self) -> BTreeSet<&str> {
        self.voices.values().map(|v| v.provider.as_str()).collect()
    }

    /// The one provider owning every voice, if there is exactly one.
    pub fn single_provider(&self) -> Option<&str> {
        let providers = self.providers();
        if providers.len() == 1 {
            providers.into_iter().next()
        } else {
            None
        }
    }
}

// ── Audio ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Ready-to-play compressed audio.
    Mp3,
    /// Raw signed 16-bit little-endian samples; the assembler must transcode.
    Pcm { sample_rate: u32, channels: u16 },
}

impl AudioEncoding {
    pub fn needs_transcode(&self) -> bool {
        matches!(self, AudioEncoding::Pcm { .. })
    }

    /// Extension of the file this chunk is written to. PCM is wrapped in a WAV header.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioEncoding::Mp3 => "mp3",
            AudioEncoding::Pcm { .. } => "wav",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub encoding: AudioEncoding,
}

// ── Synthesis Parameters ───────────────────────────────

/// Optional, provider-specific knobs. Providers ignore what they don't support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsTuning {
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub stability: Option<f32>,
    #[serde(default)]
    pub pitch: Option<f32>,
    /// Model override for this request.
    #[serde(default)]
    pub model: Option<String>,
}

// ── Provider Traits ────────────────────────────────────

#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Provider name, one of [`TtsProviderKind`]'s names.
    fn id(&self) -> &str;

    /// Voices handed to hosts that have no explicit voice, in host order.
    fn default_voices(&self) -> Vec<Voice>;

    /// Synthesize one utterance. Makes exactly one request; retries live in the caller.
    async fn synthesize(
        &self,
        text: &str,
        voice: &Voice,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError>;

    /// Batch capability query.
    fn as_batch(&self) -> Option<&dyn BatchSynthesizer> {
        None
    }
}

/// Whole-script synthesis in a single request.
#[async_trait]
pub trait BatchSynthesizer: Send + Sync {
    /// Largest number of distinct speakers one call can voice.
    fn max_speakers(&self) -> usize;

    /// Fewest distinct speakers one call accepts.
    fn min_speakers(&self) -> usize {
        1
    }

    async fn synthesize_batch(
        &self,
        segments: &[Segment],
        assignment: &VoiceAssignment,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError>;
}
