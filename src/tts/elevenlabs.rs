//! ElevenLabs provider.
//!
//! Per-segment: `POST /v1/text-to-speech/{voice_id}`.
//! Batch: `POST /v1/text-to-dialogue`, one MP3 for the whole conversation.
//! Both authenticate with the `xi-api-key` header.

use super::config::ProviderConfig;
use super::interface::{
    AudioChunk, AudioEncoding, BatchSynthesizer, TtsProvider, TtsProviderKind, TtsTuning, Voice,
    VoiceAssignment,
};
use crate::script::interface::Segment;
use crate::utils::http::{build_client, check_response, ProviderError, DEFAULT_REQUEST_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
pub const DEFAULT_DIALOGUE_MODEL: &str = "eleven_v3";
const OUTPUT_FORMAT: &str = "mp3_44100_128";
const DIALOGUE_MAX_SPEAKERS: usize = 10;

#[derive(Serialize)]
struct VoiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    stability: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

impl VoiceSettings {
    fn from_tuning(tuning: &TtsTuning) -> Option<Self> {
        if tuning.stability.is_none() && tuning.speed.is_none() {
            return None;
        }
        Some(Self {
            stability: tuning.stability.map(|s| s.clamp(0.0, 1.0)),
            speed: tuning.speed.map(|s| s.clamp(0.7, 1.2)),
        })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceSettings>,
}

#[derive(Serialize)]
struct DialogueInput<'a> {
    text: &'a str,
    voice_id: &'a str,
}

#[derive(Serialize)]
struct DialogueRequest<'a> {
    inputs: Vec<DialogueInput<'a>>,
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<VoiceSettings>,
}

pub struct ElevenLabsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dialogue_model: String,
    default_voices: Vec<(String, String)>,
}

impl ElevenLabsProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dialogue_model: DEFAULT_DIALOGUE_MODEL.to_string(),
            default_voices: vec![
                ("21m00Tcm4TlvDq8ikWAM".into(), "Rachel".into()),
                ("pNInz6obpgDQGcFmaJgB".into(), "Adam".into()),
                ("EXAVITQu4vr4xnSDxMaL".into(), "Bella".into()),
            ],
        }
    }

    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        let mut provider = Self::new(api_key, config.base_url.clone(), config.model.clone());
        if let Some(model) = config.extra.get("dialogue_model").and_then(|v| v.as_str()) {
            provider.dialogue_model = model.to_string();
        }
        if !config.default_voices.is_empty() {
            provider.default_voices = config
                .default_voices
                .iter()
                .map(|id| (id.clone(), id.clone()))
                .collect();
        }
        provider
    }

    async fn post_for_audio<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<AudioChunk, ProviderError> {
        let response = self
            .client
            .post(url)
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let bytes = check_response(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Malformed("empty audio body".into()));
        }
        Ok(AudioChunk {
            data: bytes.to_vec(),
            encoding: AudioEncoding::Mp3,
        })
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsProvider {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    fn default_voices(&self) -> Vec<Voice> {
        self.default_voices
            .iter()
            .map(|(id, name)| Voice::new(TtsProviderKind::ElevenLabs, id.as_str(), name.as_str()))
            .collect()
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &Voice,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        let url = format!("{}/v1/text-to-speech/{}", self.base_url, voice.id);
        let body = SpeechRequest {
            text,
            model_id: tuning.model.as_deref().unwrap_or(&self.model),
            voice_settings: VoiceSettings::from_tuning(tuning),
        };
        self.post_for_audio(&url, &body).await
    }

    fn as_batch(&self) -> Option<&dyn BatchSynthesizer> {
        Some(self)
    }
}

#[async_trait]
impl BatchSynthesizer for ElevenLabsProvider {
    fn max_speakers(&self) -> usize {
        DIALOGUE_MAX_SPEAKERS
    }

    async fn synthesize_batch(
        &self,
        segments: &[Segment],
        assignment: &VoiceAssignment,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        let inputs = segments
            .iter()
            .map(|s| {
                assignment
                    .voice_for(&s.speaker)
                    .map(|v| DialogueInput {
                        text: &s.text,
                        voice_id: &v.id,
                    })
                    .ok_or_else(|| {
                        ProviderError::Config(format!("no voice for speaker '{}'", s.speaker))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // The dialogue endpoint only accepts its own model; `tuning.model`
        // applies to per-segment calls.
        let url = format!("{}/v1/text-to-dialogue", self.base_url);
        let body = DialogueRequest {
            inputs,
            model_id: &self.dialogue_model,
            settings: VoiceSettings::from_tuning(tuning),
        };
        self.post_for_audio(&url, &body).await
    }
}
