//! Gemini native TTS through `generateContent` with an AUDIO response modality.
//!
//! The response carries base64 PCM (s16le, 24 kHz, mono) in
//! `candidates[0].content.parts[0].inlineData.data`.

use super::config::ProviderConfig;
use super::interface::{
    AudioChunk, AudioEncoding, BatchSynthesizer, TtsProvider, TtsProviderKind, TtsTuning, Voice,
    VoiceAssignment,
};
use crate::script::interface::Segment;
use crate::utils::http::{build_client, check_response, ProviderError, DEFAULT_REQUEST_TIMEOUT};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const SAMPLE_RATE: u32 = 24_000;
/// Multi-speaker voice config accepts at most two speakers.
const BATCH_MAX_SPEAKERS: usize = 2;

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

pub struct GeminiTtsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    default_voices: Vec<String>,
}

impl GeminiTtsProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            default_voices: vec!["Kore".into(), "Puck".into(), "Charon".into()],
        }
    }

    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        let mut provider = Self::new(api_key, config.base_url.clone(), config.model.clone());
        if !config.default_voices.is_empty() {
            provider.default_voices = config.default_voices.clone();
        }
        provider
    }

    async fn generate(
        &self,
        prompt: String,
        speech_config: Value,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        let model = tuning.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": speech_config,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateResponse = check_response(response).await?.json().await?;

        let encoded = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .ok_or_else(|| ProviderError::Malformed("no inline audio in response".into()))?;
        let data = general_purpose::STANDARD
            .decode(encoded.data.as_bytes())
            .map_err(|e| ProviderError::Malformed(format!("bad base64 audio: {}", e)))?;
        if data.is_empty() {
            return Err(ProviderError::Malformed("empty audio payload".into()));
        }

        Ok(AudioChunk {
            data,
            encoding: AudioEncoding::Pcm {
                sample_rate: SAMPLE_RATE,
                channels: 1,
            },
        })
    }
}

fn prebuilt(voice_name: &str) -> Value {
    json!({ "prebuiltVoiceConfig": { "voiceName": voice_name } })
}

#[async_trait]
impl TtsProvider for GeminiTtsProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn default_voices(&self) -> Vec<Voice> {
        self.default_voices
            .iter()
            .map(|v| Voice::new(TtsProviderKind::Gemini, v.as_str(), v.as_str()))
            .collect()
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &Voice,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        let speech_config = json!({ "voiceConfig": prebuilt(&voice.id) });
        self.generate(text.to_string(), speech_config, tuning).await
    }

    fn as_batch(&self) -> Option<&dyn BatchSynthesizer> {
        Some(self)
    }
}

#[async_trait]
impl BatchSynthesizer for GeminiTtsProvider {
    fn max_speakers(&self) -> usize {
        BATCH_MAX_SPEAKERS
    }

    /// `multiSpeakerVoiceConfig` needs exactly two speakers.
    fn min_speakers(&self) -> usize {
        BATCH_MAX_SPEAKERS
    }

    async fn synthesize_batch(
        &self,
        segments: &[Segment],
        assignment: &VoiceAssignment,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        let speakers: Vec<Value> = assignment
            .iter()
            .map(|(speaker, voice)| json!({ "speaker": speaker, "voiceConfig": prebuilt(&voice.id) }))
            .collect();
        let names = assignment
            .iter()
            .map(|(speaker, _)| speaker.as_str())
            .collect::<Vec<_>>()
            .join(" and ");

        let mut prompt = format!("TTS the following conversation between {}:\n", names);
        for segment in segments {
            prompt.push_str(&segment.speaker);
            prompt.push_str(": ");
            prompt.push_str(&segment.text);
            prompt.push('\n');
        }

        let speech_config = json!({
            "multiSpeakerVoiceConfig": { "speakerVoiceConfigs": speakers }
        });
        self.generate(prompt, speech_config, tuning).await
    }
}
