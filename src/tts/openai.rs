use super::config::ProviderConfig;
use super::interface::{AudioChunk, AudioEncoding, TtsProvider, TtsProviderKind, TtsTuning, Voice};
use crate::utils::http::{build_client, check_response, ProviderError, DEFAULT_REQUEST_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "tts-1";

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

pub struct OpenAITtsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    default_voices: Vec<String>,
}

impl OpenAITtsProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            default_voices: vec!["alloy".into(), "nova".into(), "onyx".into()],
        }
    }

    /// Construct from a ProviderConfig entry and an already-resolved key.
    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        let mut provider = Self::new(api_key, config.base_url.clone(), config.model.clone());
        if !config.default_voices.is_empty() {
            provider.default_voices = config.default_voices.clone();
        }
        provider
    }
}

#[async_trait]
impl TtsProvider for OpenAITtsProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn default_voices(&self) -> Vec<Voice> {
        self.default_voices
            .iter()
            .map(|v| Voice::new(TtsProviderKind::OpenAi, v.as_str(), v.as_str()))
            .collect()
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &Voice,
        tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = SpeechRequest {
            model: tuning.model.as_deref().unwrap_or(&self.model),
            input: text,
            voice: &voice.id,
            response_format: "mp3",
            speed: tuning.speed.map(|s| s.clamp(0.25, 4.0)),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
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
