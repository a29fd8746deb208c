use super::config::{ProviderConfig, TtsSystemConfig};
use super::elevenlabs::ElevenLabsProvider;
use super::gemini::GeminiTtsProvider;
use super::interface::{
    AudioChunk, AudioEncoding, TtsError, TtsProvider, TtsProviderKind, TtsTuning, VoiceAssignment,
};
use super::openai::OpenAITtsProvider;
use super::router::{select_strategy, SynthesisStrategy};
use super::voice_registry::VoiceRegistry;
use crate::script::interface::Script;
use crate::utils::http::ProviderError;
use crate::utils::retry::{retry_with_backoff, RetryError, RetryPolicy};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ── Progress Hook ──────────────────────────────────────

/// Told after every synthesized unit (a segment, or the whole script in batch mode).
#[async_trait]
pub trait SynthesisObserver: Send + Sync {
    async fn segment_done(&self, done: usize, total: usize);
}

pub struct NoopObserver;

#[async_trait]
impl SynthesisObserver for NoopObserver {
    async fn segment_done(&self, _done: usize, _total: usize) {}
}

// ── Output ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// Audio files in playback order.
    pub files: Vec<PathBuf>,
    pub strategy: SynthesisStrategy,
    /// Provider requests made, including retried ones.
    pub calls: u32,
    /// Characters of script text successfully synthesized.
    pub characters: u64,
}

// ── TtsService ─────────────────────────────────────────

/// Builds per-job synthesizers from config. Holds no per-job state.
#[derive(Clone)]
pub struct TtsService {
    config: Arc<TtsSystemConfig>,
}

impl TtsService {
    pub fn new(config: TtsSystemConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &TtsSystemConfig {
        &self.config
    }

    /// Build one provider. `api_keys` holds per-request keys by provider name.
    pub fn build_provider(
        &self,
        kind: TtsProviderKind,
        api_keys: &HashMap<String, String>,
    ) -> Result<Arc<dyn TtsProvider>, TtsError> {
        let not_configured = |reason: &str| TtsError::NotConfigured {
            provider: kind.to_string(),
            reason: reason.to_string(),
        };

        let config = self
            .config
            .provider_config(kind.as_str())
            .ok_or_else(|| not_configured("no entry under tts.providers"))?;
        if !config.enabled {
            return Err(not_configured("provider is disabled"));
        }
        let api_key = api_keys
            .get(kind.as_str())
            .filter(|k| !k.trim().is_empty())
            .cloned()
            .or_else(|| config.resolve_api_key())
            .ok_or_else(|| not_configured("no API key (set api_key, api_key_env or pass one with the request)"))?;

        tracing::debug!(provider = kind.as_str(), "building TTS provider");
        Ok(build_from_provider_config(kind, config, api_key))
    }

    /// Resolve voices and providers for one script.
    ///
    /// `provider` (or the configured default) supplies voices for hosts without
    /// an override and is the batch candidate. Hosts whose override names another
    /// provider are routed there per segment.
    pub fn prepare(
        &self,
        hosts: &[String],
        voice_overrides: &BTreeMap<String, String>,
        provider: Option<&str>,
        api_keys: &HashMap<String, String>,
    ) -> Result<Synthesizer, TtsError> {
        let kind: TtsProviderKind = provider.unwrap_or(&self.config.default_provider).parse()?;
        let selected = self.build_provider(kind, api_keys)?;

        let mut registry = VoiceRegistry::new();
        registry.register_provider(selected.as_ref());
        let assignment = registry.assign(hosts, voice_overrides, selected.id())?;

        let mut providers = vec![selected.clone()];
        for name in assignment.providers() {
            if name == selected.id() {
                continue;
            }
            let other: TtsProviderKind = name.parse()?;
            providers.push(self.build_provider(other, api_keys)?);
        }

        Ok(Synthesizer::from_parts(
            selected,
            providers,
            assignment,
            self.config.retry.clone(),
        ))
    }
}

/// Factory: build the TtsProvider for a config entry.
fn build_from_provider_config(
    kind: TtsProviderKind,
    config: &ProviderConfig,
    api_key: String,
) -> Arc<dyn TtsProvider> {
    match kind {
        TtsProviderKind::OpenAi => Arc::new(OpenAITtsProvider::from_config(config, api_key)),
        TtsProviderKind::ElevenLabs => Arc::new(ElevenLabsProvider::from_config(config, api_key)),
        TtsProviderKind::Gemini => Arc::new(GeminiTtsProvider::from_config(config, api_key)),
    }
}

// ── Synthesizer ────────────────────────────────────────

/// Everything needed to voice one script: providers, voices, retry policy.
pub struct Synthesizer {
    selected: Arc<dyn TtsProvider>,
    providers: HashMap<String, Arc<dyn TtsProvider>>,
    assignment: VoiceAssignment,
    policy: RetryPolicy,
}

impl Synthesizer {
    pub fn from_parts(
        selected: Arc<dyn TtsProvider>,
        providers: Vec<Arc<dyn TtsProvider>>,
        assignment: VoiceAssignment,
        policy: RetryPolicy,
    ) -> Self {
        let mut by_id: HashMap<String, Arc<dyn TtsProvider>> = providers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();
        by_id
            .entry(selected.id().to_string())
            .or_insert_with(|| selected.clone());
        Self {
            selected,
            providers: by_id,
            assignment,
            policy,
        }
    }

    /// The request's selected provider (batch candidate and default voice source).
    pub fn provider_id(&self) -> &str {
        self.selected.id()
    }

    pub fn assignment(&self) -> &VoiceAssignment {
        &self.assignment
    }

    pub fn strategy(&self) -> SynthesisStrategy {
        select_strategy(self.selected.as_ref(), &self.assignment)
    }

    /// Voice `script` into audio files under `out_dir`, in script order.
    pub async fn synthesize_script(
        &self,
        script: &Script,
        tuning: &TtsTuning,
        out_dir: &Path,
        observer: &dyn SynthesisObserver,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutput, TtsError> {
        if let Some(segment) = script
            .segments
            .iter()
            .find(|s| self.assignment.voice_for(&s.speaker).is_none())
        {
            return Err(TtsError::InvalidVoice(format!(
                "no voice assigned to speaker '{}'",
                segment.speaker
            )));
        }

        let calls = AtomicU32::new(0);
        let strategy = self.strategy();
        tracing::info!(
            provider = self.selected.id(),
            segments = script.segments.len(),
            strategy = ?strategy,
            "synthesizing script"
        );

        let files = match &strategy {
            SynthesisStrategy::Batch { .. } => {
                vec![self.run_batch(script, tuning, out_dir, &calls, cancel).await?]
            }
            SynthesisStrategy::PerSegment => {
                self.run_per_segment(script, tuning, out_dir, observer, &calls, cancel)
                    .await?
            }
        };
        if matches!(strategy, SynthesisStrategy::Batch { .. }) {
            observer
                .segment_done(script.segments.len(), script.segments.len())
                .await;
        }

        Ok(SynthesisOutput {
            files,
            strategy,
            calls: calls.load(Ordering::SeqCst),
            characters: script.char_count() as u64,
        })
    }

    async fn run_batch(
        &self,
        script: &Script,
        tuning: &TtsTuning,
        out_dir: &Path,
        calls: &AtomicU32,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TtsError> {
        let provider = self.selected.as_ref();
        let batch = provider.as_batch().ok_or_else(|| TtsError::NotConfigured {
            provider: provider.id().to_string(),
            reason: "batch synthesis unsupported".to_string(),
        })?;
        let segments = script.segments.as_slice();
        let assignment = &self.assignment;

        let chunk = retry_with_backoff(&self.policy, cancel, provider.id(), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            batch.synthesize_batch(segments, assignment, tuning)
        })
        .await
        .map_err(|e| retry_error(provider.id(), e))?;

        write_chunk(out_dir, "script", &chunk).await
    }

    async fn run_per_segment(
        &self,
        script: &Script,
        tuning: &TtsTuning,
        out_dir: &Path,
        observer: &dyn SynthesisObserver,
        calls: &AtomicU32,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, TtsError> {
        let total = script.segments.len();
        let mut files = Vec::with_capacity(total);

        // Sequential on purpose: file order is playback order.
        for (index, segment) in script.segments.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TtsError::Cancelled);
            }

            let voice = self
                .assignment
                .voice_for(&segment.speaker)
                .ok_or_else(|| TtsError::InvalidVoice(segment.speaker.clone()))?;
            let provider = self
                .providers
                .get(&voice.provider)
                .ok_or_else(|| TtsError::NotConfigured {
                    provider: voice.provider.clone(),
                    reason: "provider was not prepared for this job".to_string(),
                })?
                .as_ref();
            let text = segment.text.as_str();

            let chunk = retry_with_backoff(&self.policy, cancel, provider.id(), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                provider.synthesize(text, voice, tuning)
            })
            .await
            .map_err(|e| retry_error(provider.id(), e))?;

            files.push(write_chunk(out_dir, &format!("segment_{:04}", index), &chunk).await?);
            tracing::debug!(
                provider = provider.id(),
                segment = index + 1,
                total,
                "segment synthesized"
            );
            observer.segment_done(index + 1, total).await;
        }

        Ok(files)
    }
}

fn retry_error(provider: &str, e: RetryError<ProviderError>) -> TtsError {
    match e {
        RetryError::Fatal(source) => TtsError::Fatal {
            provider: provider.to_string(),
            source,
        },
        RetryError::Exhausted { attempts, last } => TtsError::Exhausted {
            provider: provider.to_string(),
            attempts,
            last,
        },
        RetryError::Cancelled => TtsError::Cancelled,
    }
}

async fn write_chunk(out_dir: &Path, stem: &str, chunk: &AudioChunk) -> Result<PathBuf, TtsError> {
    let path = out_dir.join(format!("{}.{}", stem, chunk.encoding.extension()));
    let bytes = match chunk.encoding {
        AudioEncoding::Mp3 => chunk.data.clone(),
        AudioEncoding::Pcm {
            sample_rate,
            channels,
        } => pcm_to_wav(&chunk.data, sample_rate, channels)
            .map_err(|e| TtsError::Io(format!("WAV encoding failed: {}", e)))?,
    };
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| TtsError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(path)
}

/// Wrap raw s16le PCM in a WAV container so the assembler can read it.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buffer = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
        for sample in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(buffer.into_inner())
}
