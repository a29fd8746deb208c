use crate::assembly::{AssemblyError, AudioAssembler};
use crate::ingest::{IngestError, Ingester};
use crate::pipeline::orchestrator::{Backends, PipelineSettings};
use crate::pipeline::progress::{ProgressEvent, ProgressSink};
use crate::pipeline::request::GenerationRequest;
use crate::script::generator::ScriptGenerator;
use crate::script::interface::{
    Completion, CompletionRequest, ScriptBackend, ScriptError, TokenUsage,
};
use crate::tts::interface::{
    AudioChunk, AudioEncoding, TtsError, TtsProvider, TtsProviderKind, TtsTuning, Voice,
};
use crate::tts::manager::Synthesizer;
use crate::tts::voice_registry::VoiceRegistry;
use crate::utils::http::ProviderError;
use crate::utils::retry::RetryPolicy;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

// ── Script backend ──────────────────────────────────────────

pub struct FakeScript {
    response: Result<String, ProviderError>,
    calls: AtomicU32,
}

impl FakeScript {
    pub fn returning(response: Result<String, ProviderError>) -> Self {
        Self {
            response,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptBackend for FakeScript {
    fn id(&self) -> &str {
        "fake-llm"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone().map(|text| Completion {
            text,
            usage: TokenUsage {
                input_tokens: 120,
                output_tokens: 80,
            },
        })
    }
}

// ── TTS provider ────────────────────────────────────────────

/// Claims to be `openai`; returns each segment's text as its "audio".
pub struct FakeTts {
    fail: Option<ProviderError>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicU32,
    texts: Mutex<Vec<String>>,
}

impl FakeTts {
    pub fn healthy() -> Self {
        Self {
            fail: None,
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicU32::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            fail: Some(error),
            ..Self::healthy()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::healthy()
        }
    }

    /// Every call waits until the gate has permits.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::healthy()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsProvider for FakeTts {
    fn id(&self) -> &str {
        "openai"
    }

    fn default_voices(&self) -> Vec<Voice> {
        vec![
            Voice::new(TtsProviderKind::OpenAi, "alloy", "Alloy"),
            Voice::new(TtsProviderKind::OpenAi, "nova", "Nova"),
            Voice::new(TtsProviderKind::OpenAi, "onyx", "Onyx"),
        ]
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &Voice,
        _tuning: &TtsTuning,
    ) -> Result<AudioChunk, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        self.texts.lock().unwrap().push(text.to_string());
        Ok(AudioChunk {
            data: text.as_bytes().to_vec(),
            encoding: AudioEncoding::Mp3,
        })
    }
}

// ── Ingester & assembler ────────────────────────────────────

pub struct FakeIngester {
    text: String,
}

#[async_trait]
impl Ingester for FakeIngester {
    async fn extract(&self, locator: &str) -> Result<String, IngestError> {
        if locator.starts_with("missing:") {
            return Err(IngestError::Unreachable(locator.to_string()));
        }
        Ok(self.text.clone())
    }
}

/// Concatenates input bytes, or fails like a crashed ffmpeg.
pub struct FakeAssembler {
    fail: bool,
    runs: AtomicU32,
}

impl FakeAssembler {
    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioAssembler for FakeAssembler {
    async fn concatenate(
        &self,
        files: &[PathBuf],
        _silence_ms: u64,
        output: &Path,
    ) -> Result<(), AssemblyError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AssemblyError::Failed {
                program: "ffmpeg".into(),
                status: "exit status: 1".into(),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        let mut joined = Vec::new();
        for file in files {
            joined.extend(tokio::fs::read(file).await.unwrap());
        }
        tokio::fs::write(output, joined).await.unwrap();
        Ok(())
    }

    async fn probe_duration(&self, _file: &Path) -> Result<String, AssemblyError> {
        Ok("0:42".to_string())
    }
}

// ── Backends ────────────────────────────────────────────────

pub struct FakeBackends {
    pub script: Arc<FakeScript>,
    pub tts: Arc<FakeTts>,
    pub ingester: FakeIngester,
    pub assembler: FakeAssembler,
    pub script_policy: RetryPolicy,
    pub tts_policy: RetryPolicy,
}

impl FakeBackends {
    pub fn healthy() -> Self {
        Self {
            script: Arc::new(FakeScript::returning(Ok(script_json(4)))),
            tts: Arc::new(FakeTts::healthy()),
            ingester: FakeIngester { text: long_text() },
            assembler: FakeAssembler {
                fail: false,
                runs: AtomicU32::new(0),
            },
            script_policy: fast_policy(3),
            tts_policy: fast_policy(5),
        }
    }

    pub fn with_tts(mut self, tts: FakeTts) -> Self {
        self.tts = Arc::new(tts);
        self
    }

    pub fn with_script(mut self, script: FakeScript) -> Self {
        self.script = Arc::new(script);
        self
    }

    pub fn with_failing_assembler(mut self) -> Self {
        self.assembler.fail = true;
        self
    }

    pub fn with_tts_policy(mut self, policy: RetryPolicy) -> Self {
        self.tts_policy = policy;
        self
    }
}

impl Backends for FakeBackends {
    fn ingester(&self) -> &dyn Ingester {
        &self.ingester
    }

    fn assembler(&self) -> &dyn AudioAssembler {
        &self.assembler
    }

    fn script_generator(&self, _request: &GenerationRequest) -> Result<ScriptGenerator, ScriptError> {
        Ok(ScriptGenerator::new(
            self.script.clone(),
            self.script_policy.clone(),
        ))
    }

    fn synthesizer(
        &self,
        request: &GenerationRequest,
        hosts: &[String],
    ) -> Result<Synthesizer, TtsError> {
        let mut registry = VoiceRegistry::new();
        registry.register_provider(self.tts.as_ref());
        let assignment = registry.assign(hosts, &request.voices, "openai")?;
        Ok(Synthesizer::from_parts(
            self.tts.clone(),
            Vec::new(),
            assignment,
            self.tts_policy.clone(),
        ))
    }
}

// ── Progress sink ───────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ── Fixtures ────────────────────────────────────────────────

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(5), 2.0)
}

pub fn settings(work_dir: &Path) -> PipelineSettings {
    PipelineSettings {
        silence_ms: 0,
        min_chars: 50,
        work_dir: Some(work_dir.to_path_buf()),
    }
}

pub fn long_text() -> String {
    "The tide rises twice a day because the moon pulls on the oceans. ".repeat(10)
}

/// A valid script JSON for the default hosts with `n` alternating segments.
pub fn script_json(n: usize) -> String {
    serde_json::to_string(&script(n)).unwrap()
}

pub fn script(n: usize) -> crate::script::interface::Script {
    use crate::script::interface::{Script, Segment};
    Script {
        title: "Tides".to_string(),
        summary: "Why the sea moves".to_string(),
        segments: (0..n)
            .map(|i| {
                Segment::new(
                    if i % 2 == 0 { "Alex" } else { "Sam" },
                    format!("Line {} about the tides.", i),
                )
            })
            .collect(),
    }
}

pub fn transient() -> ProviderError {
    ProviderError::Network("connection reset".into())
}
