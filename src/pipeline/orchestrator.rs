//! Pipeline Orchestrator: Ingest → Script → Synthesize → Assemble for one job.

use super::progress::{ProgressEvent, ProgressSink, Stage};
use super::request::{ContentInput, GenerationRequest, InvalidRequest};
use super::usage::UsageCounters;
use super::workspace::Workspace;
use crate::assembly::{AssemblyError, AudioAssembler};
use crate::ingest::{ensure_length, IngestError, Ingester};
use crate::script::config::ScriptSystemConfig;
use crate::script::generator::{GeneratedScript, ScriptGenerator};
use crate::script::interface::{Script, ScriptError, TokenUsage};
use crate::script::service::build_generator;
use crate::script::validate::validate_script;
use crate::tts::config::TtsSystemConfig;
use crate::tts::interface::TtsError;
use crate::tts::manager::{SynthesisObserver, Synthesizer, TtsService};
use crate::tts::router::SynthesisStrategy;

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ── Errors ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequest),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Tts(#[from] TtsError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("workspace error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Script(ScriptError::Cancelled)
                | PipelineError::Tts(TtsError::Cancelled)
        )
    }
}

// ── Collaborators ──────────────────────────────────────

/// Builds the per-request collaborators. The engine wires real adapters;
/// tests hand in fakes.
pub trait Backends: Send + Sync {
    fn ingester(&self) -> &dyn Ingester;

    fn assembler(&self) -> &dyn AudioAssembler;

    fn script_generator(&self, request: &GenerationRequest) -> Result<ScriptGenerator, ScriptError>;

    fn synthesizer(
        &self,
        request: &GenerationRequest,
        hosts: &[String],
    ) -> Result<Synthesizer, TtsError>;
}

/// Config-driven collaborators used by the binary.
pub struct EngineBackends {
    script: ScriptSystemConfig,
    tts: TtsService,
    ingester: Arc<dyn Ingester>,
    assembler: Arc<dyn AudioAssembler>,
}

impl EngineBackends {
    pub fn new(
        script: ScriptSystemConfig,
        tts: TtsSystemConfig,
        ingester: Arc<dyn Ingester>,
        assembler: Arc<dyn AudioAssembler>,
    ) -> Self {
        Self {
            script,
            tts: TtsService::new(tts),
            ingester,
            assembler,
        }
    }
}

impl Backends for EngineBackends {
    fn ingester(&self) -> &dyn Ingester {
        self.ingester.as_ref()
    }

    fn assembler(&self) -> &dyn AudioAssembler {
        self.assembler.as_ref()
    }

    fn script_generator(&self, request: &GenerationRequest) -> Result<ScriptGenerator, ScriptError> {
        let name = request
            .options
            .backend
            .as_deref()
            .unwrap_or(&self.script.default_backend)
            .trim()
            .to_ascii_lowercase();
        let key = request.api_keys.get(&name).map(String::as_str);
        build_generator(&self.script, Some(&name), key)
    }

    fn synthesizer(
        &self,
        request: &GenerationRequest,
        hosts: &[String],
    ) -> Result<Synthesizer, TtsError> {
        self.tts.prepare(
            hosts,
            &request.voices,
            request.tts_provider.as_deref(),
            &request.api_keys,
        )
    }
}

// ── Settings & Output ──────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub silence_ms: u64,
    /// Minimum source length, applied to inline text and ingested sources alike.
    pub min_chars: usize,
    /// Parent for scratch workspaces. System temp dir when `None`.
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            silence_ms: 300,
            min_chars: 200,
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub script: Script,
    pub refined: bool,
    pub audio_path: PathBuf,
    pub duration: String,
    pub size_bytes: u64,
    pub strategy: SynthesisStrategy,
    pub usage: UsageCounters,
}

// ── Pipeline ───────────────────────────────────────────

pub struct Pipeline {
    backends: Arc<dyn Backends>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(backends: Arc<dyn Backends>, settings: PipelineSettings) -> Self {
        Self { backends, settings }
    }

    /// Run every phase for `request`, writing the episode to `output`.
    ///
    /// `output` only appears once the whole run has succeeded. A request that
    /// carries a finished script goes straight to synthesis.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        output: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        request.validate()?;
        let text = match &request.content {
            ContentInput::Script(script) => {
                return self
                    .run_from_script(script.clone(), request, output, sink, cancel)
                    .await
            }
            ContentInput::Text(text) => {
                sink.emit(ProgressEvent::enter(Stage::Ingesting, "reading text"))
                    .await;
                let text = text.trim().to_string();
                ensure_length(&text, self.settings.min_chars)?;
                text
            }
            ContentInput::Source(locator) => {
                sink.emit(ProgressEvent::enter(
                    Stage::Ingesting,
                    format!("fetching {}", locator),
                ))
                .await;
                let text = guarded(cancel, self.backends.ingester().extract(locator)).await?;
                ensure_length(&text, self.settings.min_chars)?;
                text
            }
        };

        let workspace = Workspace::create(self.settings.work_dir.as_deref())?;

        check_cancel(cancel)?;
        sink.emit(ProgressEvent::enter(Stage::Scripting, "writing script"))
            .await;
        let generator = self.backends.script_generator(request)?;
        let generated = guarded(
            cancel,
            generator.generate(&text, &request.options, cancel),
        )
        .await?;
        sink.emit(ProgressEvent::within(
            Stage::Scripting,
            1.0,
            format!("script ready: {} segments", generated.script.segments.len()),
        ))
        .await;

        let draft = Draft {
            hosts: request.options.hosts.clone(),
            script_backend: Some(generator.backend_id().to_string()),
            generated,
        };
        self.voice_and_assemble(draft, request, &workspace, output, sink, cancel)
            .await
    }

    /// Second entry mode: voice an existing script. No ingestion or script calls.
    pub async fn run_from_script(
        &self,
        script: Script,
        request: &GenerationRequest,
        output: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let hosts: Vec<String> = script.speakers().into_iter().map(str::to_string).collect();
        validate_script(&script, &hosts)
            .map_err(|e| InvalidRequest(format!("script: {}", e)))?;

        let workspace = Workspace::create(self.settings.work_dir.as_deref())?;
        let draft = Draft {
            hosts,
            script_backend: None,
            generated: GeneratedScript {
                script,
                usage: TokenUsage::default(),
                calls: 0,
                refined: false,
            },
        };
        self.voice_and_assemble(draft, request, &workspace, output, sink, cancel)
            .await
    }

    async fn voice_and_assemble(
        &self,
        draft: Draft,
        request: &GenerationRequest,
        workspace: &Workspace,
        output: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let Draft {
            hosts,
            script_backend,
            generated:
                GeneratedScript {
                    script,
                    usage: tokens,
                    calls,
                    refined,
                },
        } = draft;
        let mut usage = UsageCounters {
            script_backend,
            script_calls: calls,
            input_tokens: tokens.input_tokens,
            output_tokens: tokens.output_tokens,
            ..UsageCounters::default()
        };

        // ── Synthesize ──
        check_cancel(cancel)?;
        sink.emit(ProgressEvent::enter(
            Stage::Synthesizing,
            format!("voicing {} segments", script.segments.len()),
        ))
        .await;
        let synthesizer = self.backends.synthesizer(request, &hosts)?;
        let segments_dir = workspace.segments_dir()?;
        let observer = SegmentProgress { sink };
        let synthesis = guarded(
            cancel,
            synthesizer.synthesize_script(&script, &request.tuning, &segments_dir, &observer, cancel),
        )
        .await?;
        usage.tts_provider = Some(synthesizer.provider_id().to_string());
        usage.tts_calls = synthesis.calls;
        usage.tts_characters = synthesis.characters;

        // ── Assemble ──
        check_cancel(cancel)?;
        sink.emit(ProgressEvent::enter(
            Stage::Assembling,
            format!("joining {} audio files", synthesis.files.len()),
        ))
        .await;
        let staged = stage_output(output)?;
        let assembler = self.backends.assembler();
        guarded(
            cancel,
            assembler.concatenate(&synthesis.files, self.settings.silence_ms, staged.path()),
        )
        .await?;
        let duration = guarded(cancel, assembler.probe_duration(staged.path())).await?;
        let size_bytes = tokio::fs::metadata(staged.path()).await?.len();

        check_cancel(cancel)?;
        staged.persist(output).map_err(|e| PipelineError::Io(e.error))?;
        sink.emit(ProgressEvent::within(
            Stage::Assembling,
            1.0,
            format!("episode assembled ({})", duration),
        ))
        .await;

        tracing::info!(
            output = %output.display(),
            duration = %duration,
            size_bytes,
            strategy = ?synthesis.strategy,
            "episode assembled"
        );

        Ok(PipelineOutput {
            script,
            refined,
            audio_path: output.to_path_buf(),
            duration,
            size_bytes,
            strategy: synthesis.strategy,
            usage,
        })
    }
}

// ── Helpers ────────────────────────────────────────────

/// A script ready for voicing plus the host set its voices are drawn for.
struct Draft {
    hosts: Vec<String>,
    script_backend: Option<String>,
    generated: GeneratedScript,
}

/// Hidden temp file next to `output`, so the final rename stays on one filesystem.
fn stage_output(output: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    tempfile::Builder::new()
        .prefix(".podcast-")
        .suffix(".part")
        .tempfile_in(parent)
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Race one phase against cancellation.
async fn guarded<T, E, F>(cancel: &CancellationToken, phase: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    check_cancel(cancel)?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = phase => result.map_err(PipelineError::from),
    }
}

/// Maps per-segment completion onto the synthesizing band.
struct SegmentProgress<'a> {
    sink: &'a dyn ProgressSink,
}

#[async_trait]
impl SynthesisObserver for SegmentProgress<'_> {
    async fn segment_done(&self, done: usize, total: usize) {
        let fraction = done as f64 / total.max(1) as f64;
        self.sink
            .emit(ProgressEvent::within(
                Stage::Synthesizing,
                fraction,
                format!("synthesized segment {}/{}", done, total),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_recognised_through_wrappers() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(PipelineError::Script(ScriptError::Cancelled).is_cancelled());
        assert!(PipelineError::Tts(TtsError::Cancelled).is_cancelled());
        assert!(!PipelineError::Assembly(AssemblyError::NoInputs).is_cancelled());
    }

    #[test]
    fn staged_file_is_hidden_sibling() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out").join("episode.mp3");
        let staged = stage_output(&output).unwrap();
        assert_eq!(staged.path().parent(), output.parent());
        let name = staged.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".podcast-"));
    }
}
