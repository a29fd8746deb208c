use super::helpers::*;
use crate::ingest::IngestError;
use crate::pipeline::orchestrator::{Pipeline, PipelineError};
use crate::pipeline::progress::Stage;
use crate::pipeline::request::{ContentInput, GenerationRequest};
use crate::tts::interface::TtsError;
use crate::tts::router::SynthesisStrategy;
use crate::utils::http::ProviderError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn pipeline(backends: &Arc<FakeBackends>, work: &Path) -> Pipeline {
    Pipeline::new(backends.clone(), settings(work))
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

// ── Happy paths ─────────────────────────────────────────────

#[tokio::test]
async fn test_text_input_produces_episode_in_script_order() {
    let tmp = TempDir::new().unwrap();
    let work = tmp.path().join("work");
    let output = tmp.path().join("out").join("episode.mp3");
    let backends = Arc::new(FakeBackends::healthy());
    let sink = RecordingSink::default();

    let result = pipeline(&backends, &work)
        .run(
            &GenerationRequest::from_text(long_text()),
            &output,
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let audio = std::fs::read_to_string(&output).unwrap();
    let expected: String = (0..4).map(|i| format!("Line {} about the tides.", i)).collect();
    assert_eq!(audio, expected);
    assert_eq!(result.duration, "0:42");
    assert_eq!(result.size_bytes, expected.len() as u64);
    assert_eq!(result.strategy, SynthesisStrategy::PerSegment);
    assert_eq!(result.usage.script_backend.as_deref(), Some("fake-llm"));
    assert_eq!(result.usage.script_calls, 1);
    assert_eq!(result.usage.input_tokens, 120);
    assert_eq!(result.usage.tts_provider.as_deref(), Some("openai"));
    assert_eq!(result.usage.tts_calls, 4);
    assert!(dir_is_empty(&work), "scratch workspace must be removed");
}

#[tokio::test]
async fn test_progress_is_monotonic_and_reports_every_segment() {
    let tmp = TempDir::new().unwrap();
    let backends = Arc::new(FakeBackends::healthy());
    let sink = RecordingSink::default();

    pipeline(&backends, tmp.path())
        .run(
            &GenerationRequest::from_text(long_text()),
            &tmp.path().join("episode.mp3"),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = sink.events();
    for pair in events.windows(2) {
        assert!(pair[1].progress >= pair[0].progress, "{:?}", pair);
        assert!(pair[0].stage.can_transition_to(pair[1].stage));
    }
    let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
    for stage in [
        Stage::Ingesting,
        Stage::Scripting,
        Stage::Synthesizing,
        Stage::Assembling,
    ] {
        assert!(stages.contains(&stage), "missing {}", stage);
    }
    let segment_events = events
        .iter()
        .filter(|e| e.message.starts_with("synthesized segment"))
        .count();
    assert_eq!(segment_events, 4);
}

#[tokio::test]
async fn test_existing_script_skips_ingest_and_generation() {
    let tmp = TempDir::new().unwrap();
    let backends = Arc::new(FakeBackends::healthy());
    let sink = RecordingSink::default();
    let request = GenerationRequest::new(ContentInput::Script(script(3)));

    let result = pipeline(&backends, tmp.path())
        .run(
            &request,
            &tmp.path().join("episode.mp3"),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(backends.script.calls(), 0);
    assert_eq!(result.usage.script_calls, 0);
    assert_eq!(result.usage.script_backend, None);
    assert_eq!(sink.events()[0].stage, Stage::Synthesizing);
    assert_eq!(backends.tts.calls(), 3);
}

#[tokio::test]
async fn test_source_locator_goes_through_ingester() {
    let tmp = TempDir::new().unwrap();
    let backends = Arc::new(FakeBackends::healthy());
    let request = GenerationRequest::new(ContentInput::Source("https://example.com/a".into()));

    pipeline(&backends, tmp.path())
        .run(
            &request,
            &tmp.path().join("episode.mp3"),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(backends.script.calls(), 1);

    let request = GenerationRequest::new(ContentInput::Source("missing:thing".into()));
    let err = pipeline(&backends, tmp.path())
        .run(
            &request,
            &tmp.path().join("other.mp3"),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Ingest(IngestError::Unreachable(_))));
}

// ── Failures ────────────────────────────────────────────────

#[tokio::test]
async fn test_assembly_failure_leaves_no_partial_output() {
    let tmp = TempDir::new().unwrap();
    let work = tmp.path().join("work");
    let out_dir = tmp.path().join("out");
    let backends = Arc::new(FakeBackends::healthy().with_failing_assembler());

    let err = pipeline(&backends, &work)
        .run(
            &GenerationRequest::from_text(long_text()),
            &out_dir.join("episode.mp3"),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Assembly(_)));
    assert!(err.to_string().contains("Invalid data"));
    assert!(dir_is_empty(&out_dir), "staged output must be discarded");
    assert!(dir_is_empty(&work));
}

#[tokio::test]
async fn test_short_text_is_rejected_before_any_call() {
    let tmp = TempDir::new().unwrap();
    let backends = Arc::new(FakeBackends::healthy());

    let err = pipeline(&backends, tmp.path())
        .run(
            &GenerationRequest::from_text("Too short."),
            &tmp.path().join("episode.mp3"),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Ingest(IngestError::TooShort { .. })));
    assert_eq!(backends.script.calls(), 0);
}

#[tokio::test]
async fn test_fatal_tts_error_is_not_retried() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("episode.mp3");
    let backends = Arc::new(FakeBackends::healthy().with_tts(FakeTts::failing(
        ProviderError::Fatal {
            status: 401,
            body: "invalid api key".into(),
        },
    )));

    let err = pipeline(&backends, tmp.path())
        .run(
            &GenerationRequest::from_text(long_text()),
            &output,
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Tts(TtsError::Fatal { .. })));
    assert!(err.to_string().contains("invalid api key"));
    assert_eq!(backends.tts.calls(), 1);
    assert!(!output.exists());
    assert_eq!(backends.assembler.runs(), 0);
}

#[tokio::test]
async fn test_invalid_script_output_exhausts_shared_budget() {
    let tmp = TempDir::new().unwrap();
    let backends = Arc::new(
        FakeBackends::healthy().with_script(FakeScript::returning(Ok("no json here".into()))),
    );

    let err = pipeline(&backends, tmp.path())
        .run(
            &GenerationRequest::from_text(long_text()),
            &tmp.path().join("episode.mp3"),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Script(crate::script::interface::ScriptError::Exhausted { attempts: 3, .. })
    ));
    assert_eq!(backends.script.calls(), 3);
    assert_eq!(backends.tts.calls(), 0);
}

// ── Cancellation ────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_token_stops_before_first_phase() {
    let tmp = TempDir::new().unwrap();
    let backends = Arc::new(FakeBackends::healthy());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline(&backends, tmp.path())
        .run(
            &GenerationRequest::from_text(long_text()),
            &tmp.path().join("episode.mp3"),
            &RecordingSink::default(),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(backends.script.calls(), 0);
    assert_eq!(backends.tts.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_synthesis() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("episode.mp3");
    let backends =
        Arc::new(FakeBackends::healthy().with_tts(FakeTts::slow(Duration::from_secs(30))));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = pipeline(&backends, tmp.path())
        .run(
            &GenerationRequest::from_text(long_text()),
            &output,
            &RecordingSink::default(),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(backends.tts.calls(), 1);
    assert!(!output.exists());
}
