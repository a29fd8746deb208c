use super::helpers::*;
use crate::script::generator::ScriptGenerator;
use crate::script::interface::{ScriptError, ScriptOptions};
use crate::utils::http::ProviderError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn generator(backend: &Arc<FakeBackend>, attempts: u32) -> ScriptGenerator {
    ScriptGenerator::new(backend.clone(), fast_policy(attempts))
}

// ── Retry budget ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let backend = Arc::new(FakeBackend::new(
        vec![Err(transient()), Err(transient())],
        Ok(script_json(24)),
    ));
    let out = generator(&backend, 3)
        .generate("source", &options(false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 3);
    assert_eq!(out.calls, 3);
    assert_eq!(out.script.segments.len(), 24);
    assert_eq!(out.usage.input_tokens, 100, "only successful calls report usage");
}

#[tokio::test(start_paused = true)]
async fn test_empty_response_consumes_budget() {
    let backend = Arc::new(FakeBackend::always(Ok(String::new())));
    let err = generator(&backend, 3)
        .generate("source", &options(false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::Exhausted { attempts: 3, .. }), "{}", err);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_speaker_is_retried() {
    let bad = r#"{"title":"T","segments":[{"speaker":"Alex","text":"hi"},{"speaker":"Narrator","text":"..."}]}"#;
    let backend = Arc::new(FakeBackend::new(vec![Ok(bad.to_string())], Ok(script_json(24))));
    let out = generator(&backend, 3)
        .generate("source", &options(false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 2);
    assert!(out.script.segments.iter().all(|s| s.speaker == "Alex" || s.speaker == "Sam"));
}

#[tokio::test(start_paused = true)]
async fn test_blank_segment_exhausts_budget() {
    let bad = r#"{"title":"T","segments":[{"speaker":"Alex","text":"hi"},{"speaker":"Sam","text":"   "}]}"#;
    let backend = Arc::new(FakeBackend::always(Ok(bad.to_string())));
    let err = generator(&backend, 2)
        .generate("source", &options(false), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ScriptError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(last.contains("blank"), "{}", last);
        }
        other => panic!("expected Exhausted, got {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_request_is_not_retried() {
    let backend = Arc::new(FakeBackend::always(Err(ProviderError::Fatal {
        status: 401,
        body: "invalid api key".into(),
    })));
    let err = generator(&backend, 3)
        .generate("source", &options(false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::Fatal(ref m) if m.contains("invalid api key")));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start() {
    let backend = Arc::new(FakeBackend::always(Ok(script_json(24))));
    let token = CancellationToken::new();
    token.cancel();
    let err = generator(&backend, 3)
        .generate("source", &options(false), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::Cancelled));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_too_many_hosts_rejected_without_calls() {
    let backend = Arc::new(FakeBackend::always(Ok(script_json(24))));
    let opts = ScriptOptions {
        hosts: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        ..ScriptOptions::default()
    };
    let err = generator(&backend, 3)
        .generate("source", &opts, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::Fatal(_)));
    assert_eq!(backend.calls(), 0);
}

// ── Refinement ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_refine_skipped_when_draft_is_fine() {
    let backend = Arc::new(FakeBackend::always(Ok(script_json(24))));
    let out = generator(&backend, 3)
        .generate("source", &options(true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert!(!out.refined);
}

#[tokio::test(start_paused = true)]
async fn test_refine_makes_exactly_one_revision() {
    // 4 segments is far below the medium target of 24.
    let backend = Arc::new(FakeBackend::new(
        vec![Ok(script_json(4)), Ok(script_json(6))],
        Ok(script_json(24)),
    ));
    let out = generator(&backend, 3)
        .generate("source", &options(true), &CancellationToken::new())
        .await
        .unwrap();

    // The revision is still off target, but there is never a second revision.
    assert_eq!(backend.calls(), 2);
    assert!(out.refined);
    assert_eq!(out.script.segments.len(), 6);
    assert_eq!(out.usage.output_tokens, 100);
    assert!(backend.requests()[1].user.contains("Draft:"));
}

#[tokio::test(start_paused = true)]
async fn test_unusable_revision_keeps_draft() {
    let backend = Arc::new(FakeBackend::new(
        vec![Ok(script_json(4)), Ok("sorry, no".to_string())],
        Err(transient()),
    ));
    let out = generator(&backend, 3)
        .generate("source", &options(true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 2);
    assert!(!out.refined);
    assert_eq!(out.script.segments.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_revision_call_is_not_retried() {
    let backend = Arc::new(FakeBackend::new(vec![Ok(script_json(4))], Err(transient())));
    let out = generator(&backend, 3)
        .generate("source", &options(true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 2);
    assert_eq!(out.calls, 2);
    assert!(!out.refined);
}

#[tokio::test(start_paused = true)]
async fn test_refine_default_comes_from_generator() {
    let backend = Arc::new(FakeBackend::new(
        vec![Ok(script_json(4)), Ok(script_json(24))],
        Err(transient()),
    ));
    let opts = ScriptOptions::default();
    let out = generator(&backend, 3)
        .with_refine_default(true)
        .generate("source", &opts, &CancellationToken::new())
        .await
        .unwrap();

    assert!(out.refined);
    assert_eq!(out.script.segments.len(), 24);
}
