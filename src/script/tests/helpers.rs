use crate::script::interface::{
    Completion, CompletionRequest, ScriptBackend, ScriptOptions, TokenUsage,
};
use crate::utils::http::ProviderError;
use crate::utils::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ── Scripted fake backend ───────────────────────────────────

/// Replays queued responses in order; once the queue is empty, repeats `fallback`.
pub struct FakeBackend {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Result<String, ProviderError>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeBackend {
    pub fn new(
        responses: Vec<Result<String, ProviderError>>,
        fallback: Result<String, ProviderError>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(response: Result<String, ProviderError>) -> Self {
        Self::new(Vec::new(), response)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptBackend for FakeBackend {
    fn id(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map(|text| Completion {
            text,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }
}

// ── Fixtures ────────────────────────────────────────────────

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(5), 2.0)
}

pub fn options(refine: bool) -> ScriptOptions {
    ScriptOptions {
        refine: Some(refine),
        ..ScriptOptions::default()
    }
}

/// A valid script JSON for the default hosts with `n` alternating segments.
pub fn script_json(n: usize) -> String {
    let segments: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "speaker": if i % 2 == 0 { "Alex" } else { "Sam" },
                "text": format!("Line number {} with a few words.", i),
            })
        })
        .collect();
    serde_json::json!({
        "title": "Test Episode",
        "summary": "A summary",
        "segments": segments,
    })
    .to_string()
}

pub fn transient() -> ProviderError {
    ProviderError::Network("connection reset".into())
}
