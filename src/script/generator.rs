//! Script Generator: backend-agnostic retry, validation and refinement.

use super::extract::parse_script;
use super::interface::{
    Completion, Script, ScriptBackend, ScriptError, ScriptOptions, TokenUsage,
};
use super::prompts::{generation_request, revision_request};
use super::refine::review;
use super::validate::{normalize_speakers, validate_script};
use crate::utils::retry::{retry_with_backoff, RetryError, RetryPolicy};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const MAX_HOSTS: usize = 3;

/// A validated script plus what it cost to produce.
#[derive(Debug, Clone)]
pub struct GeneratedScript {
    pub script: Script,
    pub usage: TokenUsage,
    /// Backend calls made, including failed attempts and the revision call.
    pub calls: u32,
    pub refined: bool,
}

#[derive(Default)]
struct Tally {
    usage: TokenUsage,
    calls: u32,
}

pub struct ScriptGenerator {
    backend: Arc<dyn ScriptBackend>,
    policy: RetryPolicy,
    banned_phrases: Vec<String>,
    refine_by_default: bool,
}

impl ScriptGenerator {
    pub fn new(backend: Arc<dyn ScriptBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            banned_phrases: Vec::new(),
            refine_by_default: false,
        }
    }

    pub fn with_banned_phrases(mut self, phrases: Vec<String>) -> Self {
        self.banned_phrases = phrases;
        self
    }

    pub fn with_refine_default(mut self, refine: bool) -> Self {
        self.refine_by_default = refine;
        self
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    /// Produce a validated script from source text.
    ///
    /// Transport failures and unusable output share one attempt budget. When
    /// refinement is on and the draft trips a heuristic, exactly one revision
    /// call follows; a revision that fails or does not validate keeps the draft.
    pub async fn generate(
        &self,
        content: &str,
        options: &ScriptOptions,
        cancel: &CancellationToken,
    ) -> Result<GeneratedScript, ScriptError> {
        check_hosts(&options.hosts)?;

        let request = generation_request(content, options);
        let tally = Mutex::new(Tally::default());

        let backend = &self.backend;
        let hosts = options.hosts.as_slice();
        let request_ref = &request;
        let tally_ref = &tally;

        let draft = retry_with_backoff(&self.policy, cancel, backend.id(), move |attempt| async move {
            tracing::debug!(backend = backend.id(), attempt, "requesting script draft");
            let completion = backend.complete(request_ref).await;
            record(tally_ref, completion.as_ref().ok());
            accept(&completion?.text, hosts)
        })
        .await
        .map_err(|e| match e {
            RetryError::Fatal(err) => err,
            RetryError::Exhausted { attempts, last } => ScriptError::Exhausted {
                attempts,
                last: last.to_string(),
            },
            RetryError::Cancelled => ScriptError::Cancelled,
        })?;

        let mut result = GeneratedScript {
            script: draft,
            usage: TokenUsage::default(),
            calls: 0,
            refined: false,
        };

        if options.refine.unwrap_or(self.refine_by_default) {
            self.refine(&mut result, options, cancel, &tally).await?;
        }

        let tally = tally.into_inner().unwrap_or_else(|p| p.into_inner());
        result.usage = tally.usage;
        result.calls = tally.calls;

        tracing::info!(
            backend = self.backend.id(),
            segments = result.script.segments.len(),
            calls = result.calls,
            refined = result.refined,
            "script generated"
        );
        Ok(result)
    }

    async fn refine(
        &self,
        result: &mut GeneratedScript,
        options: &ScriptOptions,
        cancel: &CancellationToken,
        tally: &Mutex<Tally>,
    ) -> Result<(), ScriptError> {
        let issues = review(
            &result.script,
            &options.hosts,
            options.length,
            &self.banned_phrases,
        );
        if issues.is_empty() {
            return Ok(());
        }

        tracing::info!(
            backend = self.backend.id(),
            issues = issues.len(),
            "draft needs revision"
        );
        let request = revision_request(&result.script, &issues, options);

        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScriptError::Cancelled),
            completion = self.backend.complete(&request) => completion,
        };
        record(tally, completion.as_ref().ok());

        let revised = completion
            .map_err(ScriptError::from)
            .and_then(|c| accept(&c.text, &options.hosts));
        match revised {
            Ok(script) => {
                result.script = script;
                result.refined = true;
            }
            Err(e) => {
                tracing::warn!(backend = self.backend.id(), error = %e, "revision unusable, keeping draft");
            }
        }
        Ok(())
    }
}

fn record(tally: &Mutex<Tally>, completion: Option<&Completion>) {
    let mut tally = tally.lock().unwrap_or_else(|p| p.into_inner());
    tally.calls += 1;
    if let Some(c) = completion {
        tally.usage += c.usage;
    }
}

fn accept(raw: &str, hosts: &[String]) -> Result<Script, ScriptError> {
    let mut script = parse_script(raw).map_err(ScriptError::InvalidOutput)?;
    normalize_speakers(&mut script, hosts);
    validate_script(&script, hosts).map_err(|v| ScriptError::InvalidOutput(v.to_string()))?;
    Ok(script)
}

fn check_hosts(hosts: &[String]) -> Result<(), ScriptError> {
    if hosts.is_empty() || hosts.len() > MAX_HOSTS {
        return Err(ScriptError::Fatal(format!(
            "between 1 and {} hosts are required, got {}",
            MAX_HOSTS,
            hosts.len()
        )));
    }
    if hosts.iter().any(|h| h.trim().is_empty()) {
        return Err(ScriptError::Fatal("host names must not be blank".to_string()));
    }
    Ok(())
}
