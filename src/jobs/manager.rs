//! Async Task Manager: admission, one worker per job, cancellation and shutdown.
//!
//! Admission is a counter and a cancel-handle map behind one mutex. A job
//! reserves its slot before any record exists, so a rejected submission
//! leaves nothing behind. Every worker owns a [`SlotGuard`] whose drop gives
//! the slot back, whichever way the worker ends.

use super::config::JobsConfig;
use super::model::{new_job_id, Job, JobArtifacts, JobPage};
use super::store::{JobStore, StoreError};
use super::throttle::ThrottledStoreSink;
use crate::pipeline::orchestrator::{Pipeline, PipelineOutput};
use crate::pipeline::progress::{ProgressEvent, ProgressSink, Stage};
use crate::pipeline::request::{GenerationRequest, InvalidRequest};
use crate::pipeline::usage::PricingConfig;
use crate::storage::{ObjectStorage, StorageError, StoredObject};

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::{task_tracker::TaskTrackerToken, TaskTracker};

pub const CANCELLED_BY_REQUEST: &str = "cancelled by request";
pub const SHUTDOWN_REASON: &str = "shutdown: the engine stopped before this job finished";
pub const INTERRUPTED_REASON: &str = "interrupted: the engine restarted before this job finished";

// ── Errors ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at capacity: {running} of {limit} jobs already running")]
pub struct CapacityError {
    pub running: usize,
    pub limit: usize,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Invalid(#[from] InvalidRequest),
    #[error("the engine is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a worker did not reach `Complete`.
enum JobFailure {
    Cancelled,
    Error(String),
}

impl From<StorageError> for JobFailure {
    fn from(e: StorageError) -> Self {
        JobFailure::Error(format!("upload failed: {}", e))
    }
}

impl From<StoreError> for JobFailure {
    fn from(e: StoreError) -> Self {
        JobFailure::Error(e.to_string())
    }
}

impl From<std::io::Error> for JobFailure {
    fn from(e: std::io::Error) -> Self {
        JobFailure::Error(e.to_string())
    }
}

// ── Settings ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_concurrent_jobs: usize,
    pub progress_interval: Duration,
    pub shutdown_write_timeout: Duration,
    /// Per-job output directories live under here until uploaded.
    pub output_dir: PathBuf,
}

impl ManagerSettings {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            progress_interval: config.progress_interval(),
            shutdown_write_timeout: config.shutdown_write_timeout(),
            output_dir: config.work_dir.join("jobs"),
        }
    }
}

// ── Registry ───────────────────────────────────────────

#[derive(Default)]
struct Registry {
    running: usize,
    cancels: HashMap<String, CancellationToken>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn ObjectStorage>,
    pipeline: Pipeline,
    pricing: PricingConfig,
    settings: ManagerSettings,
    registry: Mutex<Registry>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl Inner {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Holds one admission slot. Dropping it releases the slot and the job's
/// cancel handle.
struct SlotGuard {
    inner: Arc<Inner>,
    job_id: Option<String>,
    /// Keeps `shutdown` waiting from admission on, before the worker is spawned.
    _tracked: TaskTrackerToken,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut registry = self.inner.registry();
        registry.running = registry.running.saturating_sub(1);
        if let Some(id) = &self.job_id {
            registry.cancels.remove(id);
        }
    }
}

// ── TaskManager ────────────────────────────────────────

#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStorage>,
        pipeline: Pipeline,
        pricing: PricingConfig,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                storage,
                pipeline,
                pricing,
                settings,
                registry: Mutex::new(Registry::default()),
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Accept a job and start its worker. Returns the new job id without
    /// waiting for any pipeline work.
    pub async fn submit(&self, request: GenerationRequest) -> Result<String, SubmitError> {
        request.validate()?;

        let mut slot = self.reserve_slot()?;
        let id = new_job_id();
        let token = self.inner.root.child_token();
        self.inner
            .registry()
            .cancels
            .insert(id.clone(), token.clone());
        slot.job_id = Some(id.clone());

        let job = Job::submitted(id.clone(), request);
        self.inner.store.create_job(&job).await?;

        tracing::info!(job_id = %id, owner = job.owner.as_deref().unwrap_or("-"), "job accepted");
        let inner = self.inner.clone();
        self.inner
            .tracker
            .spawn(run_worker(inner, job, token, slot));
        Ok(id)
    }

    /// The shutdown check happens under the registry lock that `shutdown`
    /// cancels under, so an admitted job is always tracked before
    /// `shutdown` starts waiting.
    fn reserve_slot(&self) -> Result<SlotGuard, SubmitError> {
        let limit = self.inner.settings.max_concurrent_jobs;
        let mut registry = self.inner.registry();
        if self.inner.root.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        if registry.running >= limit {
            return Err(CapacityError {
                running: registry.running,
                limit,
            }
            .into());
        }
        registry.running += 1;
        Ok(SlotGuard {
            inner: self.inner.clone(),
            job_id: None,
            _tracked: self.inner.tracker.token(),
        })
    }

    /// Signal a running job to stop. `Ok(false)` if it already finished.
    pub async fn cancel(&self, id: &str) -> Result<bool, StoreError> {
        let token = self.inner.registry().cancels.get(id).cloned();
        if let Some(token) = token {
            tracing::info!(job_id = %id, "cancellation requested");
            token.cancel();
            return Ok(true);
        }
        match self.inner.store.get_job(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.inner.store.get_job(id).await
    }

    pub async fn list(
        &self,
        owner: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<JobPage, StoreError> {
        self.inner.store.list_jobs(owner, limit, cursor).await
    }

    /// Jobs currently holding a slot.
    pub fn running(&self) -> usize {
        self.inner.registry().running
    }

    /// Fail jobs a previous process left unfinished. Call before accepting work.
    pub async fn recover_orphans(&self) -> Result<u64, StoreError> {
        let failed = self.inner.store.fail_incomplete(INTERRUPTED_REASON).await?;
        if failed > 0 {
            tracing::warn!(failed, "failed jobs left unfinished by a previous run");
        }
        Ok(failed)
    }

    /// Stop accepting work, cancel every worker and wait up to `grace` for
    /// them to record their final state. Returns whether all workers ended.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        tracing::info!(running = self.running(), "task manager shutting down");
        {
            let _registry = self.inner.registry();
            self.inner.root.cancel();
        }
        self.inner.tracker.close();
        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    running = self.running(),
                    "workers still running after the shutdown grace period"
                );
                false
            }
        }
    }
}

// ── Worker ─────────────────────────────────────────────

async fn run_worker(inner: Arc<Inner>, job: Job, token: CancellationToken, _slot: SlotGuard) {
    let job_dir = inner.settings.output_dir.join(&job.id);
    let outcome = AssertUnwindSafe(execute(&inner, &job, &job_dir, &token))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(JobFailure::Cancelled)) => Some(if inner.root.is_cancelled() {
            SHUTDOWN_REASON.to_string()
        } else {
            CANCELLED_BY_REQUEST.to_string()
        }),
        Ok(Err(JobFailure::Error(reason))) => Some(reason),
        Err(panic) => Some(format!("internal error: {}", panic_message(panic.as_ref()))),
    };

    if let Some(reason) = failure {
        record_failure(&inner, &job.id, &reason).await;
    }
    if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(job_id = %job.id, error = %e, "job directory cleanup failed");
        }
    }
}

async fn record_failure(inner: &Inner, id: &str, reason: &str) {
    tracing::warn!(job_id = %id, reason, "job failed");
    let write = inner.store.fail_job(id, reason);
    let result = if inner.root.is_cancelled() {
        // Shutdown: the write gets its own short budget, independent of any token.
        match tokio::time::timeout(inner.settings.shutdown_write_timeout, write).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(job_id = %id, "timed out recording shutdown failure");
                return;
            }
        }
    } else {
        write.await
    };
    if let Err(e) = result {
        tracing::error!(job_id = %id, error = %e, "could not record job failure");
    }
}

async fn execute(
    inner: &Inner,
    job: &Job,
    job_dir: &Path,
    token: &CancellationToken,
) -> Result<(), JobFailure> {
    let sink = ThrottledStoreSink::new(
        inner.store.clone(),
        job.id.clone(),
        inner.settings.progress_interval,
    );
    tokio::fs::create_dir_all(job_dir).await?;
    let output_path = job_dir.join("episode.mp3");

    let output = inner
        .pipeline
        .run(&job.request, &output_path, &sink, token)
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                JobFailure::Cancelled
            } else {
                JobFailure::Error(e.to_string())
            }
        })?;

    if token.is_cancelled() {
        return Err(JobFailure::Cancelled);
    }
    sink.emit(ProgressEvent::enter(Stage::Uploading, "uploading artifacts"))
        .await;
    let artifacts = upload(inner, job, job_dir, &output, token).await?;

    inner.store.complete_job(&job.id, &artifacts).await?;
    tracing::info!(
        job_id = %job.id,
        duration = %artifacts.duration,
        size_bytes = artifacts.size_bytes,
        "job complete"
    );
    Ok(())
}

async fn upload(
    inner: &Inner,
    job: &Job,
    job_dir: &Path,
    output: &PipelineOutput,
    token: &CancellationToken,
) -> Result<JobArtifacts, JobFailure> {
    let script_path = job_dir.join("script.json");
    output.script.save(&script_path)?;

    let audio = cancellable(token, inner.storage.upload(&job.id, &output.audio_path)).await?;
    let script = cancellable(token, inner.storage.upload(&job.id, &script_path)).await?;

    Ok(JobArtifacts {
        audio,
        script,
        title: output.script.title.clone(),
        summary: output.script.summary.clone(),
        duration: output.duration.clone(),
        size_bytes: output.size_bytes,
        estimated_cost: inner.pricing.estimate(&output.usage),
        usage: output.usage.clone(),
    })
}

async fn cancellable<F>(token: &CancellationToken, upload: F) -> Result<StoredObject, JobFailure>
where
    F: Future<Output = Result<StoredObject, StorageError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(JobFailure::Cancelled),
        result = upload => result.map_err(JobFailure::from),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}
