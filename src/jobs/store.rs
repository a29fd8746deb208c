//! Job persistence contract and the in-memory implementation.

use super::model::{Job, JobArtifacts, JobPage};
use crate::pipeline::progress::{ProgressEvent, Stage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} already exists")]
    Duplicate(String),
    #[error("job {id} is already {stage} and cannot change")]
    Terminal { id: String, stage: Stage },
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: Stage, to: Stage },
    #[error("job store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("corrupt job record: {}", e))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Move a running job forward. Progress never goes down.
    async fn update_progress(&self, id: &str, event: &ProgressEvent) -> Result<(), StoreError>;

    async fn complete_job(&self, id: &str, artifacts: &JobArtifacts) -> Result<(), StoreError>;

    async fn fail_job(&self, id: &str, reason: &str) -> Result<(), StoreError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Newest first. `cursor` is the last id of the previous page.
    async fn list_jobs(
        &self,
        owner: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<JobPage, StoreError>;

    /// Fail every non-terminal job. Returns how many were failed.
    async fn fail_incomplete(&self, reason: &str) -> Result<u64, StoreError>;
}

/// Check a stage move against the lifecycle; terminal records never change.
pub(crate) fn check_transition(id: &str, from: Stage, to: Stage) -> Result<(), StoreError> {
    if from.is_terminal() {
        return Err(StoreError::Terminal {
            id: id.to_string(),
            stage: from,
        });
    }
    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        });
    }
    Ok(())
}

pub(crate) fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}

pub(crate) fn page(mut jobs: Vec<Job>, limit: usize) -> JobPage {
    let next_cursor = if jobs.len() > limit {
        jobs.truncate(limit);
        jobs.last().map(|j| j.id.clone())
    } else {
        None
    };
    JobPage { jobs, next_cursor }
}

// ── In-memory store ────────────────────────────────────

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with_job<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Job) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(job)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_progress(&self, id: &str, event: &ProgressEvent) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            check_transition(id, job.stage, event.stage)?;
            job.stage = event.stage;
            job.progress = job.progress.max(event.progress);
            job.message = event.message.clone();
            job.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn complete_job(&self, id: &str, artifacts: &JobArtifacts) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            check_transition(id, job.stage, Stage::Complete)?;
            job.stage = Stage::Complete;
            job.progress = 1.0;
            job.message = "complete".to_string();
            job.artifacts = Some(artifacts.clone());
            job.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn fail_job(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            check_transition(id, job.stage, Stage::Failed)?;
            job.stage = Stage::Failed;
            job.message = "failed".to_string();
            job.error = Some(reason.to_string());
            job.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn list_jobs(
        &self,
        owner: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<JobPage, StoreError> {
        let limit = clamp_limit(limit);
        let jobs = self.lock();
        let selected: Vec<Job> = jobs
            .values()
            .rev()
            .filter(|j| cursor.map_or(true, |c| j.id.as_str() < c))
            .filter(|j| owner.map_or(true, |o| j.owner.as_deref() == Some(o)))
            .take(limit + 1)
            .cloned()
            .collect();
        Ok(page(selected, limit))
    }

    async fn fail_incomplete(&self, reason: &str) -> Result<u64, StoreError> {
        let mut failed = 0;
        let now = Utc::now();
        for job in self.lock().values_mut().filter(|j| !j.is_terminal()) {
            job.stage = Stage::Failed;
            job.message = "failed".to_string();
            job.error = Some(reason.to_string());
            job.updated_at = now;
            failed += 1;
        }
        Ok(failed)
    }
}
