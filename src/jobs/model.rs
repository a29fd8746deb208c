//! Job records, artifacts and the views the HTTP surface returns.

use crate::pipeline::progress::Stage;
use crate::pipeline::request::GenerationRequest;
use crate::pipeline::usage::UsageCounters;
use crate::storage::StoredObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// New time-ordered job id. The hyphenated form of a v7 UUID sorts by creation time.
pub fn new_job_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub audio: StoredObject,
    pub script: StoredObject,
    pub title: String,
    pub summary: String,
    pub duration: String,
    pub size_bytes: u64,
    pub usage: UsageCounters,
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner: Option<String>,
    pub stage: Stage,
    /// Overall progress in [0, 1].
    pub progress: f64,
    pub message: String,
    pub request: GenerationRequest,
    pub artifacts: Option<JobArtifacts>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Fresh `Submitted` record for an accepted request.
    pub fn submitted(id: String, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner: request.owner.clone(),
            stage: Stage::Submitted,
            progress: 0.0,
            message: "queued for processing".to_string(),
            request,
            artifacts: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id.clone(),
            status: self.stage,
            progress_percent: (self.progress.clamp(0.0, 1.0) * 100.0).round() as u8,
            stage_message: self.message.clone(),
            audio_url: self.artifacts.as_ref().map(|a| a.audio.url.clone()),
            script_url: self.artifacts.as_ref().map(|a| a.script.url.clone()),
            title: self.artifacts.as_ref().map(|a| a.title.clone()),
            duration: self.artifacts.as_ref().map(|a| a.duration.clone()),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What a poller sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: Stage,
    pub progress_percent: u8,
    pub stage_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One page of jobs, newest first. Pass `next_cursor` back to continue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub next_cursor: Option<String>,
}
