use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podcast-engine")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Ceiling on concurrently running jobs. Submissions beyond it are rejected.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Budget for the final `failed` write of a job interrupted by shutdown.
    #[serde(default = "default_shutdown_write_timeout_ms")]
    pub shutdown_write_timeout_ms: u64,
    /// How long shutdown waits for workers to wind down.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Parent for per-job output and scratch directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_max_concurrent_jobs() -> usize {
    4
}
fn default_progress_interval_ms() -> u64 {
    2_000
}
fn default_shutdown_write_timeout_ms() -> u64 {
    5_000
}
fn default_shutdown_grace_ms() -> u64 {
    30_000
}
fn default_database_url() -> String {
    format!("sqlite://{}", data_dir().join("jobs.db").display())
}
fn default_work_dir() -> PathBuf {
    data_dir().join("work")
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            progress_interval_ms: default_progress_interval_ms(),
            shutdown_write_timeout_ms: default_shutdown_write_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            database_url: default_database_url(),
            work_dir: default_work_dir(),
        }
    }
}

impl JobsConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn shutdown_write_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
