//! Rate-limits progress writes to the job store.

use super::store::JobStore;
use crate::pipeline::progress::{ProgressEvent, ProgressSink, Stage};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// At most one write per interval while the stage stays the same; a new
/// stage is always written straight away.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_write: Option<Instant>,
    last_stage: Option<Stage>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
            last_stage: None,
        }
    }

    /// Whether an event at `stage` observed at `now` should be written.
    pub fn admit(&mut self, stage: Stage, now: Instant) -> bool {
        let stage_changed = self.last_stage != Some(stage);
        let due = self
            .last_write
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if stage_changed || due {
            self.last_write = Some(now);
            self.last_stage = Some(stage);
            return true;
        }
        false
    }
}

/// Progress sink for one job that writes admitted events to the store.
/// Write failures are logged and dropped.
pub struct ThrottledStoreSink {
    store: Arc<dyn JobStore>,
    job_id: String,
    throttle: Mutex<ProgressThrottle>,
}

impl ThrottledStoreSink {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            throttle: Mutex::new(ProgressThrottle::new(interval)),
        }
    }
}

#[async_trait]
impl ProgressSink for ThrottledStoreSink {
    async fn emit(&self, event: ProgressEvent) {
        let admitted = self
            .throttle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .admit(event.stage, Instant::now());
        if !admitted {
            return;
        }
        if let Err(e) = self.store.update_progress(&self.job_id, &event).await {
            tracing::warn!(job_id = %self.job_id, stage = %event.stage, error = %e, "progress write failed");
        }
    }
}
