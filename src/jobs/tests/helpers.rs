pub use crate::pipeline::tests::helpers::{
    long_text, settings, transient, FakeBackends, FakeScript, FakeTts,
};

use crate::assembly::AudioAssembler;
use crate::ingest::Ingester;
use crate::jobs::manager::{ManagerSettings, TaskManager};
use crate::jobs::model::{Job, JobArtifacts, JobPage};
use crate::jobs::store::{JobStore, MemoryJobStore, StoreError};
use crate::pipeline::orchestrator::{Backends, Pipeline};
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::request::GenerationRequest;
use crate::pipeline::usage::PricingConfig;
use crate::script::generator::ScriptGenerator;
use crate::script::interface::ScriptError;
use crate::storage::LocalObjectStorage;
use crate::tts::interface::TtsError;
use crate::tts::manager::Synthesizer;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ── Instrumented store ──────────────────────────────────────

/// Memory store that counts writes and can be told to misbehave.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryJobStore,
    progress_writes: AtomicU32,
    reject_creates: AtomicBool,
    stall_failures: AtomicBool,
    create_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl CountingStore {
    pub fn progress_writes(&self) -> u32 {
        self.progress_writes.load(Ordering::SeqCst)
    }

    pub fn reject_creates(&self) {
        self.reject_creates.store(true, Ordering::SeqCst);
    }

    /// `create_job` waits for a permit from `gate` before writing.
    pub fn gate_creates(&self, gate: Arc<Semaphore>) {
        *self.create_gate.lock().unwrap() = Some(gate);
    }

    /// `fail_job` never returns.
    pub fn stall_failures(&self) {
        self.stall_failures.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for CountingStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".into()));
        }
        let gate = self.create_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.inner.create_job(job).await
    }

    async fn update_progress(&self, id: &str, event: &ProgressEvent) -> Result<(), StoreError> {
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_progress(id, event).await
    }

    async fn complete_job(&self, id: &str, artifacts: &JobArtifacts) -> Result<(), StoreError> {
        self.inner.complete_job(id, artifacts).await
    }

    async fn fail_job(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        if self.stall_failures.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.fail_job(id, reason).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(
        &self,
        owner: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<JobPage, StoreError> {
        self.inner.list_jobs(owner, limit, cursor).await
    }

    async fn fail_incomplete(&self, reason: &str) -> Result<u64, StoreError> {
        self.inner.fail_incomplete(reason).await
    }
}

// ── Panicking backends ──────────────────────────────────────

/// Healthy fakes, except building a script generator panics.
pub struct PanickingBackends(pub FakeBackends);

impl Backends for PanickingBackends {
    fn ingester(&self) -> &dyn Ingester {
        self.0.ingester()
    }

    fn assembler(&self) -> &dyn AudioAssembler {
        self.0.assembler()
    }

    fn script_generator(&self, _request: &GenerationRequest) -> Result<ScriptGenerator, ScriptError> {
        panic!("generator wiring exploded")
    }

    fn synthesizer(
        &self,
        request: &GenerationRequest,
        hosts: &[String],
    ) -> Result<Synthesizer, TtsError> {
        self.0.synthesizer(request, hosts)
    }
}

// ── Harness ─────────────────────────────────────────────────

pub struct Harness {
    pub manager: TaskManager,
    pub store: Arc<CountingStore>,
    pub artifacts: TempDir,
    pub work: TempDir,
}

pub fn harness(backends: Arc<dyn Backends>, max_jobs: usize) -> Harness {
    harness_with_pricing(backends, max_jobs, PricingConfig::default())
}

pub fn harness_with_pricing(
    backends: Arc<dyn Backends>,
    max_jobs: usize,
    pricing: PricingConfig,
) -> Harness {
    let store = Arc::new(CountingStore::default());
    let work = TempDir::new().unwrap();
    let artifacts = TempDir::new().unwrap();
    let pipeline = Pipeline::new(backends, settings(&work.path().join("scratch")));
    let storage = Arc::new(LocalObjectStorage::new(artifacts.path(), "http://engine.test"));
    let manager = TaskManager::new(
        store.clone(),
        storage,
        pipeline,
        pricing,
        ManagerSettings {
            max_concurrent_jobs: max_jobs,
            progress_interval: Duration::from_secs(2),
            shutdown_write_timeout: Duration::from_secs(5),
            output_dir: work.path().join("jobs"),
        },
    );
    Harness {
        manager,
        store,
        artifacts,
        work,
    }
}

pub fn request() -> GenerationRequest {
    GenerationRequest::from_text(long_text())
}

/// Poll until the job is terminal. Panics after 30 (possibly virtual) seconds.
pub async fn wait_terminal(manager: &TaskManager, id: &str) -> Job {
    let poll = async {
        loop {
            if let Some(job) = manager.get(id).await.unwrap() {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("job did not finish in time")
}

/// Poll until `condition` holds. Panics after 30 (possibly virtual) seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("condition not reached in time")
}
