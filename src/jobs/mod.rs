pub mod config;
pub mod manager;
pub mod model;
pub mod sqlite_store;
pub mod store;
pub mod throttle;

#[cfg(test)]
pub(crate) mod tests;

pub use config::JobsConfig;
pub use manager::{
    CapacityError, ManagerSettings, SubmitError, TaskManager, CANCELLED_BY_REQUEST,
    INTERRUPTED_REASON, SHUTDOWN_REASON,
};
pub use model::{Job, JobArtifacts, JobPage, JobStatus};
pub use sqlite_store::SqliteJobStore;
pub use store::{JobStore, MemoryJobStore, StoreError};
pub use throttle::{ProgressThrottle, ThrottledStoreSink};
