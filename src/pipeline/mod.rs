pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod usage;
pub mod workspace;

#[cfg(test)]
pub(crate) mod tests;

pub use orchestrator::{
    Backends, EngineBackends, Pipeline, PipelineError, PipelineOutput, PipelineSettings,
};
pub use progress::{NullSink, ProgressEvent, ProgressSink, Stage};
pub use request::{ContentInput, GenerationRequest, InvalidRequest};
pub use usage::{PricingConfig, Rate, UsageCounters};
