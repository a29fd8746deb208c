pub mod anthropic;
pub mod config;
pub mod extract;
pub mod generator;
pub mod interface;
pub mod ollama;
pub mod openai;
pub mod prompts;
pub mod refine;
pub mod service;
pub mod validate;

#[cfg(test)]
mod tests;

pub use config::{ScriptBackendConfig, ScriptSystemConfig};
pub use generator::{GeneratedScript, ScriptGenerator};
pub use interface::{
    Completion, CompletionRequest, Script, ScriptBackend, ScriptBackendKind, ScriptError,
    ScriptLength, ScriptOptions, Segment, TokenUsage,
};
