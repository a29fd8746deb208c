pub mod assembly;
pub mod config;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod script;
pub mod server;
pub mod storage;
pub mod tts;
pub mod utils;
