pub mod config;
pub mod elevenlabs;
pub mod gemini;
pub mod interface;
pub mod manager;
pub mod openai;
pub mod router;
pub mod voice_registry;


pub use config::{ProviderConfig, TtsSystemConfig};
pub use interface::{
    AudioChunk, AudioEncoding, BatchSynthesizer, TtsError, TtsProvider, TtsProviderKind,
    TtsTuning, Voice, VoiceAssignment,
};
pub use manager::{NoopObserver, SynthesisObserver, SynthesisOutput, Synthesizer, TtsService};
pub use router::SynthesisStrategy;
