use super::interface::{TtsProvider, VoiceAssignment};

/// How a script is turned into audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisStrategy {
    /// One call covering the whole script.
    Batch { provider: String },
    /// One call per segment, in script order, each routed to its voice's provider.
    PerSegment,
}

/// Pick the synthesis strategy for a script.
///
/// Batch is used only when:
///   1. the selected provider exposes the batch capability,
///   2. every speaker's voice belongs to that provider,
///   3. the speaker count is within the provider's batch limits.
///
/// Anything else falls back to per-segment synthesis.
pub fn select_strategy(selected: &dyn TtsProvider, assignment: &VoiceAssignment) -> SynthesisStrategy {
    let Some(batch) = selected.as_batch() else {
        return SynthesisStrategy::PerSegment;
    };
    if assignment.single_provider() != Some(selected.id()) {
        return SynthesisStrategy::PerSegment;
    }
    if assignment.len() < batch.min_speakers() || assignment.len() > batch.max_speakers() {
        return SynthesisStrategy::PerSegment;
    }
    SynthesisStrategy::Batch {
        provider: selected.id().to_string(),
    }
}
