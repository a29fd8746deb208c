use super::interface::Script;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptViolation {
    #[error("script has no segments")]
    Empty,
    #[error("segment {index} has unknown speaker '{speaker}' (hosts: {hosts})")]
    UnknownSpeaker {
        index: usize,
        speaker: String,
        hosts: String,
    },
    #[error("segment {index} has blank text")]
    BlankText { index: usize },
}

/// Rewrite speaker labels that differ from a host only by case or padding
/// to the canonical host label. Anything else is left for [`validate_script`].
pub fn normalize_speakers(script: &mut Script, hosts: &[String]) {
    for segment in &mut script.segments {
        let trimmed = segment.speaker.trim();
        if let Some(host) = hosts.iter().find(|h| h.trim().eq_ignore_ascii_case(trimmed)) {
            if segment.speaker != *host {
                segment.speaker = host.clone();
            }
        }
    }
}

/// Check the invariants every accepted script satisfies.
pub fn validate_script(script: &Script, hosts: &[String]) -> Result<(), ScriptViolation> {
    if script.segments.is_empty() {
        return Err(ScriptViolation::Empty);
    }

    for (index, segment) in script.segments.iter().enumerate() {
        if !hosts.iter().any(|h| h == &segment.speaker) {
            return Err(ScriptViolation::UnknownSpeaker {
                index,
                speaker: segment.speaker.clone(),
                hosts: hosts.join(", "),
            });
        }
        if segment.text.trim().is_empty() {
            return Err(ScriptViolation::BlankText { index });
        }
    }
    Ok(())
}
