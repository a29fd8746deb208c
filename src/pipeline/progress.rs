//! Job stages and the progress events that flow from the pipeline to the job store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Submitted,
    Ingesting,
    Scripting,
    Synthesizing,
    Assembling,
    Uploading,
    Complete,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Submitted,
        Stage::Ingesting,
        Stage::Scripting,
        Stage::Synthesizing,
        Stage::Assembling,
        Stage::Uploading,
        Stage::Complete,
        Stage::Failed,
    ];

    /// Position in the pipeline. `Failed` sorts after everything.
    pub fn ordinal(self) -> u8 {
        match self {
            Stage::Submitted => 0,
            Stage::Ingesting => 1,
            Stage::Scripting => 2,
            Stage::Synthesizing => 3,
            Stage::Assembling => 4,
            Stage::Uploading => 5,
            Stage::Complete => 6,
            Stage::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// Forward moves (including skips and staying put) and failure are legal;
    /// nothing leaves a terminal stage.
    pub fn can_transition_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Stage::Failed || next.ordinal() >= self.ordinal()
    }

    /// Slice of overall progress this stage covers.
    pub fn band(self) -> (f64, f64) {
        match self {
            Stage::Submitted => (0.0, 0.0),
            Stage::Ingesting => (0.0, 0.10),
            Stage::Scripting => (0.10, 0.30),
            Stage::Synthesizing => (0.30, 0.85),
            Stage::Assembling => (0.85, 0.95),
            Stage::Uploading => (0.95, 1.0),
            Stage::Complete => (1.0, 1.0),
            Stage::Failed => (0.0, 1.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Submitted => "submitted",
            Stage::Ingesting => "ingesting",
            Stage::Scripting => "scripting",
            Stage::Synthesizing => "synthesizing",
            Stage::Assembling => "assembling",
            Stage::Uploading => "uploading",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Overall job progress in [0, 1].
    pub progress: f64,
    pub message: String,
}

impl ProgressEvent {
    /// Event at `fraction` of the way through `stage`'s band.
    pub fn within(stage: Stage, fraction: f64, message: impl Into<String>) -> Self {
        let (start, end) = stage.band();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            stage,
            // Rounding may overshoot `end`, which is the next band's start.
            progress: (start + (end - start) * fraction).min(end),
            message: message.into(),
        }
    }

    /// Event at the start of `stage`.
    pub fn enter(stage: Stage, message: impl Into<String>) -> Self {
        Self::within(stage, 0.0, message)
    }
}

/// Receives progress events. Sinks swallow their own failures; progress is best-effort.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages_are_frozen() {
        for next in Stage::ALL {
            assert!(!Stage::Complete.can_transition_to(next));
            assert!(!Stage::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn forward_and_fail_only() {
        assert!(Stage::Submitted.can_transition_to(Stage::Synthesizing));
        assert!(Stage::Scripting.can_transition_to(Stage::Scripting));
        assert!(Stage::Assembling.can_transition_to(Stage::Failed));
        assert!(!Stage::Assembling.can_transition_to(Stage::Scripting));
    }

    #[test]
    fn bands_are_contiguous() {
        let order = [
            Stage::Ingesting,
            Stage::Scripting,
            Stage::Synthesizing,
            Stage::Assembling,
            Stage::Uploading,
        ];
        for pair in order.windows(2) {
            assert_eq!(pair[0].band().1, pair[1].band().0);
        }
    }

    #[test]
    fn finished_band_never_passes_next_start() {
        let order = [
            Stage::Ingesting,
            Stage::Scripting,
            Stage::Synthesizing,
            Stage::Assembling,
            Stage::Uploading,
        ];
        for pair in order.windows(2) {
            let done = ProgressEvent::within(pair[0], 1.0, "done");
            let next = ProgressEvent::enter(pair[1], "next");
            assert!(
                done.progress <= next.progress,
                "{:?} ends at {} after {:?} starts at {}",
                pair[0],
                done.progress,
                pair[1],
                next.progress
            );
        }
    }

    #[test]
    fn within_clamps() {
        let e = ProgressEvent::within(Stage::Synthesizing, 2.0, "x");
        assert!((e.progress - 0.85).abs() < 1e-9);
        let e = ProgressEvent::within(Stage::Synthesizing, f64::NAN, "x");
        assert!((e.progress - 0.30).abs() < 1e-9);
    }

    #[test]
    fn names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }
}
