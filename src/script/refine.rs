//! Cheap heuristics that decide whether a draft is worth one revision call.

use super::interface::{Script, ScriptLength};
use std::collections::HashMap;
use std::fmt;

/// Relative deviation from the length bucket's segment target that triggers a revision.
pub const SEGMENT_DEVIATION_LIMIT: f64 = 0.35;

#[derive(Debug, Clone, PartialEq)]
pub enum RefineIssue {
    SegmentCount { actual: usize, target: usize },
    UnbalancedHost { host: String, share: f64, fair: f64 },
    BannedPhrase { phrase: String, segment: usize },
}

impl fmt::Display for RefineIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefineIssue::SegmentCount { actual, target } => write!(
                f,
                "the script has {} segments, aim for about {}",
                actual, target
            ),
            RefineIssue::UnbalancedHost { host, share, fair } => write!(
                f,
                "{} speaks {:.0}% of the words, give them closer to {:.0}%",
                host,
                share * 100.0,
                fair * 100.0
            ),
            RefineIssue::BannedPhrase { phrase, segment } => {
                write!(f, "segment {} uses the stock phrase \"{}\"", segment, phrase)
            }
        }
    }
}

/// Run every heuristic over a draft. An empty result means no revision is needed.
pub fn review(
    script: &Script,
    hosts: &[String],
    length: ScriptLength,
    banned_phrases: &[String],
) -> Vec<RefineIssue> {
    let mut issues = Vec::new();

    let target = length.target_segments();
    let actual = script.segments.len();
    let deviation = (actual as f64 - target as f64).abs() / target as f64;
    if deviation > SEGMENT_DEVIATION_LIMIT {
        issues.push(RefineIssue::SegmentCount { actual, target });
    }

    if hosts.len() > 1 {
        let mut words: HashMap<&str, usize> = HashMap::new();
        for segment in &script.segments {
            *words.entry(segment.speaker.as_str()).or_default() +=
                segment.text.split_whitespace().count();
        }
        let total: usize = words.values().sum();
        if total > 0 {
            let fair = 1.0 / hosts.len() as f64;
            for host in hosts {
                let share = words.get(host.as_str()).copied().unwrap_or(0) as f64 / total as f64;
                if share < fair / 2.0 {
                    issues.push(RefineIssue::UnbalancedHost {
                        host: host.clone(),
                        share,
                        fair,
                    });
                }
            }
        }
    }

    for (index, segment) in script.segments.iter().enumerate() {
        let lower = segment.text.to_lowercase();
        for phrase in banned_phrases {
            if !phrase.is_empty() && lower.contains(&phrase.to_lowercase()) {
                issues.push(RefineIssue::BannedPhrase {
                    phrase: phrase.clone(),
                    segment: index,
                });
            }
        }
    }

    issues
}
