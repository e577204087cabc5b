use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::parser::ParsedResult;
use crate::runner::Trial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailReason {
    ProcessInvocation,
    MissingMarker,
    ParseMiss,
    AssociativityMismatch { expected: u64, found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Pass,
    Fail(FailReason),
}

impl Classification {
    pub fn is_pass(&self) -> bool {
        matches!(self, Classification::Pass)
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Pass => write!(f, "PASS"),
            Classification::Fail(FailReason::ProcessInvocation) => {
                write!(f, "FAIL (probe did not complete)")
            }
            Classification::Fail(FailReason::MissingMarker) => {
                write!(f, "FAIL (no success marker)")
            }
            Classification::Fail(FailReason::ParseMiss) => write!(f, "FAIL (no cache set/slice)"),
            Classification::Fail(FailReason::AssociativityMismatch { expected, found }) => {
                write!(f, "FAIL ({} reports, expected {})", found, expected)
            }
        }
    }
}

/// A correct eviction set has one address per way of the victim's set. The probe
/// reports the victim pair once, then once per address.
pub fn classify(parsed: &ParsedResult, associativity: u32) -> Classification {
    if !parsed.success_marker {
        return Classification::Fail(FailReason::MissingMarker);
    }
    if parsed.candidate().is_none() {
        return Classification::Fail(FailReason::ParseMiss);
    }
    let expected = associativity as u64 + 1;
    if parsed.assertion_count as u64 != expected {
        return Classification::Fail(FailReason::AssociativityMismatch {
            expected,
            found: parsed.assertion_count,
        });
    }
    Classification::Pass
}

pub fn classify_trial(trial: &Trial, parsed: &ParsedResult, associativity: u32) -> Classification {
    if !trial.completed() {
        return Classification::Fail(FailReason::ProcessInvocation);
    }
    classify(parsed, associativity)
}
