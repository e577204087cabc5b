#![deny(unsafe_op_in_unsafe_fn)]

//! Validation harness for an external eviction set finder.
//!
//! The probe is run many times. Each run is parsed and checked against the cache
//! associativity. The reduction time is then averaged over the runs that produced
//! a correct eviction set.

use std::path::PathBuf;

use thiserror::Error;

pub mod classifier;
pub mod config;
pub mod harness;
pub mod parser;
pub mod runner;
pub mod summary;

pub use classifier::{classify, classify_trial, Classification, FailReason};
pub use config::{Elevation, HarnessConfig, DEFAULT_ASSOCIATIVITY, DEFAULT_TRIALS};
pub use harness::run_trials;
pub use parser::{parse, ParsedResult, Parser};
pub use runner::{CommandProbe, ProcessError, ProcessOutcome, Trial, TrialRunner};
pub use summary::{RunReport, RunSummary};

/// Errors that abort a run.
///
/// Anything going wrong inside a single trial is not an error at this level, it is
/// counted as a failed trial.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("probe binary {0} does not exist")]
    ProbeNotFound(PathBuf),
    #[error("probe {0} is not an executable file")]
    ProbeNotExecutable(PathBuf),
    #[error("elevation program {0} not found")]
    ElevationNotFound(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no successful trial reported a time ({fails} failed trials)")]
    EmptySample { fails: usize },
    #[error("failed to serialize the report: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to build the trial thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
