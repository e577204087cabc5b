use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use crate::classifier::{classify_trial, Classification};
use crate::config::HarnessConfig;
use crate::parser::{ParsedResult, Parser};
use crate::runner::TrialRunner;
use crate::summary::RunSummary;
use crate::HarnessError;

/// Runs the whole trial budget and folds the verdicts into a summary.
///
/// Trials never abort the run, a failing probe is only counted. With more than one job
/// the trials run on a dedicated pool, the results are collected in trial order and
/// folded by the calling thread.
pub fn run_trials<R: TrialRunner + ?Sized>(
    runner: &R,
    config: &HarnessConfig,
) -> Result<RunSummary, HarnessError> {
    config.validate()?;
    let parser = Parser::with_marker(config.success_marker.as_str());
    let step = (config.trials / 10).max(1);
    let done = AtomicUsize::new(0);

    let evaluate = |index: usize| -> (Classification, ParsedResult) {
        let trial = runner.run_trial(index);
        let parsed = if trial.completed() {
            parser.parse(&trial.output)
        } else {
            ParsedResult::default()
        };
        let classification = classify_trial(&trial, &parsed, config.associativity);
        debug!(
            trial = index,
            candidate = ?parsed.candidate(),
            reports = parsed.assertion_count,
            elapsed_ms = ?parsed.elapsed_ms,
            "{}",
            classification
        );
        let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
        if finished % step == 0 {
            info!("{}/{} trials done", finished, config.trials);
        }
        (classification, parsed)
    };

    let outcomes: Vec<(Classification, ParsedResult)> = if config.jobs == 1 {
        (0..config.trials).map(evaluate).collect()
    } else {
        let pool = ThreadPoolBuilder::new().num_threads(config.jobs).build()?;
        pool.install(|| (0..config.trials).into_par_iter().map(evaluate).collect())
    };

    let mut summary = RunSummary::new();
    for (classification, parsed) in &outcomes {
        summary.record(classification, parsed);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::probe_output;
    use crate::runner::{ProcessError, ProcessOutcome, Trial};
    use std::sync::Mutex;

    /// Replays canned probe outputs, `None` being a probe that exited with an error.
    struct Replay {
        outputs: Vec<Option<String>>,
        calls: Mutex<Vec<usize>>,
    }

    impl Replay {
        fn new(outputs: Vec<Option<String>>) -> Self {
            Replay {
                outputs,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl TrialRunner for Replay {
        fn run_trial(&self, index: usize) -> Trial {
            self.calls.lock().unwrap().push(index);
            match &self.outputs[index % self.outputs.len()] {
                Some(output) => Trial {
                    index,
                    output: output.clone(),
                    outcome: ProcessOutcome::Exited,
                },
                None => Trial::failed(index, ProcessError::ExitCode(1)),
            }
        }
    }

    fn config(trials: usize, jobs: usize) -> HarnessConfig {
        HarnessConfig {
            trials,
            jobs,
            ..HarnessConfig::default()
        }
    }

    fn scenario() -> Vec<Option<String>> {
        let mut outputs = vec![
            Some(probe_output(3, 2, 17, Some((0, 100)))),
            Some(probe_output(5, 1, 17, Some((0, 200)))),
            Some(probe_output(7, 0, 17, Some((0, 300)))),
        ];
        for i in 0..497 {
            outputs.push(match i % 4 {
                0 => None,
                1 => Some(String::from("Reduction algorithm failed\n")),
                2 => Some(probe_output(3, 2, 16, Some((1, 0)))),
                _ => Some(String::from("Reduction was successfull\n")),
            });
        }
        outputs
    }

    #[test]
    fn three_passes_in_five_hundred() {
        let runner = Replay::new(scenario());
        let summary = run_trials(&runner, &config(500, 1)).unwrap();
        assert_eq!(summary.samples_ms, vec![100, 200, 300]);
        assert_eq!(summary.fails, 497);
        let report = summary.summarize().unwrap();
        assert_eq!(report.mean_ms, 200.0);
        assert_eq!(report.fails, 497);
    }

    #[test]
    fn every_trial_runs_once() {
        let runner = Replay::new(vec![None]);
        let summary = run_trials(&runner, &config(123, 4)).unwrap();
        assert_eq!(summary.fails, 123);
        let mut calls = runner.calls.into_inner().unwrap();
        calls.sort_unstable();
        assert_eq!(calls, (0..123).collect::<Vec<_>>());
    }

    #[test]
    fn all_failures_cannot_be_summarized() {
        let runner = Replay::new(vec![None, Some(String::from("nothing"))]);
        let summary = run_trials(&runner, &config(500, 1)).unwrap();
        assert_eq!(summary.fails, 500);
        assert!(matches!(
            summary.summarize(),
            Err(HarnessError::EmptySample { fails: 500 })
        ));
    }

    #[test]
    fn parallel_matches_sequential() {
        let sequential = run_trials(&Replay::new(scenario()), &config(500, 1)).unwrap();
        let parallel = run_trials(&Replay::new(scenario()), &config(500, 8)).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn untimed_passes_are_kept_apart() {
        let runner = Replay::new(vec![
            Some(probe_output(3, 2, 17, None)),
            Some(probe_output(3, 2, 17, Some((0, 50)))),
        ]);
        let summary = run_trials(&runner, &config(10, 1)).unwrap();
        assert_eq!(summary.untimed_passes, 5);
        assert_eq!(summary.samples_ms, vec![50; 5]);
        assert_eq!(summary.fails, 0);
    }

    #[test]
    fn associativity_comes_from_config() {
        let runner = Replay::new(vec![Some(probe_output(3, 2, 13, Some((0, 10))))]);
        let summary = run_trials(&runner, &config(4, 1)).unwrap();
        assert_eq!(summary.fails, 4);
        let twelve_ways = HarnessConfig {
            associativity: 12,
            ..config(4, 1)
        };
        let summary = run_trials(&runner, &twelve_ways).unwrap();
        assert_eq!(summary.samples_ms, vec![10; 4]);
    }

    #[test]
    fn invalid_config_runs_nothing() {
        let runner = Replay::new(vec![None]);
        assert!(run_trials(&runner, &config(0, 1)).is_err());
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}
