use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::classifier::Classification;
use crate::parser::ParsedResult;
use crate::HarnessError;

/// Accumulator over the trials of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Evset times of the passing trials, in milliseconds, in trial order.
    pub samples_ms: Vec<u64>,
    pub fails: usize,
    /// Passing trials whose output did not contain a time.
    pub untimed_passes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mean_ms: f64,
    pub fails: usize,
    pub samples: usize,
    pub untimed_passes: usize,
    pub min_ms: u64,
    pub median_ms: f64,
    pub max_ms: u64,
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Average: {} ms, Fails: {}", self.mean_ms, self.fails)
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, classification: &Classification, parsed: &ParsedResult) {
        match (classification, parsed.elapsed_ms) {
            (Classification::Pass, Some(elapsed)) => self.samples_ms.push(elapsed),
            (Classification::Pass, None) => self.untimed_passes += 1,
            (Classification::Fail(_), _) => self.fails += 1,
        }
    }

    pub fn trials(&self) -> usize {
        self.samples_ms.len() + self.fails + self.untimed_passes
    }

    pub fn summarize(&self) -> Result<RunReport, HarnessError> {
        let n = self.samples_ms.len();
        if n == 0 {
            return Err(HarnessError::EmptySample { fails: self.fails });
        }
        let total: u128 = self.samples_ms.iter().map(|&t| t as u128).sum();
        let sorted: Vec<u64> = self.samples_ms.iter().copied().sorted_unstable().collect();
        let median_ms = if n % 2 == 0 {
            (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
        } else {
            sorted[n / 2] as f64
        };
        Ok(RunReport {
            mean_ms: total as f64 / n as f64,
            fails: self.fails,
            samples: n,
            untimed_passes: self.untimed_passes,
            min_ms: sorted[0],
            median_ms,
            max_ms: sorted[n - 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, FailReason};
    use crate::parser::parse;
    use crate::parser::tests::probe_output;
    use proptest::prelude::*;

    fn timed(elapsed: u64) -> ParsedResult {
        ParsedResult {
            success_marker: true,
            cache_set: Some(3),
            cache_slice: Some(2),
            assertion_count: 17,
            elapsed_ms: Some(elapsed),
        }
    }

    #[test]
    fn records_pass_time() {
        let parsed = parse(&probe_output(3, 2, 17, Some((2, 345))));
        let classification = classify(&parsed, 16);
        let mut summary = RunSummary::new();
        summary.record(&classification, &parsed);
        assert_eq!(summary.samples_ms, vec![2345]);
        assert_eq!(summary.fails, 0);
    }

    #[test]
    fn missing_marker_is_one_fail() {
        let parsed = parse("Reduction algorithm failed\n");
        let mut summary = RunSummary::new();
        summary.record(&classify(&parsed, 16), &parsed);
        assert_eq!(summary.fails, 1);
        assert!(summary.samples_ms.is_empty());
    }

    #[test]
    fn untimed_pass_has_its_own_counter() {
        let parsed = ParsedResult {
            elapsed_ms: None,
            ..timed(0)
        };
        let mut summary = RunSummary::new();
        summary.record(&Classification::Pass, &parsed);
        assert_eq!(summary.untimed_passes, 1);
        assert_eq!(summary.fails, 0);
        assert!(summary.samples_ms.is_empty());
        assert_eq!(summary.trials(), 1);
    }

    #[test]
    fn mean_over_passes() {
        let mut summary = RunSummary::new();
        for elapsed in [100, 200, 300] {
            summary.record(&Classification::Pass, &timed(elapsed));
        }
        for _ in 0..497 {
            summary.record(
                &Classification::Fail(FailReason::MissingMarker),
                &ParsedResult::default(),
            );
        }
        assert_eq!(summary.trials(), 500);
        let report = summary.summarize().unwrap();
        assert_eq!(report.mean_ms, 200.0);
        assert_eq!(report.fails, 497);
        assert_eq!(report.samples, 3);
        assert_eq!(report.min_ms, 100);
        assert_eq!(report.median_ms, 200.0);
        assert_eq!(report.max_ms, 300);
        assert_eq!(report.to_string(), "Average: 200 ms, Fails: 497");
    }

    #[test]
    fn even_median() {
        let summary = RunSummary {
            samples_ms: vec![40, 10, 30, 20],
            ..RunSummary::default()
        };
        assert_eq!(summary.summarize().unwrap().median_ms, 25.0);
    }

    #[test]
    fn no_samples_is_an_error() {
        let mut summary = RunSummary::new();
        for _ in 0..500 {
            summary.record(
                &Classification::Fail(FailReason::ProcessInvocation),
                &ParsedResult::default(),
            );
        }
        assert!(matches!(
            summary.summarize(),
            Err(HarnessError::EmptySample { fails: 500 })
        ));
    }

    #[test]
    fn huge_samples_do_not_overflow() {
        let summary = RunSummary {
            samples_ms: vec![u64::MAX, u64::MAX],
            ..RunSummary::default()
        };
        assert_eq!(summary.summarize().unwrap().mean_ms, u64::MAX as f64);
    }

    proptest! {
        #[test]
        fn fail_count_ignores_order(
            (verdicts, shuffled) in prop::collection::vec(any::<bool>(), 0..200)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let fold = |verdicts: &[bool]| {
                let mut summary = RunSummary::new();
                for &pass in verdicts {
                    let classification = if pass {
                        Classification::Pass
                    } else {
                        Classification::Fail(FailReason::ParseMiss)
                    };
                    summary.record(&classification, &timed(1));
                }
                summary
            };
            let a = fold(&verdicts);
            let b = fold(&shuffled);
            prop_assert_eq!(a.fails, b.fails);
            prop_assert_eq!(a.samples_ms.len(), b.samples_ms.len());
        }
    }
}
