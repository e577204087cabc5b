//! Offline analysis of two synchronised clock traces.
//!
//! A trace is what the clock demo dumps: one edge per line, a timestamp and the signal
//! level after the edge. Edges alternate, so one full period spans two lines.

use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected `<timestamp> <level>`, got {content:?}")]
    Malformed { line: usize, content: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    pub timestamps: Vec<i64>,
    pub levels: Vec<i64>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

pub fn parse_trace(text: &str) -> Result<Trace, TraceError> {
    let mut trace = Trace::default();
    for (i, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let (Some(x), Some(y)) = (fields.next(), fields.next()) else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(TraceError::Malformed {
                line: i + 1,
                content: line.to_string(),
            });
        };
        match (x.parse(), y.parse()) {
            (Ok(x), Ok(y)) => {
                trace.timestamps.push(x);
                trace.levels.push(y);
            }
            _ => {
                return Err(TraceError::Malformed {
                    line: i + 1,
                    content: line.to_string(),
                })
            }
        }
    }
    Ok(trace)
}

pub fn read_trace(path: impl AsRef<Path>) -> Result<Trace, TraceError> {
    parse_trace(&fs::read_to_string(path)?)
}

fn mean(sum: u128, count: usize) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some(sum as f64 / count as f64)
    }
}

/// Mean distance between edges of the same direction.
pub fn mean_period(xs: &[i64]) -> Option<f64> {
    let periods: Vec<i64> = (2..xs.len())
        .step_by(2)
        .map(|i| xs[i].saturating_sub(xs[i - 2]))
        .collect();
    if periods.is_empty() {
        return None;
    }
    Some(periods.iter().map(|&p| p as f64).sum::<f64>() / periods.len() as f64)
}

/// Difference between the period ending at edge `i` and the one starting there.
fn jitters(xs: &[i64]) -> impl Iterator<Item = (usize, u64)> + '_ {
    (2..xs.len().saturating_sub(2)).map(move |i| {
        let before = xs[i].saturating_sub(xs[i - 2]);
        let after = xs[i + 2].saturating_sub(xs[i]);
        (i, before.abs_diff(after))
    })
}

/// Largest cycle to cycle jitter and the edge where it happens, first one on ties.
/// A jitter-free clock reports edge 0.
pub fn cycle_to_cycle_jitter(xs: &[i64]) -> Option<(u64, usize)> {
    let mut jitters = jitters(xs).peekable();
    jitters.peek()?;
    Some(jitters.fold((0, 0), |best, (i, jitter)| {
        if jitter > best.0 {
            (jitter, i)
        } else {
            best
        }
    }))
}

pub fn average_jitter(xs: &[i64]) -> Option<f64> {
    let (sum, count) = jitters(xs).fold((0u128, 0usize), |(sum, count), (_, jitter)| {
        (sum + jitter as u128, count + 1)
    });
    mean(sum, count)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncError {
    pub max: u64,
    pub average: f64,
}

/// Distance between matching edges of two traces, the first two edges are skipped.
pub fn sync_error(a: &[i64], b: &[i64]) -> Option<SyncError> {
    let (sum, count, max) = a
        .iter()
        .zip(b)
        .skip(2)
        .map(|(x, y)| x.abs_diff(*y))
        .fold((0u128, 0usize, 0u64), |(sum, count, max), e| {
            (sum + e as u128, count + 1, max.max(e))
        });
    Some(SyncError {
        max,
        average: mean(sum, count)?,
    })
}

/// Two points per edge so that plotting the trace draws a square wave.
pub fn to_square_wave(trace: &Trace) -> Trace {
    let mut wave = Trace::default();
    for (&x, &y) in trace.timestamps.iter().zip(&trace.levels) {
        wave.timestamps.push(x.saturating_sub(1));
        wave.levels.push(1i64.saturating_sub(y));
        wave.timestamps.push(x);
        wave.levels.push(y);
    }
    wave
}
