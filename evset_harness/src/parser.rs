//! Extraction of the probe verdict from its text output.
//!
//! The probe prints the victim line first, then one line per address of the reduced
//! eviction set:
//!
//! ```text
//! Reduction was successfull
//! Evset took 2 seconds 345 milliseconds
//! -----------  EV SET  -----------
//! Victim: 0x2a4f3c0	 Cache Set:  412, Cache Slice: 3
//!
//!      0: 0x7c0f3c0	 Cache Set:  412, Cache Slice: 3
//!      1: 0x913f3c0	 Cache Set:  412, Cache Slice: 3
//! ```
//!
//! The victim line is the candidate pair. Every other line reporting the same pair is
//! an address of the eviction set that lands in the victim's set.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::config::DEFAULT_SUCCESS_MARKER;

lazy_static! {
    static ref CACHE_LOCATION: Regex = Regex::new(r"Cache Set:\s+(\d+), Cache Slice:\s+(\d+)")
        .expect("cache location pattern is valid");
    static ref EVSET_TIME: Regex = Regex::new(r"(?i)Evset took (\d+) seconds (\d+) milliseconds")
        .expect("timing pattern is valid");
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResult {
    pub success_marker: bool,
    pub cache_set: Option<u32>,
    pub cache_slice: Option<u32>,
    /// Number of `(set, slice)` reports equal to the candidate pair, victim line included.
    pub assertion_count: usize,
    pub elapsed_ms: Option<u64>,
}

impl ParsedResult {
    pub fn candidate(&self) -> Option<(u32, u32)> {
        Some((self.cache_set?, self.cache_slice?))
    }
}

#[derive(Debug, Clone)]
pub struct Parser {
    success_marker: String,
}

impl Default for Parser {
    fn default() -> Self {
        Parser {
            success_marker: String::from(DEFAULT_SUCCESS_MARKER),
        }
    }
}

fn location(captures: &Captures) -> Option<(u32, u32)> {
    let set = captures[1].parse().ok()?;
    let slice = captures[2].parse().ok()?;
    Some((set, slice))
}

fn elapsed_ms(text: &str) -> Option<u64> {
    let captures = EVSET_TIME.captures(text)?;
    let seconds: u64 = captures[1].parse().ok()?;
    let milliseconds: u64 = captures[2].parse().ok()?;
    seconds.checked_mul(1000)?.checked_add(milliseconds)
}

impl Parser {
    pub fn with_marker(success_marker: impl Into<String>) -> Self {
        Parser {
            success_marker: success_marker.into(),
        }
    }

    pub fn parse(&self, text: &str) -> ParsedResult {
        if !text.contains(self.success_marker.as_str()) {
            return ParsedResult::default();
        }

        // First match wins, later pairs are only compared against it.
        let candidate = CACHE_LOCATION.captures(text).and_then(|c| location(&c));

        let assertion_count = match candidate {
            Some(pair) => CACHE_LOCATION
                .captures_iter(text)
                .filter(|c| location(c) == Some(pair))
                .count(),
            None => 0,
        };

        ParsedResult {
            success_marker: true,
            cache_set: candidate.map(|(set, _)| set),
            cache_slice: candidate.map(|(_, slice)| slice),
            assertion_count,
            elapsed_ms: elapsed_ms(text),
        }
    }
}

/// Parse with the default success marker.
pub fn parse(text: &str) -> ParsedResult {
    Parser::default().parse(text)
}
