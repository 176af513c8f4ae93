//! NIST SP 800-22 inspired randomness triage battery.
//!
//! Three lightweight tests over a bit sequence (one `0`/`1` value per element):
//! `frequency` (monobit balance), `runs` and `chi_square` (per-block ones
//! counts). Each test returns a [`TestOutcome`] with a pass/fail verdict, the
//! statistic it computed, the threshold it compared against, and named
//! diagnostics. This is a triage suite, not a certification suite.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::erf::erfc;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Names accepted by [`run_selected_tests`], in default execution order.
pub const AVAILABLE_TESTS: [&str; 3] = ["frequency", "runs", "chi_square"];

/// Block size used by [`chi_square_test`].
pub const DEFAULT_BLOCK_SIZE: usize = 32;

/// Result of a single randomness test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    /// Computed statistic (`+inf` for a degenerate runs input).
    pub metric: f64,
    pub threshold: f64,
    /// Named values. Non-degenerate outcomes also carry an auxiliary
    /// `p_value`, which does not affect `passed`.
    pub details: BTreeMap<String, f64>,
}

impl TestOutcome {
    fn new(name: &str, passed: bool, metric: f64, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            passed,
            metric,
            threshold,
            details: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &str, value: f64) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// Input errors raised before (or instead of) computing a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatteryError {
    #[error("no bits provided for analysis")]
    EmptySequence,
    #[error("unknown test: {0}")]
    UnknownTest(String),
    #[error("sequence too short for chi-square test: need {needed} bits, got {got}")]
    SequenceTooShort { needed: usize, got: usize },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unpack a byte slice into individual bits (MSB first per byte).
pub fn bytes_to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

fn count_ones(bits: &[u8]) -> usize {
    bits.iter().filter(|&&b| b != 0).count()
}

fn require_bits(bits: &[u8]) -> Result<usize, BatteryError> {
    if bits.is_empty() {
        Err(BatteryError::EmptySequence)
    } else {
        Ok(bits.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 1. FREQUENCY
// ═══════════════════════════════════════════════════════════════════════════════

/// Monobit frequency -- `|ones - zeros| / n` must stay below 0.01.
pub fn frequency_test(bits: &[u8]) -> Result<TestOutcome, BatteryError> {
    let n = require_bits(bits)?;
    let ones = count_ones(bits);
    let zeros = n - ones;
    let balance = (ones as f64 - zeros as f64) / n as f64;
    let metric = balance.abs();
    let threshold = 0.01;

    let s_obs = (ones as f64 - zeros as f64).abs() / (n as f64).sqrt();
    let p = erfc(s_obs / 2.0_f64.sqrt());

    Ok(TestOutcome::new("frequency", metric < threshold, metric, threshold)
        .with("ones", ones as f64)
        .with("zeros", zeros as f64)
        .with("p_value", p))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 2. RUNS
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs test -- z-score of the observed run count against `2nπ(1-π)`.
///
/// A constant sequence has no defined variance and is reported as a failing
/// outcome with `metric = +inf` and `threshold = 0`.
pub fn runs_test(bits: &[u8]) -> Result<TestOutcome, BatteryError> {
    let n = require_bits(bits)?;
    let ones = count_ones(bits);
    let pi = ones as f64 / n as f64;

    if ones == 0 || ones == n {
        return Ok(TestOutcome::new("runs", false, f64::INFINITY, 0.0)
            .with("runs", 1.0)
            .with("pi", pi));
    }

    let transitions = bits
        .windows(2)
        .filter(|w| (w[0] != 0) != (w[1] != 0))
        .count();
    let runs = 1 + transitions;
    let nf = n as f64;
    let expected_runs = 2.0 * nf * pi * (1.0 - pi);
    let denominator = 2.0 * (2.0 * nf).sqrt() * pi * (1.0 - pi);
    let z = if denominator == 0.0 {
        0.0
    } else {
        (runs as f64 - expected_runs).abs() / denominator
    };
    let threshold = 1.96;

    Ok(TestOutcome::new("runs", z < threshold, z, threshold)
        .with("runs", runs as f64)
        .with("expected_runs", expected_runs)
        .with("pi", pi)
        .with("p_value", erfc(z / 2.0_f64.sqrt())))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 3. CHI-SQUARE
// ═══════════════════════════════════════════════════════════════════════════════

/// Chi-square over consecutive [`DEFAULT_BLOCK_SIZE`]-bit blocks.
pub fn chi_square_test(bits: &[u8]) -> Result<TestOutcome, BatteryError> {
    chi_square_test_with_block_size(bits, DEFAULT_BLOCK_SIZE)
}

/// Chi-square over consecutive `block_size`-bit blocks.
///
/// A trailing partial block is discarded. The statistic is
/// `Σ (ones - M/2)² / (M/2)` and passes while it stays below the number of
/// full blocks.
pub fn chi_square_test_with_block_size(
    bits: &[u8],
    block_size: usize,
) -> Result<TestOutcome, BatteryError> {
    let n = require_bits(bits)?;
    let block_size = block_size.max(1);
    if n < block_size {
        return Err(BatteryError::SequenceTooShort {
            needed: block_size,
            got: n,
        });
    }

    let ones_counts: Vec<usize> = bits.chunks_exact(block_size).map(count_ones).collect();
    let blocks = ones_counts.len();
    let expected = block_size as f64 / 2.0;
    let statistic: f64 = ones_counts
        .iter()
        .map(|&c| {
            let diff = c as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let mean_ones = ones_counts.iter().sum::<usize>() as f64 / blocks as f64;
    let threshold = blocks as f64;

    let p = ChiSquared::new(blocks as f64)
        .map(|dist| dist.sf(statistic))
        .unwrap_or(0.0);

    Ok(
        TestOutcome::new("chi_square", statistic < threshold, statistic, threshold)
            .with("blocks", blocks as f64)
            .with("mean_ones", mean_ones)
            .with("p_value", p),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Test battery
// ═══════════════════════════════════════════════════════════════════════════════

fn lookup(name: &str) -> Option<fn(&[u8]) -> Result<TestOutcome, BatteryError>> {
    match name {
        "frequency" => Some(frequency_test),
        "runs" => Some(runs_test),
        "chi_square" => Some(chi_square_test),
        _ => None,
    }
}

/// Run the selected tests (or all of [`AVAILABLE_TESTS`]) over `bits`.
///
/// Every name is checked before any test runs. Results follow the order of
/// `selected`.
pub fn run_selected_tests<S: AsRef<str>>(
    bits: &[u8],
    selected: Option<&[S]>,
) -> Result<Vec<TestOutcome>, BatteryError> {
    require_bits(bits)?;

    let names: Vec<&str> = match selected {
        Some(names) if !names.is_empty() => names.iter().map(|s| s.as_ref()).collect(),
        _ => AVAILABLE_TESTS.to_vec(),
    };

    let tests = names
        .iter()
        .map(|&name| lookup(name).ok_or_else(|| BatteryError::UnknownTest(name.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    tests.into_iter().map(|test_fn| test_fn(bits)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternating(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 2) as u8).collect()
    }

    /// 0,0,1,1,0,0,1,1,... -- balanced with exactly the expected run count.
    fn paired(n: usize) -> Vec<u8> {
        (0..n).map(|i| ((i / 2) % 2) as u8).collect()
    }

    #[test]
    fn test_bytes_to_bits() {
        let bits = bytes_to_bits(&[0b10110001u8]);
        assert_eq!(bits, vec![1, 0, 1, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_frequency_all_zero_fails() {
        let outcome = frequency_test(&[0u8; 100]).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.metric, 1.0);
        assert_eq!(outcome.details["ones"], 0.0);
        assert_eq!(outcome.details["zeros"], 100.0);
    }

    #[test]
    fn test_frequency_alternating_passes() {
        let outcome = frequency_test(&alternating(100)).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.metric, 0.0);
        assert_eq!(outcome.threshold, 0.01);
    }

    #[test]
    fn test_runs_constant_is_degenerate() {
        for n in [1, 7, 100] {
            let outcome = runs_test(&vec![1u8; n]).unwrap();
            assert!(!outcome.passed);
            assert!(outcome.metric.is_infinite());
            assert_eq!(outcome.threshold, 0.0);
            assert_eq!(outcome.details["pi"], 1.0);
        }
    }

    #[test]
    fn test_runs_paired_passes() {
        let outcome = runs_test(&paired(100)).unwrap();
        assert_eq!(outcome.details["runs"], 50.0);
        assert_eq!(outcome.details["expected_runs"], 50.0);
        assert!(outcome.passed);
        assert_eq!(outcome.metric, 0.0);
    }

    #[test]
    fn test_runs_alternating_fails() {
        // 100 runs against an expectation of 50: far too many switches.
        let outcome = runs_test(&alternating(100)).unwrap();
        assert_eq!(outcome.details["runs"], 100.0);
        assert!(!outcome.passed);
        assert!(outcome.metric > 1.96);
    }

    #[test]
    fn test_chi_square_too_short() {
        let err = chi_square_test(&[1u8; 10]).unwrap_err();
        assert_eq!(err, BatteryError::SequenceTooShort { needed: 32, got: 10 });
    }

    #[test]
    fn test_chi_square_balanced_blocks() {
        // 70 bits: two full blocks of 16 ones each, 6 trailing bits discarded.
        let outcome = chi_square_test(&alternating(70)).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.metric, 0.0);
        assert_eq!(outcome.threshold, 2.0);
        assert_eq!(outcome.details["blocks"], 2.0);
        assert_eq!(outcome.details["mean_ones"], 16.0);
    }

    #[test]
    fn test_chi_square_all_ones_fails() {
        let outcome = chi_square_test(&[1u8; 64]).unwrap();
        // Each block contributes (32 - 16)² / 16 = 16.
        assert_eq!(outcome.metric, 32.0);
        assert!(!outcome.passed);
    }

    #[test]
    fn test_run_selected_default_order() {
        let outcomes = run_selected_tests::<&str>(&paired(128), None).unwrap();
        let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, AVAILABLE_TESTS.to_vec());
    }

    #[test]
    fn test_run_selected_respects_order() {
        let selected = ["chi_square", "frequency"];
        let outcomes = run_selected_tests(&paired(128), Some(&selected[..])).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "chi_square");
        assert_eq!(outcomes[1].name, "frequency");
    }

    #[test]
    fn test_run_selected_unknown_rejected_before_running() {
        // chi_square would fail on 10 bits; the unknown name must win.
        let selected = ["chi_square", "poker"];
        let err = run_selected_tests(&[0u8, 1, 0, 1, 0, 1, 0, 1, 0, 1], Some(&selected[..]))
            .unwrap_err();
        assert_eq!(err, BatteryError::UnknownTest("poker".into()));
    }

    #[test]
    fn test_run_selected_empty_bits() {
        let err = run_selected_tests::<&str>(&[], None).unwrap_err();
        assert_eq!(err, BatteryError::EmptySequence);
    }

    #[test]
    fn test_p_values_are_probabilities() {
        let outcomes = run_selected_tests::<&str>(&paired(256), None).unwrap();
        for outcome in outcomes {
            let p = outcome.details["p_value"];
            assert!((0.0..=1.0).contains(&p), "{} p={p}", outcome.name);
        }
    }

    #[test]
    fn test_detail_keys() {
        let keys = |outcome: TestOutcome| outcome.details.into_keys().collect::<Vec<_>>();
        let bits = paired(256);
        assert_eq!(
            keys(frequency_test(&bits).unwrap()),
            ["ones", "p_value", "zeros"]
        );
        assert_eq!(
            keys(runs_test(&bits).unwrap()),
            ["expected_runs", "p_value", "pi", "runs"]
        );
        assert_eq!(
            keys(chi_square_test(&bits).unwrap()),
            ["blocks", "mean_ones", "p_value"]
        );
        // Degenerate runs input has no distribution to report against.
        assert_eq!(keys(runs_test(&[1u8; 16]).unwrap()), ["pi", "runs"]);
    }
}
