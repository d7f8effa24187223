//! Instrument configuration.
//!
//! Everything the measurement depends on is a field here; [`Config::default`] carries the
//! constants the binary runs with. Thresholds are in the unit the probe reports (nanoseconds per
//! walk with [`Normalization::Total`]), so they must be retuned together with `accesses`.

use crate::chain::ChainPolicy;
use crate::converge::{ConvergenceConfig, ErrorMetric};
use crate::detect::SpikePolicy;
use crate::probe::Normalization;
use crate::{Error, GIB, KIB};

/// Line size sweep: stride doubles from `min_stride` to `max_stride` over the whole arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineScan {
    pub min_stride: usize,
    pub max_stride: usize,
    pub policy: ChainPolicy,
    pub detection: SpikePolicy,
}

/// Capacity sweep: working set grows by `step` from `min_size` to `max_size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityScan {
    pub min_size: usize,
    pub max_size: usize,
    pub step: usize,
    /// Stride in cache lines; 2 touches every other set.
    pub stride_lines: usize,
    pub policy: ChainPolicy,
    pub detection: SpikePolicy,
}

/// Where the set count comes from once associativity is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAxis {
    /// Round the implied set count down to a power of two.
    Rounded,
    /// Run an extra sweep over the set-conflict stride.
    Stride,
}

/// Associativity sweep: `working_set = ways * line_size * max_sets` for each assumed way count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociativityScan {
    pub min_ways: usize,
    pub max_ways: usize,
    pub step: usize,
    pub policy: ChainPolicy,
    pub detection: SpikePolicy,
    pub set_axis: SetAxis,
}

/// Set count sweep: stride doubles from `line_size * min_sets` to `line_size * max_sets`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetScan {
    pub min_sets: usize,
    pub max_sets: usize,
    pub policy: ChainPolicy,
    pub detection: SpikePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bytes in the measurement arena.
    pub arena_len: usize,
    /// Bytes in the dummy arena overwritten before each sample; 0 disables flushing.
    pub flush_len: usize,
    /// Loads per walk of a cyclic chain.
    pub accesses: u64,
    /// Load budget of a randomized chain.
    pub random_chain_accesses: usize,
    /// Seed of the randomized chain builder.
    pub seed: u64,
    pub normalization: Normalization,
    /// CPU core the measurement thread is pinned to.
    pub cpu_core: Option<usize>,
    pub convergence: ConvergenceConfig,
    pub line: LineScan,
    pub capacity: CapacityScan,
    pub associativity: AssociativityScan,
    pub sets: SetScan,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            arena_len: GIB,
            flush_len: 0,
            accesses: 500_000_000,
            random_chain_accesses: 1_000_000,
            seed: 0x5EED_CAC4E,
            normalization: Normalization::Total,
            cpu_core: Some(0),
            convergence: ConvergenceConfig {
                precision: 1.0,
                metric: ErrorMetric::Relative,
                required_successes: 5,
                total_runs: 200,
            },
            line: LineScan {
                min_stride: 16,
                max_stride: 128,
                policy: ChainPolicy::SequentialCyclic,
                detection: SpikePolicy::MeanThreshold,
            },
            capacity: CapacityScan {
                min_size: 32 * KIB,
                max_size: 70 * KIB,
                step: 2 * KIB,
                stride_lines: 2,
                policy: ChainPolicy::SequentialCyclic,
                detection: SpikePolicy::AbsoluteJump(1e7),
            },
            associativity: AssociativityScan {
                min_ways: 4,
                max_ways: 16,
                step: 2,
                policy: ChainPolicy::SequentialCyclic,
                detection: SpikePolicy::AbsoluteJump(1.5e8),
                set_axis: SetAxis::Rounded,
            },
            sets: SetScan {
                min_sets: 8,
                max_sets: 128,
                policy: ChainPolicy::SequentialCyclic,
                detection: SpikePolicy::MaxRatio,
            },
        }
    }
}

impl Config {
    /// Rejects configurations no sweep could run with.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.accesses == 0 {
            return invalid("accesses must be non-zero".to_string());
        }
        let c = &self.convergence;
        if c.required_successes == 0 || c.total_runs < c.required_successes {
            return invalid(format!(
                "need 0 < required_successes ({}) <= total_runs ({})",
                c.required_successes, c.total_runs
            ));
        }
        if c.precision.is_nan() || c.precision <= 0.0 {
            return invalid(format!("precision {} must be positive", c.precision));
        }
        if self.line.min_stride == 0 || self.line.min_stride > self.line.max_stride {
            return invalid(format!(
                "line stride range {}..={} is empty",
                self.line.min_stride, self.line.max_stride
            ));
        }
        let cap = &self.capacity;
        if cap.step == 0 || cap.min_size > cap.max_size || cap.stride_lines == 0 {
            return invalid(format!(
                "capacity range {}..={} step {} (stride {} lines) is empty",
                cap.min_size, cap.max_size, cap.step, cap.stride_lines
            ));
        }
        let assoc = &self.associativity;
        if assoc.step == 0 || assoc.min_ways == 0 || assoc.min_ways > assoc.max_ways {
            return invalid(format!(
                "associativity range {}..={} step {} is empty",
                assoc.min_ways, assoc.max_ways, assoc.step
            ));
        }
        if self.sets.min_sets == 0 || self.sets.min_sets > self.sets.max_sets {
            return invalid(format!(
                "set range {}..={} is empty",
                self.sets.min_sets, self.sets.max_sets
            ));
        }
        Ok(())
    }
}
