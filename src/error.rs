use crate::infer::Metric;
use thiserror::Error;

/// Every way the instrument can fail to produce a trustworthy reading.
#[derive(Debug, Error)]
pub enum Error {
    /// The arena could not be allocated at the requested size.
    #[error("failed to allocate array of {len} bytes aligned to {align} bytes")]
    ResourceExhaustion { len: usize, align: usize },

    /// The running mean never settled within the run budget.
    #[error("benchmark results diverge after {runs} runs (mean {mean:.2}, error {error:.3})")]
    MeasurementDivergence { runs: u32, mean: f64, error: f64 },

    /// A sweep finished without its detection policy firing.
    #[error("could not detect {0}: no performance spike detected")]
    NoSpikeFound(Metric),

    /// Detected values cannot be combined into a consistent cache geometry.
    #[error("inconsistent cache geometry: {0}")]
    InconsistentGeometry(String),

    /// A chain link does not lead to a slot of the arena.
    #[error("chain link at slot {slot} points outside the arena")]
    BrokenChain { slot: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to write report row: {0}")]
    Report(#[from] std::io::Error),
}
