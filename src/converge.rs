//! # Convergence
//!
//! Single timings are dominated by scheduler and interrupt jitter, so each sweep point is the
//! running mean of repeated samples, taken once that mean stops moving: the change between
//! consecutive means must stay under `precision` for `required_successes` samples in a row. A
//! point that does not settle within `total_runs` samples is an error, never a reading.

use crate::Error;
use log::{debug, info};

/// How the change between consecutive running means is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMetric {
    /// `|mean - previous| / previous`, in percent.
    Relative,
    /// `|mean - previous|`, in probe units.
    Absolute,
}

impl ErrorMetric {
    fn error(self, previous: f64, current: f64) -> f64 {
        let delta = (current - previous).abs();
        match self {
            ErrorMetric::Absolute => delta,
            ErrorMetric::Relative if previous == 0.0 => {
                if delta == 0.0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            }
            ErrorMetric::Relative => delta / previous.abs() * 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceConfig {
    /// Largest error still counted as stable.
    pub precision: f64,
    pub metric: ErrorMetric,
    /// Consecutive stable samples needed to converge.
    pub required_successes: u32,
    /// Samples allowed before giving up.
    pub total_runs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    Running,
    Converged,
    Diverged,
}

/// Running-mean state machine fed one sample at a time.
#[derive(Debug, Clone)]
pub struct Convergence {
    config: ConvergenceConfig,
    runs: u32,
    sum: f64,
    mean: Option<f64>,
    error: f64,
    streak: u32,
    state: ConvergenceState,
}

impl Convergence {
    pub fn new(config: ConvergenceConfig) -> Self {
        Convergence {
            config,
            runs: 0,
            sum: 0.0,
            mean: None,
            error: 0.0,
            streak: 0,
            state: ConvergenceState::Running,
        }
    }

    /// Folds in one sample. Samples arriving after a final state are ignored.
    ///
    /// The first sample has no previous mean to compare against and counts as stable.
    pub fn push(&mut self, sample: f64) -> ConvergenceState {
        if self.state != ConvergenceState::Running {
            return self.state;
        }
        self.runs += 1;
        self.sum += sample;
        let current = self.sum / f64::from(self.runs);
        self.error = match self.mean {
            Some(previous) => self.config.metric.error(previous, current),
            None => 0.0,
        };
        self.mean = Some(current);
        debug!(
            "Run {}: Current benchmark results = {}, current error = {}{}",
            self.runs,
            current,
            self.error,
            match self.config.metric {
                ErrorMetric::Relative => "%",
                ErrorMetric::Absolute => "",
            }
        );

        if self.error < self.config.precision {
            self.streak += 1;
            if self.streak >= self.config.required_successes {
                self.state = ConvergenceState::Converged;
                return self.state;
            }
        } else {
            self.streak = 0;
        }
        if self.runs >= self.config.total_runs {
            self.state = ConvergenceState::Diverged;
        }
        self.state
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    /// Samples consumed so far.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Current running mean, 0 before the first sample.
    pub fn mean(&self) -> f64 {
        self.mean.unwrap_or(0.0)
    }

    /// Error of the last sample.
    pub fn error(&self) -> f64 {
        self.error
    }
}

/// Samples `measure` until the running mean converges and returns it.
pub fn run_until_converged<F>(config: &ConvergenceConfig, mut measure: F) -> Result<f64, Error>
where
    F: FnMut() -> Result<f64, Error>,
{
    let mut convergence = Convergence::new(*config);
    loop {
        match convergence.push(measure()?) {
            ConvergenceState::Running => {}
            ConvergenceState::Converged => {
                info!(
                    "Converged to {} on the {}-th iteration",
                    convergence.mean(),
                    convergence.runs()
                );
                return Ok(convergence.mean());
            }
            ConvergenceState::Diverged => {
                return Err(Error::MeasurementDivergence {
                    runs: convergence.runs(),
                    mean: convergence.mean(),
                    error: convergence.error(),
                });
            }
        }
    }
}
