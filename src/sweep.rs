//! # Sweep
//!
//! Runs the convergence driver once per parameter point, strictly in scan order. Each point's
//! cache state starts from the previous point's steady state, so points are never measured in
//! parallel or out of order. Rows are handed to the [`Reporter`] as soon as a point converges.

use crate::Error;
use crate::chain::{ChainPolicy, ChainSpec};
use crate::converge::{ConvergenceConfig, run_until_converged};
use crate::format_size;
use crate::probe::LatencyProbe;
use crate::report::Reporter;
use log::info;

/// One converged measurement of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub spec: ChainSpec,
    /// Converged latency, in probe units.
    pub latency: f64,
    /// `latency` over the previous point's latency (over 1.0 for the first point).
    pub ratio: f64,
}

/// Points in scan order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepResult {
    points: Vec<SweepPoint>,
}

impl SweepResult {
    pub fn push(&mut self, point: SweepPoint) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[SweepPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Measures every spec in order and returns the swept result.
pub fn run_sweep<P, R>(
    probe: &mut P,
    specs: &[ChainSpec],
    convergence: &ConvergenceConfig,
    reporter: &mut R,
) -> Result<SweepResult, Error>
where
    P: LatencyProbe + ?Sized,
    R: Reporter + ?Sized,
{
    let mut result = SweepResult::default();
    let mut previous = 1.0;
    for spec in specs {
        info!(
            "Stride = {}, array size = {} ({})",
            spec.stride,
            spec.working_set,
            format_size(spec.working_set as u64)
        );
        probe.prepare(spec)?;
        let latency = run_until_converged(convergence, || probe.measure())?;
        let point = SweepPoint {
            spec: *spec,
            latency,
            ratio: latency / previous,
        };
        reporter.row(&point)?;
        result.push(point);
        previous = latency;
    }
    Ok(result)
}

/// Strides doubling from `min_stride` to `max_stride` over a fixed working set.
pub fn stride_sequence(
    min_stride: usize,
    max_stride: usize,
    working_set: usize,
    policy: ChainPolicy,
) -> Vec<ChainSpec> {
    std::iter::successors(Some(min_stride), |&stride| stride.checked_mul(2))
        .take_while(|&stride| stride > 0 && stride <= max_stride)
        .map(|stride| ChainSpec::new(stride, working_set, policy))
        .collect()
}

/// Working sets growing by `step` from `min_size` to `max_size` at a fixed stride.
pub fn size_sequence(
    min_size: usize,
    max_size: usize,
    step: usize,
    stride: usize,
    policy: ChainPolicy,
) -> Vec<ChainSpec> {
    (min_size..=max_size)
        .step_by(step)
        .map(|size| ChainSpec::new(stride, size, policy))
        .collect()
}

/// One working set per assumed associativity: `ways` slots, all `stride` bytes apart.
pub fn associativity_sequence(
    min_ways: usize,
    max_ways: usize,
    step: usize,
    stride: usize,
    policy: ChainPolicy,
) -> Vec<ChainSpec> {
    (min_ways..=max_ways)
        .step_by(step)
        .map(|ways| ChainSpec::new(stride, ways * stride, policy))
        .collect()
}

/// Set-conflict strides `line_size * sets` for doubling `sets`, each walking `ways` slots.
pub fn set_sequence(
    line_size: usize,
    min_sets: usize,
    max_sets: usize,
    ways: usize,
    policy: ChainPolicy,
) -> Vec<ChainSpec> {
    std::iter::successors(Some(min_sets), |&sets| sets.checked_mul(2))
        .take_while(|&sets| sets > 0 && sets <= max_sets)
        .map(|sets| ChainSpec::new(line_size * sets, ways * line_size * sets, policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converge::ErrorMetric;
    use crate::report::CsvReporter;

    /// Replays a fixed latency per stride.
    struct TableProbe {
        table: Vec<(usize, f64)>,
        current: f64,
        prepared: Vec<ChainSpec>,
    }

    impl LatencyProbe for TableProbe {
        fn prepare(&mut self, spec: &ChainSpec) -> Result<(), Error> {
            self.current = self
                .table
                .iter()
                .find(|(stride, _)| *stride == spec.stride)
                .map(|(_, latency)| *latency)
                .unwrap_or(0.0);
            self.prepared.push(*spec);
            Ok(())
        }

        fn measure(&mut self) -> Result<f64, Error> {
            Ok(self.current)
        }

        fn arena_len(&self) -> usize {
            1 << 20
        }
    }

    fn convergence() -> ConvergenceConfig {
        ConvergenceConfig {
            precision: 1.0,
            metric: ErrorMetric::Relative,
            required_successes: 3,
            total_runs: 20,
        }
    }

    #[test]
    fn sweep_computes_ratios_and_streams_rows() {
        let mut probe = TableProbe {
            table: vec![(16, 4.0), (32, 8.0), (64, 8.0), (128, 2.0)],
            current: 0.0,
            prepared: Vec::new(),
        };
        let specs = stride_sequence(16, 128, 4096, ChainPolicy::SequentialCyclic);
        let mut reporter = CsvReporter::new(Vec::new());
        let result = run_sweep(&mut probe, &specs, &convergence(), &mut reporter).unwrap();

        assert_eq!(probe.prepared, specs);
        let ratios: Vec<f64> = result.points().iter().map(|p| p.ratio).collect();
        assert_eq!(ratios, vec![4.0, 2.0, 1.0, 0.25]);

        let csv = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            csv,
            "stride,arr_size,result,increase\n\
             16,4096,4,4\n\
             32,4096,8,2\n\
             64,4096,8,1\n\
             128,4096,2,0.25\n"
        );
    }

    #[test]
    fn divergence_aborts_the_sweep_after_streaming_earlier_rows() {
        struct Noisy {
            stride: usize,
            sample: f64,
        }
        impl LatencyProbe for Noisy {
            fn prepare(&mut self, spec: &ChainSpec) -> Result<(), Error> {
                self.stride = spec.stride;
                Ok(())
            }
            fn measure(&mut self) -> Result<f64, Error> {
                if self.stride < 64 {
                    return Ok(10.0);
                }
                self.sample *= 3.0;
                Ok(self.sample)
            }
            fn arena_len(&self) -> usize {
                1 << 20
            }
        }

        let mut probe = Noisy {
            stride: 0,
            sample: 1.0,
        };
        let specs = stride_sequence(16, 128, 4096, ChainPolicy::SequentialCyclic);
        let mut reporter = CsvReporter::new(Vec::new());
        let err = run_sweep(&mut probe, &specs, &convergence(), &mut reporter).unwrap_err();
        assert!(matches!(err, Error::MeasurementDivergence { runs: 20, .. }));

        let csv = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn sequences() {
        let strides: Vec<usize> = stride_sequence(16, 128, 1 << 20, ChainPolicy::SequentialCyclic)
            .iter()
            .map(|s| s.stride)
            .collect();
        assert_eq!(strides, vec![16, 32, 64, 128]);

        let sizes: Vec<usize> =
            size_sequence(32 * 1024, 70 * 1024, 2048, 128, ChainPolicy::SequentialCyclic)
                .iter()
                .map(|s| s.working_set)
                .collect();
        assert_eq!(sizes.len(), 20);
        assert_eq!(sizes[0], 32 * 1024);
        assert_eq!(*sizes.last().unwrap(), 70 * 1024);

        let assoc = associativity_sequence(4, 16, 2, 8192, ChainPolicy::SequentialCyclic);
        assert_eq!(assoc.len(), 7);
        assert!(assoc.iter().all(|s| s.stride == 8192 && s.working_set % 8192 == 0));
        assert_eq!(assoc[6].working_set, 16 * 8192);

        let sets = set_sequence(64, 8, 128, 5, ChainPolicy::SequentialCyclic);
        let strides: Vec<usize> = sets.iter().map(|s| s.stride).collect();
        assert_eq!(strides, vec![512, 1024, 2048, 4096, 8192]);
        assert!(sets.iter().all(|s| s.working_set == 5 * s.stride));
    }
}
