//! Spike detection over a finished sweep.
//!
//! Each policy looks for the one point where latency changes shape as the scanned parameter
//! crosses an architectural boundary. The first point of a sweep never qualifies: its ratio is
//! taken against the 1.0 sentinel, not against a measurement.

use crate::sweep::SweepResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpikePolicy {
    /// First point whose ratio exceeds the mean ratio of the sweep.
    MeanThreshold,
    /// First point whose latency exceeds the previous point's by more than the threshold.
    AbsoluteJump(f64),
    /// First point whose ratio exceeds the threshold.
    RelativeJump(f64),
    /// Point with the largest ratio.
    MaxRatio,
    /// Point with the smallest ratio, for boundaries that show up as a latency drop.
    MinRatio,
}

/// Index of the spike point in `result`, if the policy fires.
pub fn find_spike(result: &SweepResult, policy: SpikePolicy) -> Option<usize> {
    let points = result.points();
    if points.len() < 2 {
        return None;
    }
    let candidates = points.iter().enumerate().skip(1);
    match policy {
        SpikePolicy::MeanThreshold => {
            let mean_ratio =
                points[1..].iter().map(|p| p.ratio).sum::<f64>() / (points.len() - 1) as f64;
            candidates
                .filter(|(_, p)| p.ratio > mean_ratio)
                .map(|(i, _)| i)
                .next()
        }
        SpikePolicy::AbsoluteJump(threshold) => (1..points.len())
            .find(|&i| points[i].latency - points[i - 1].latency > threshold),
        SpikePolicy::RelativeJump(threshold) => candidates
            .filter(|(_, p)| p.ratio > threshold)
            .map(|(i, _)| i)
            .next(),
        // ties resolve to the earliest point
        SpikePolicy::MaxRatio => candidates
            .rev()
            .max_by(|(_, a), (_, b)| a.ratio.total_cmp(&b.ratio))
            .map(|(i, _)| i),
        SpikePolicy::MinRatio => candidates
            .min_by(|(_, a), (_, b)| a.ratio.total_cmp(&b.ratio))
            .map(|(i, _)| i),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainPolicy, ChainSpec};
    use crate::sweep::SweepPoint;

    fn sweep_from_latencies(latencies: &[f64]) -> SweepResult {
        let mut result = SweepResult::default();
        let mut previous = 1.0;
        for (i, &latency) in latencies.iter().enumerate() {
            result.push(SweepPoint {
                spec: ChainSpec::new(16 << i, 1 << 20, ChainPolicy::SequentialCyclic),
                latency,
                ratio: latency / previous,
            });
            previous = latency;
        }
        result
    }

    #[test]
    fn mean_threshold_excludes_first_ratio() {
        // ratios 10, 1, 1, 5, 1: the mean of the last four is 2.0
        let result = sweep_from_latencies(&[10.0, 10.0, 10.0, 50.0, 50.0]);
        let ratios: Vec<f64> = result.points().iter().map(|p| p.ratio).collect();
        assert_eq!(ratios, vec![10.0, 1.0, 1.0, 5.0, 1.0]);
        assert_eq!(find_spike(&result, SpikePolicy::MeanThreshold), Some(3));
        assert_eq!(find_spike(&result, SpikePolicy::MaxRatio), Some(3));
    }

    #[test]
    fn flat_sweep_has_no_mean_spike() {
        let result = sweep_from_latencies(&[3.0, 3.0, 3.0, 3.0]);
        assert_eq!(find_spike(&result, SpikePolicy::MeanThreshold), None);
        assert_eq!(find_spike(&result, SpikePolicy::AbsoluteJump(0.5)), None);
        assert_eq!(find_spike(&result, SpikePolicy::RelativeJump(1.0)), None);
    }

    #[test]
    fn absolute_jump_compares_adjacent_latencies() {
        let result = sweep_from_latencies(&[100.0, 120.0, 140.0, 600.0, 650.0, 2000.0]);
        assert_eq!(find_spike(&result, SpikePolicy::AbsoluteJump(300.0)), Some(3));
        assert_eq!(find_spike(&result, SpikePolicy::AbsoluteJump(1000.0)), Some(5));
        assert_eq!(find_spike(&result, SpikePolicy::AbsoluteJump(5000.0)), None);
    }

    #[test]
    fn relative_jump_uses_ratio() {
        let result = sweep_from_latencies(&[100.0, 110.0, 330.0, 340.0]);
        assert_eq!(find_spike(&result, SpikePolicy::RelativeJump(2.0)), Some(2));
    }

    #[test]
    fn extreme_ratios() {
        let result = sweep_from_latencies(&[100.0, 300.0, 900.0, 450.0, 440.0]);
        // ratios after the first: 3, 3, 0.5, 0.98
        assert_eq!(find_spike(&result, SpikePolicy::MaxRatio), Some(1));
        assert_eq!(find_spike(&result, SpikePolicy::MinRatio), Some(3));
    }

    #[test]
    fn single_point_never_spikes() {
        let result = sweep_from_latencies(&[100.0]);
        assert_eq!(find_spike(&result, SpikePolicy::MaxRatio), None);
        assert_eq!(find_spike(&SweepResult::default(), SpikePolicy::MeanThreshold), None);
    }
}
