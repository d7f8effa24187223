//! Turning a detected spike into a cache parameter.

use crate::Error;
use crate::detect::{SpikePolicy, find_spike};
use crate::sweep::{SweepPoint, SweepResult};
use std::fmt;

/// The quantity a sweep is searching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    LineSize,
    CacheSize,
    SetCount,
    Associativity,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::LineSize => "cache line size",
            Metric::CacheSize => "cache size",
            Metric::SetCount => "number of sets",
            Metric::Associativity => "associativity",
        };
        f.write_str(name)
    }
}

/// A cache described by line size, set count and associativity.
///
/// The capacity is always `line_size * set_count * associativity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    pub line_size: usize,
    pub set_count: usize,
    pub associativity: usize,
}

impl CacheGeometry {
    pub fn new(line_size: usize, set_count: usize, associativity: usize) -> Result<Self, Error> {
        if line_size == 0 || set_count == 0 || associativity == 0 {
            return Err(Error::InconsistentGeometry(format!(
                "line size {}, {} sets, {} ways",
                line_size, set_count, associativity
            )));
        }
        Ok(CacheGeometry {
            line_size,
            set_count,
            associativity,
        })
    }

    pub fn cache_size(&self) -> usize {
        self.line_size * self.set_count * self.associativity
    }
}

fn spike(result: &SweepResult, policy: SpikePolicy, metric: Metric) -> Result<usize, Error> {
    find_spike(result, policy).ok_or(Error::NoSpikeFound(metric))
}

/// The point at which the policy fires.
fn spike_point(
    result: &SweepResult,
    policy: SpikePolicy,
    metric: Metric,
) -> Result<&SweepPoint, Error> {
    let index = spike(result, policy, metric)?;
    Ok(&result.points()[index])
}

/// Line size: the stride at which two neighbouring accesses stop sharing a line.
pub fn line_size(result: &SweepResult, policy: SpikePolicy) -> Result<usize, Error> {
    Ok(spike_point(result, policy, Metric::LineSize)?.spec.stride)
}

/// Capacity: the working set at which latency jumps.
pub fn cache_size(result: &SweepResult, policy: SpikePolicy) -> Result<usize, Error> {
    Ok(spike_point(result, policy, Metric::CacheSize)?.spec.working_set)
}

/// Set count from a set-conflict stride sweep: the spike stride in lines.
pub fn set_count(
    result: &SweepResult,
    policy: SpikePolicy,
    line_size: usize,
) -> Result<usize, Error> {
    Ok(spike_point(result, policy, Metric::SetCount)?.spec.stride / line_size)
}

/// Associativity from an assumed-associativity sweep.
///
/// The way count at which latency jumps implies a set count, which is rounded down to a power
/// of two and the associativity rederived from it. Returns `(set_count, associativity)`.
pub fn associativity(
    result: &SweepResult,
    policy: SpikePolicy,
    line_size: usize,
    cache_size: usize,
) -> Result<(usize, usize), Error> {
    let crossing = spike_point(result, policy, Metric::Associativity)?;
    let assumed_ways = crossing.spec.working_set / crossing.spec.stride;
    round_sets(line_size, cache_size, assumed_ways)
}

/// Rounds the set count implied by `assumed_ways` down to a power of two.
pub fn round_sets(
    line_size: usize,
    cache_size: usize,
    assumed_ways: usize,
) -> Result<(usize, usize), Error> {
    let assumed_sets = match assumed_ways.checked_mul(line_size) {
        Some(way_bytes) if way_bytes > 0 => cache_size / way_bytes,
        _ => 0,
    };
    if assumed_sets == 0 {
        return Err(Error::InconsistentGeometry(format!(
            "{} ways of {}-byte lines do not fit in {} bytes",
            assumed_ways, line_size, cache_size
        )));
    }
    let sets = 1 << assumed_sets.ilog2();
    let ways = cache_size / sets / line_size;
    if ways == 0 {
        return Err(Error::InconsistentGeometry(format!(
            "{} sets of {}-byte lines exceed {} bytes",
            sets, line_size, cache_size
        )));
    }
    Ok((sets, ways))
}

/// Associativity implied by a known set count; the capacity must split evenly.
pub fn ways_for_sets(
    line_size: usize,
    cache_size: usize,
    set_count: usize,
) -> Result<usize, Error> {
    let set_bytes = line_size * set_count;
    if set_bytes == 0 || cache_size % set_bytes != 0 || cache_size < set_bytes {
        return Err(Error::InconsistentGeometry(format!(
            "{} bytes do not split into {} sets of {}-byte lines",
            cache_size, set_count, line_size
        )));
    }
    Ok(cache_size / set_bytes)
}
