//! # Instrument
//!
//! The top-level measurement: three sweeps run back to back, each seeded with what the previous
//! one found.
//!
//! 1. Line size: stride doubles over the whole arena.
//! 2. Capacity: working set grows at a stride of `stride_lines` lines.
//! 3. Associativity: `ways` slots placed `line_size * max_sets` apart, so they all compete for
//!    one set. The implied set count is rounded to a power of two, or measured by an extra
//!    set-conflict sweep when [`SetAxis::Stride`] is configured.

use crate::chain::ChainSpec;
use crate::config::{Config, SetAxis};
use crate::infer::{self, CacheGeometry};
use crate::probe::LatencyProbe;
use crate::report::Reporter;
use crate::sweep::{self, SweepResult, run_sweep};
use crate::{Error, format_size, format_size_fixed_int};
use log::{info, warn};

/// What a complete run found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub geometry: CacheGeometry,
    /// Capacity reported by the capacity sweep, before set rounding.
    pub measured_capacity: usize,
}

pub struct Instrument<'a, P: ?Sized, R: ?Sized> {
    config: &'a Config,
    probe: &'a mut P,
    reporter: &'a mut R,
}

impl<'a, P, R> Instrument<'a, P, R>
where
    P: LatencyProbe + ?Sized,
    R: Reporter + ?Sized,
{
    pub fn new(config: &'a Config, probe: &'a mut P, reporter: &'a mut R) -> Self {
        Instrument {
            config,
            probe,
            reporter,
        }
    }

    fn sweep(&mut self, specs: &[ChainSpec]) -> Result<SweepResult, Error> {
        run_sweep(
            &mut *self.probe,
            specs,
            &self.config.convergence,
            &mut *self.reporter,
        )
    }

    /// Sweeps the stride over the whole arena and returns the detected line size.
    pub fn find_line_size(&mut self) -> Result<usize, Error> {
        let scan = self.config.line;
        let specs = sweep::stride_sequence(
            scan.min_stride,
            scan.max_stride,
            self.probe.arena_len(),
            scan.policy,
        );
        let result = self.sweep(&specs)?;
        let line_size = infer::line_size(&result, scan.detection)?;
        info!("Result: cache line size is {}", line_size);
        Ok(line_size)
    }

    /// Sweeps the working set and returns the one at which latency jumps.
    pub fn find_cache_size(&mut self, line_size: usize) -> Result<usize, Error> {
        let scan = self.config.capacity;
        let specs = sweep::size_sequence(
            scan.min_size,
            scan.max_size,
            scan.step,
            scan.stride_lines * line_size,
            scan.policy,
        );
        let result = self.sweep(&specs)?;
        let cache_size = infer::cache_size(&result, scan.detection)?;
        info!(
            "Result: cache size is {} ({})",
            cache_size,
            format_size(cache_size as u64)
        );
        Ok(cache_size)
    }

    /// Sweeps the assumed associativity and returns `(set_count, associativity)`.
    pub fn find_associativity(
        &mut self,
        line_size: usize,
        cache_size: usize,
    ) -> Result<(usize, usize), Error> {
        let scan = self.config.associativity;
        let stride = line_size * self.config.sets.max_sets;
        let specs = sweep::associativity_sequence(
            scan.min_ways,
            scan.max_ways,
            scan.step,
            stride,
            scan.policy,
        );
        let result = self.sweep(&specs)?;
        let (sets, ways) = infer::associativity(&result, scan.detection, line_size, cache_size)?;
        info!("Result: associativity is {} ({} sets)", ways, sets);
        Ok((sets, ways))
    }

    /// Sweeps the set-conflict stride with `ways + 1` competing lines and returns the set count.
    pub fn find_set_count(&mut self, line_size: usize, ways: usize) -> Result<usize, Error> {
        let scan = self.config.sets;
        let specs =
            sweep::set_sequence(line_size, scan.min_sets, scan.max_sets, ways + 1, scan.policy);
        let result = self.sweep(&specs)?;
        let sets = infer::set_count(&result, scan.detection, line_size)?;
        info!("Result: number of sets is {}", sets);
        Ok(sets)
    }

    /// Runs every sweep and assembles the cache geometry.
    pub fn run(&mut self) -> Result<Measurement, Error> {
        let line_size = self.find_line_size()?;
        let cache_size = self.find_cache_size(line_size)?;
        let (mut sets, mut ways) = self.find_associativity(line_size, cache_size)?;
        if self.config.associativity.set_axis == SetAxis::Stride {
            sets = self.find_set_count(line_size, ways)?;
            ways = infer::ways_for_sets(line_size, cache_size, sets)?;
        }

        let geometry = CacheGeometry::new(line_size, sets, ways)?;
        if geometry.cache_size() != cache_size {
            warn!(
                "Measured capacity {} differs from {} sets x {} ways x {} B = {}",
                cache_size,
                sets,
                ways,
                line_size,
                geometry.cache_size()
            );
        }
        info!("Cache line size: {}", format_size_fixed_int(line_size as u64));
        info!("Cache size:      {}", format_size_fixed_int(geometry.cache_size() as u64));
        info!("Number of sets:  {:>4}", geometry.set_count);
        info!("Associativity:   {:>4}", geometry.associativity);
        Ok(Measurement {
            geometry,
            measured_capacity: cache_size,
        })
    }
}
