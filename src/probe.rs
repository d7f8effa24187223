//! Latency probes: turn a materialized chain into a single timing.
//!
//! [`HardwareProbe`] is the real instrument. It follows the chain with volatile dependent loads
//! and times the walk with [`Instant`]. Simulated backends live in [`crate::model`].

use crate::Error;
use crate::arena::Arena;
use crate::chain::{Chain, ChainBuilder, ChainSpec};
use crate::config::Config;
use log::trace;
use std::hint::black_box;
use std::ptr;
use std::time::{Duration, Instant};

/// A source of latency samples for one access pattern at a time.
pub trait LatencyProbe {
    /// Materializes the access pattern described by `spec`.
    fn prepare(&mut self, spec: &ChainSpec) -> Result<(), Error>;

    /// Takes one sample of the pattern set up by the last [`LatencyProbe::prepare`].
    fn measure(&mut self) -> Result<f64, Error>;

    /// Length in bytes of the arena patterns are laid out in.
    fn arena_len(&self) -> usize;
}

/// How a raw walk cost is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Cost of the whole walk.
    Total,
    /// Cost divided by the number of loads performed.
    PerAccess,
}

impl Normalization {
    pub fn apply(self, cost: f64, steps: u64) -> f64 {
        match self {
            Normalization::Total => cost,
            Normalization::PerAccess if steps == 0 => 0.0,
            Normalization::PerAccess => cost / steps as f64,
        }
    }
}

/// Outcome of one timed walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walk {
    pub elapsed: Duration,
    /// Number of loads performed.
    pub steps: u64,
    /// Last value read, kept so the loads cannot be proven dead.
    pub last: u64,
}

/// Walks `chain`: `accesses` loads around a cycle, or up to the null sentinel of a terminated
/// chain.
pub fn walk(arena: &Arena, chain: &Chain, accesses: u64) -> Walk {
    let Some(head) = chain.head() else {
        return Walk {
            elapsed: Duration::ZERO,
            steps: 0,
            last: 0,
        };
    };
    // SAFETY: head < slot_count and the chain was built into this arena.
    let start = unsafe { arena.as_slot_ptr().add(head) };
    if chain.is_cyclic() {
        walk_cycle(start, accesses)
    } else {
        walk_until_null(start)
    }
}

#[inline(never)]
fn walk_cycle(start: *const u64, accesses: u64) -> Walk {
    let mut cursor = start;
    let begin = Instant::now();
    // >>> begin benchmark
    for _ in 0..accesses {
        // SAFETY: every slot of a cyclic chain holds the address of another slot of the arena.
        cursor = unsafe { ptr::read_volatile(cursor) } as *const u64;
    }
    // <<< end benchmark
    let elapsed = begin.elapsed();
    let last = black_box(cursor) as u64;
    trace!("benchmark acc={:#x}", last);
    Walk {
        elapsed,
        steps: accesses,
        last,
    }
}

#[inline(never)]
fn walk_until_null(start: *const u64) -> Walk {
    let mut cursor = start;
    let mut steps = 0u64;
    let begin = Instant::now();
    // >>> begin benchmark
    while !cursor.is_null() {
        // SAFETY: a terminated chain links arena slots and ends in a null value.
        cursor = unsafe { ptr::read_volatile(cursor) } as *const u64;
        steps += 1;
    }
    // <<< end benchmark
    let elapsed = begin.elapsed();
    let last = black_box(cursor) as u64;
    trace!("benchmark acc={:#x} steps={}", last, steps);
    Walk {
        elapsed,
        steps,
        last,
    }
}

/// Times pointer chases through real memory.
#[derive(Debug)]
pub struct HardwareProbe<'a> {
    arena: &'a mut Arena,
    /// Dummy arena overwritten before every sample to start from cold caches.
    flush: Option<&'a mut Arena>,
    builder: ChainBuilder,
    spec: Option<ChainSpec>,
    /// The current chain has not been walked yet.
    fresh: bool,
    accesses: u64,
    normalization: Normalization,
}

impl<'a> HardwareProbe<'a> {
    pub fn new(arena: &'a mut Arena, flush: Option<&'a mut Arena>, config: &Config) -> Self {
        HardwareProbe {
            arena,
            flush,
            builder: ChainBuilder::new(config.seed, config.random_chain_accesses),
            spec: None,
            fresh: false,
            accesses: config.accesses,
            normalization: config.normalization,
        }
    }
}

impl LatencyProbe for HardwareProbe<'_> {
    fn prepare(&mut self, spec: &ChainSpec) -> Result<(), Error> {
        self.builder.build(self.arena, spec)?;
        self.spec = Some(*spec);
        self.fresh = true;
        Ok(())
    }

    fn measure(&mut self) -> Result<f64, Error> {
        let spec = self
            .spec
            .ok_or_else(|| Error::InvalidConfig("measure called before prepare".to_string()))?;
        if spec.policy.is_randomized() && !self.fresh {
            self.builder.build(self.arena, &spec)?;
        }
        self.fresh = false;
        if let Some(dummy) = self.flush.as_deref_mut() {
            dummy.flush();
        }
        let chain = self
            .builder
            .current()
            .ok_or_else(|| Error::InvalidConfig("no chain materialized".to_string()))?;
        let walked = walk(self.arena, chain, self.accesses);
        Ok(self
            .normalization
            .apply(walked.elapsed.as_nanos() as f64, walked.steps))
    }

    fn arena_len(&self) -> usize {
        self.arena.len()
    }
}
