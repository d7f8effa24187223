//! # Model
//!
//! A software memory hierarchy that charges a fixed penalty per access, used to run the whole
//! instrument deterministically. Caches keep lines per set in FIFO order: a hit does not refresh
//! a line, a miss inserts it and evicts the oldest line of the set once all ways are taken. A
//! cache with a single set is fully associative.
//!
//! [`ModelProbe`] walks real chains in a small arena and charges every visited offset to a
//! freshly built model instead of timing the walk.

use crate::Error;
use crate::arena::Arena;
use crate::chain::{Chain, ChainBuilder, ChainSpec, NULL_SENTINEL};
use crate::probe::{LatencyProbe, Normalization};
use std::collections::{HashSet, VecDeque};

/// One level of a simulated memory hierarchy.
pub trait MemoryModel {
    /// Charges one access to byte offset `addr`.
    fn access(&mut self, addr: u64);

    /// Penalty accumulated by this level and every level below it.
    fn total_penalty(&self) -> u64;
}

impl<M: MemoryModel + ?Sized> MemoryModel for Box<M> {
    fn access(&mut self, addr: u64) {
        (**self).access(addr)
    }

    fn total_penalty(&self) -> u64 {
        (**self).total_penalty()
    }
}

/// Main memory: every access costs the same.
#[derive(Debug, Clone)]
pub struct RamModel {
    access_penalty: u64,
    total_penalty: u64,
}

impl RamModel {
    pub fn new(access_penalty: u64) -> Self {
        RamModel {
            access_penalty,
            total_penalty: 0,
        }
    }
}

impl MemoryModel for RamModel {
    fn access(&mut self, _addr: u64) {
        self.total_penalty += self.access_penalty;
    }

    fn total_penalty(&self) -> u64 {
        self.total_penalty
    }
}

/// A set-associative cache with FIFO replacement in front of `next`.
#[derive(Debug, Clone)]
pub struct CacheModel<N> {
    line_size: u64,
    ways: usize,
    hit_penalty: u64,
    sets: Vec<VecDeque<u64>>,
    resident: HashSet<u64>,
    total_penalty: u64,
    next: N,
}

impl<N: MemoryModel> CacheModel<N> {
    pub fn new(line_size: u64, set_count: usize, ways: usize, hit_penalty: u64, next: N) -> Self {
        assert!(line_size > 0 && set_count > 0 && ways > 0, "empty cache model");
        CacheModel {
            line_size,
            ways,
            hit_penalty,
            sets: vec![VecDeque::with_capacity(ways); set_count],
            resident: HashSet::new(),
            total_penalty: 0,
            next,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.line_size * (self.sets.len() * self.ways) as u64
    }
}

impl<N: MemoryModel> MemoryModel for CacheModel<N> {
    fn access(&mut self, addr: u64) {
        let line = addr / self.line_size;
        if self.resident.contains(&line) {
            self.total_penalty += self.hit_penalty;
            return;
        }
        self.next.access(addr);

        let set_count = self.sets.len() as u64;
        let set = &mut self.sets[(line % set_count) as usize];
        if set.len() == self.ways {
            if let Some(evicted) = set.pop_front() {
                self.resident.remove(&evicted);
            }
        }
        set.push_back(line);
        self.resident.insert(line);
    }

    fn total_penalty(&self) -> u64 {
        self.total_penalty + self.next.total_penalty()
    }
}

/// A [`LatencyProbe`] whose samples are model penalties instead of wall-clock time.
pub struct ModelProbe<F> {
    arena: Arena,
    builder: ChainBuilder,
    make_model: F,
    spec: Option<ChainSpec>,
    fresh: bool,
    accesses: u64,
    normalization: Normalization,
}

impl<F, M> ModelProbe<F>
where
    F: FnMut() -> M,
    M: MemoryModel,
{
    /// `make_model` builds a cold hierarchy for every sample.
    pub fn new(
        arena: Arena,
        seed: u64,
        random_accesses: usize,
        accesses: u64,
        normalization: Normalization,
        make_model: F,
    ) -> Self {
        ModelProbe {
            arena,
            builder: ChainBuilder::new(seed, random_accesses),
            make_model,
            spec: None,
            fresh: false,
            accesses,
            normalization,
        }
    }

    /// Charges a walk of `chain` to `model`, returning the number of loads.
    fn replay(arena: &Arena, chain: &Chain, accesses: u64, model: &mut M) -> Result<u64, Error> {
        let Some(mut slot) = chain.head() else {
            return Ok(0);
        };
        let base = arena.base_addr();
        let mut steps = 0;
        loop {
            if chain.is_cyclic() && steps == accesses {
                break;
            }
            model.access(arena.slot_addr(slot) - base);
            steps += 1;
            let next = arena.get_slot(slot).ok_or(Error::BrokenChain { slot })?;
            if next == NULL_SENTINEL {
                break;
            }
            slot = arena.slot_of(next).ok_or(Error::BrokenChain { slot })?;
        }
        Ok(steps)
    }
}

impl<F, M> LatencyProbe for ModelProbe<F>
where
    F: FnMut() -> M,
    M: MemoryModel,
{
    fn prepare(&mut self, spec: &ChainSpec) -> Result<(), Error> {
        self.builder.build(&mut self.arena, spec)?;
        self.spec = Some(*spec);
        self.fresh = true;
        Ok(())
    }

    fn measure(&mut self) -> Result<f64, Error> {
        let spec = self
            .spec
            .ok_or_else(|| Error::InvalidConfig("measure called before prepare".to_string()))?;
        if spec.policy.is_randomized() && !self.fresh {
            self.builder.build(&mut self.arena, &spec)?;
        }
        self.fresh = false;
        let chain = self
            .builder
            .current()
            .ok_or_else(|| Error::InvalidConfig("no chain materialized".to_string()))?;
        let mut model = (self.make_model)();
        let steps = Self::replay(&self.arena, chain, self.accesses, &mut model)?;
        Ok(self
            .normalization
            .apply(model.total_penalty() as f64, steps))
    }

    fn arena_len(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainPolicy;

    fn l1() -> CacheModel<RamModel> {
        // 8 sets x 4 ways x 64 B = 2 KiB
        CacheModel::new(64, 8, 4, 1, RamModel::new(1000))
    }

    #[test]
    fn ram_charges_every_access() {
        let mut ram = RamModel::new(7);
        for addr in [0, 8, 0] {
            ram.access(addr);
        }
        assert_eq!(ram.total_penalty(), 21);
    }

    #[test]
    fn same_line_hits_after_first_miss() {
        let mut cache = l1();
        cache.access(0);
        cache.access(8);
        cache.access(63);
        assert_eq!(cache.total_penalty(), 1000 + 1 + 1);
        cache.access(64);
        assert_eq!(cache.total_penalty(), 2000 + 2);
        assert_eq!(cache.capacity(), 2048);
    }

    #[test]
    fn set_conflicts_evict_in_fifo_order() {
        let mut cache = l1();
        // lines 0, 8, 16, 24, 32 all map to set 0
        for line in [0u64, 8, 16, 24] {
            cache.access(line * 64);
        }
        // hitting line 0 does not refresh it
        cache.access(0);
        cache.access(32 * 64);
        let before = cache.total_penalty();
        cache.access(0);
        assert_eq!(cache.total_penalty() - before, 1000);
        // line 8 was second oldest and is gone too after line 0 came back
        let before = cache.total_penalty();
        cache.access(8 * 64);
        assert_eq!(cache.total_penalty() - before, 1000);
    }

    #[test]
    fn fully_associative_cache_thrashes_on_cyclic_overflow() {
        let mut cache = CacheModel::new(64, 1, 4, 1, RamModel::new(100));
        for _ in 0..3 {
            for line in 0..5u64 {
                cache.access(line * 64);
            }
        }
        assert_eq!(cache.total_penalty(), 15 * 100);
    }

    #[test]
    fn model_probe_charges_cyclic_walk() {
        let arena = Arena::new(16 * 1024).unwrap();
        let mut probe = ModelProbe::new(arena, 0, 0, 1000, Normalization::Total, l1);
        // 16 lines at stride 128 touch the 4 even sets with 4 ways each: only cold misses
        probe
            .prepare(&ChainSpec::new(128, 2048, ChainPolicy::SequentialCyclic))
            .unwrap();
        assert_eq!(probe.measure().unwrap(), (16 * 1000 + (1000 - 16)) as f64);

        // 17 lines overflow set 0, whose lines then miss on every lap
        probe
            .prepare(&ChainSpec::new(128, 2176, ChainPolicy::SequentialCyclic))
            .unwrap();
        assert!(probe.measure().unwrap() > 250_000.0);
    }

    #[test]
    fn model_probe_normalizes_terminated_walks() {
        let arena = Arena::new(256 * 1024).unwrap();
        let mut probe = ModelProbe::new(arena, 9, 400, 0, Normalization::PerAccess, l1);
        probe
            .prepare(&ChainSpec::new(32, 256 * 1024, ChainPolicy::RandomizedPaired))
            .unwrap();
        let within_line = probe.measure().unwrap();
        assert!((480.0..=501.0).contains(&within_line), "{}", within_line);

        probe
            .prepare(&ChainSpec::new(64, 256 * 1024, ChainPolicy::RandomizedPaired))
            .unwrap();
        let across_lines = probe.measure().unwrap();
        assert!(across_lines > 950.0, "{}", across_lines);
    }

    #[test]
    fn set_index_wraps_line_number() {
        let mut cache = l1();
        // lines 3 and 11 share set 3, line 4 does not
        for line in [3u64, 11, 4, 3, 11, 4] {
            cache.access(line * 64);
        }
        assert_eq!(cache.total_penalty(), 3 * 1000 + 3);
    }

    #[test]
    fn broken_link_fails_the_sample() {
        let arena = Arena::new(4096).unwrap();
        let mut probe = ModelProbe::new(arena, 0, 0, 100, Normalization::Total, l1);
        probe
            .prepare(&ChainSpec::new(64, 1024, ChainPolicy::SequentialCyclic))
            .unwrap();
        let outside = probe.arena.base_addr() + probe.arena.len() as u64;
        probe.arena.write_slot(8, outside);
        let err = probe.measure().unwrap_err();
        assert!(matches!(err, Error::BrokenChain { slot: 8 }));
    }
}
