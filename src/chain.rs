//! # Chain
//!
//! Pointer chains laid out inside an [`Arena`]. A chain is a sequence of 8-byte slots where each
//! slot holds the absolute address of the next one, so a walk is a series of dependent loads
//! that neither the compiler nor the prefetcher can run ahead of.
//!
//! Two layouts are supported:
//!
//! - [`ChainPolicy::SequentialCyclic`] visits every `stride`-th slot of the working set in order
//!   and wraps from the last slot back to the first, so it can be followed for any number of
//!   steps.
//! - [`ChainPolicy::RandomizedPaired`] links random pairs of slots `stride` bytes apart. The first
//!   slot of a pair lands on a fresh line (a miss), its partner is a hit only while `stride` is
//!   smaller than the cache line. The chain ends in [`NULL_SENTINEL`].
//! - [`ChainPolicy::RandomStrided`] visits distinct `stride`-aligned slots of the working set in
//!   random order, without pairing, and also ends in [`NULL_SENTINEL`].

use crate::Error;
use crate::arena::{Arena, SLOT_SIZE};
use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Value stored in the tail slot of a terminated chain, and in every unvisited slot.
pub const NULL_SENTINEL: u64 = 0;

/// Upper bound on random base draws per requested pair before the builder gives up.
const DRAWS_PER_PAIR: usize = 8;

/// How a [`ChainSpec`] is turned into slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPolicy {
    SequentialCyclic,
    RandomizedPaired,
    RandomStrided,
}

impl ChainPolicy {
    /// Randomized chains are redrawn before every sample.
    pub fn is_randomized(self) -> bool {
        !matches!(self, ChainPolicy::SequentialCyclic)
    }
}

/// Parameters of one access pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSpec {
    /// Distance in bytes between linked slots.
    pub stride: usize,
    /// Number of bytes, from the start of the arena, the chain is embedded in.
    pub working_set: usize,
    pub policy: ChainPolicy,
}

impl ChainSpec {
    pub fn new(stride: usize, working_set: usize, policy: ChainPolicy) -> Self {
        ChainSpec {
            stride,
            working_set,
            policy,
        }
    }

    /// Checks the pattern can be materialized inside an arena of `arena_len` bytes.
    pub fn validate(&self, arena_len: usize) -> Result<(), Error> {
        if self.stride == 0 || self.stride % SLOT_SIZE != 0 {
            return Err(Error::InvalidConfig(format!(
                "stride {} is not a non-zero multiple of {}",
                self.stride, SLOT_SIZE
            )));
        }
        if self.working_set % SLOT_SIZE != 0 {
            return Err(Error::InvalidConfig(format!(
                "working set {} is not a multiple of {}",
                self.working_set, SLOT_SIZE
            )));
        }
        if self.working_set > arena_len {
            return Err(Error::InvalidConfig(format!(
                "working set {} exceeds arena length {}",
                self.working_set, arena_len
            )));
        }
        let min_working_set = match self.policy {
            ChainPolicy::SequentialCyclic | ChainPolicy::RandomStrided => self.stride,
            ChainPolicy::RandomizedPaired => 2 * self.stride,
        };
        if self.working_set < min_working_set {
            return Err(Error::InvalidConfig(format!(
                "working set {} cannot hold a {:?} chain with stride {}",
                self.working_set, self.policy, self.stride
            )));
        }
        Ok(())
    }
}

/// A chain currently materialized in an arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chain {
    /// Slots `0, stride, 2 * stride, ...` (in slot units), `len` of them, forming a cycle.
    Cyclic { stride_slots: usize, len: usize },
    /// Slots in link order; the last one holds [`NULL_SENTINEL`].
    Terminated { slots: Vec<usize> },
}

impl Chain {
    /// Slot index a walk starts from.
    pub fn head(&self) -> Option<usize> {
        match self {
            Chain::Cyclic { .. } => Some(0),
            Chain::Terminated { slots } => slots.first().copied(),
        }
    }

    /// Number of distinct slots on the chain.
    pub fn len(&self) -> usize {
        match self {
            Chain::Cyclic { len, .. } => *len,
            Chain::Terminated { slots } => slots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, Chain::Cyclic { .. })
    }

    /// Resets every slot the chain wrote back to [`NULL_SENTINEL`].
    fn clear(&self, arena: &mut Arena) {
        match self {
            Chain::Cyclic { stride_slots, len } => {
                for step in 0..*len {
                    arena.write_slot(step * stride_slots, NULL_SENTINEL);
                }
            }
            Chain::Terminated { slots } => {
                for &slot in slots {
                    arena.write_slot(slot, NULL_SENTINEL);
                }
            }
        }
    }
}

/// Builds chains into an arena, clearing the previous chain first.
#[derive(Debug)]
pub struct ChainBuilder {
    rng: SmallRng,
    /// Access budget of a randomized chain; half of it is the pair budget.
    random_accesses: usize,
    current: Option<Chain>,
}

impl ChainBuilder {
    pub fn new(seed: u64, random_accesses: usize) -> Self {
        ChainBuilder {
            rng: SmallRng::seed_from_u64(seed),
            random_accesses,
            current: None,
        }
    }

    /// Chain built by the last call to [`ChainBuilder::build`].
    pub fn current(&self) -> Option<&Chain> {
        self.current.as_ref()
    }

    /// Materializes `spec` in `arena`, replacing the previous chain.
    pub fn build(&mut self, arena: &mut Arena, spec: &ChainSpec) -> Result<&Chain, Error> {
        spec.validate(arena.len())?;
        if let Some(previous) = self.current.take() {
            previous.clear(arena);
        }

        let chain = match spec.policy {
            ChainPolicy::SequentialCyclic => build_cyclic(arena, spec),
            ChainPolicy::RandomizedPaired => self.build_paired(arena, spec),
            ChainPolicy::RandomStrided => self.build_strided(arena, spec),
        };
        if chain.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no {:?} chain fits stride {} in working set {}",
                spec.policy, spec.stride, spec.working_set
            )));
        }
        trace!(
            "Built {:?} chain of {} slots (stride {}, working set {})",
            spec.policy,
            chain.len(),
            spec.stride,
            spec.working_set
        );
        Ok(&*self.current.insert(chain))
    }

    fn build_paired(&mut self, arena: &mut Arena, spec: &ChainSpec) -> Chain {
        let stride_slots = spec.stride / SLOT_SIZE;
        let working_slots = spec.working_set / SLOT_SIZE;
        let pair_span = 2 * stride_slots;
        // only bases whose partner is inside the working set
        let candidates = working_slots / pair_span;
        let requested = (self.random_accesses / 2).min(candidates).max(1);
        let max_draws = requested.saturating_mul(DRAWS_PER_PAIR);

        let mut slots = Vec::with_capacity(requested * 2);
        let mut tail: Option<usize> = None;
        let mut draws = 0;
        while slots.len() < requested * 2 && draws < max_draws {
            draws += 1;
            let first = self.rng.random_range(0..candidates) * pair_span;
            let second = first + stride_slots;
            if arena.read_slot(first) != NULL_SENTINEL || arena.read_slot(second) != NULL_SENTINEL {
                continue;
            }
            if let Some(tail) = tail {
                arena.write_slot(tail, arena.slot_addr(first));
            }
            arena.write_slot(first, arena.slot_addr(second));
            tail = Some(second);
            slots.push(first);
            slots.push(second);
        }
        if let Some(tail) = tail {
            arena.write_slot(tail, NULL_SENTINEL);
        }
        if slots.len() < requested * 2 {
            debug!(
                "Randomized chain stopped at {} of {} pairs after {} draws",
                slots.len() / 2,
                requested,
                draws
            );
        }
        Chain::Terminated { slots }
    }

    fn build_strided(&mut self, arena: &mut Arena, spec: &ChainSpec) -> Chain {
        let stride_slots = spec.stride / SLOT_SIZE;
        let candidates = (spec.working_set / SLOT_SIZE) / stride_slots;
        let amount = self.random_accesses.clamp(1, candidates);
        let slots: Vec<usize> = index::sample(&mut self.rng, candidates, amount)
            .into_iter()
            .map(|i| i * stride_slots)
            .collect();
        for link in slots.windows(2) {
            arena.write_slot(link[0], arena.slot_addr(link[1]));
        }
        if let Some(&tail) = slots.last() {
            arena.write_slot(tail, NULL_SENTINEL);
        }
        Chain::Terminated { slots }
    }
}

fn build_cyclic(arena: &mut Arena, spec: &ChainSpec) -> Chain {
    let stride_slots = spec.stride / SLOT_SIZE;
    let len = (spec.working_set / SLOT_SIZE) / stride_slots;
    for step in 0..len {
        let next = ((step + 1) % len) * stride_slots;
        arena.write_slot(step * stride_slots, arena.slot_addr(next));
    }
    Chain::Cyclic { stride_slots, len }
}
