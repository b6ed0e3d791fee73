//! Entity identifiers, generational slots and their allocation.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and an *index* in the low 32 bits. The generation is bumped
//! every time an index is recycled, which allows immediate stale-ID detection.
//!
//! Range and hierarchy slots use the same scheme through the smaller [`Slot`]
//! handle; both are handed out by a [`HandleAllocator`].

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A generational handle built from an index and a generation.
pub trait Handle: Copy + Eq + fmt::Debug {
    /// Construct a handle from its parts.
    fn from_parts(index: u32, generation: u32) -> Self;
    /// The index portion.
    fn index(self) -> u32;
    /// The generation portion.
    fn generation(self) -> u32;
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity identifier.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The distinguished "no entity" value.
    pub const NULL: EntityId = EntityId(u64::MAX);

    /// Construct an `EntityId` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Whether this is [`EntityId::NULL`].
    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl Handle for EntityId {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self::new(index, generation)
    }

    fn index(self) -> u32 {
        EntityId::index(self)
    }

    fn generation(self) -> u32 {
        EntityId::generation(self)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "EntityId(null)");
        }
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("null");
        }
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Generational handle for a range or hierarchy slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Slot {
    index: u32,
    generation: u32,
}

impl Handle for Slot {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({}v{})", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// HandleAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles handles with generational tracking.
///
/// Free indices are kept in a FIFO queue so that generations are spread out
/// over time rather than concentrated on a hot index.
#[derive(Debug)]
pub struct HandleAllocator<H> {
    /// Current generation for each index slot.
    generations: Vec<u32>,
    /// Whether the slot is currently alive.
    alive: Vec<bool>,
    /// Free-list of recyclable indices (FIFO queue).
    free_indices: VecDeque<u32>,
    /// Number of live handles.
    live: usize,
    /// Upper bound on the number of index slots.
    max_slots: u32,
    /// Capacity chunk used when the slot tables fill up.
    grow: usize,
    _marker: std::marker::PhantomData<H>,
}

impl<H: Handle> HandleAllocator<H> {
    /// Create an allocator that hands out at most `max_slots` indices,
    /// growing its tables `grow` slots at a time.
    pub fn new(max_slots: u32, grow: u32) -> Self {
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free_indices: VecDeque::new(),
            live: 0,
            max_slots,
            grow: grow.max(1) as usize,
            _marker: std::marker::PhantomData,
        }
    }

    /// Allocate a fresh handle.
    ///
    /// If a recycled index is available it will be reused with an incremented
    /// generation; otherwise a brand-new index is created. Returns `None` once
    /// every index up to the configured maximum is in use.
    pub fn allocate(&mut self) -> Option<H> {
        let handle = if let Some(index) = self.free_indices.pop_front() {
            // Reuse recycled index -- generation was already bumped on free.
            self.alive[index as usize] = true;
            H::from_parts(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            if index >= self.max_slots {
                return None;
            }
            if self.generations.len() == self.generations.capacity() {
                self.generations.reserve_exact(self.grow);
                self.alive.reserve_exact(self.grow);
            }
            self.generations.push(0);
            self.alive.push(true);
            H::from_parts(index, 0)
        };
        self.live += 1;
        Some(handle)
    }

    /// Free a handle, incrementing the generation for that index so that any
    /// outstanding copies become stale.
    ///
    /// Returns `true` if the handle was alive and is now freed,
    /// `false` if it was already dead or had a stale generation.
    pub fn free(&mut self, handle: H) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        let idx = handle.index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_indices.push_back(handle.index());
        self.live -= 1;
        true
    }

    /// Returns `true` if `handle` is currently alive and its generation
    /// matches the allocator's current generation for that index.
    pub fn is_live(&self, handle: H) -> bool {
        let idx = handle.index() as usize;
        if idx >= self.generations.len() {
            return false;
        }
        self.alive[idx] && self.generations[idx] == handle.generation()
    }

    /// Total number of currently live handles.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of index slots ever created (live or free).
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }

    /// Iterate over every live handle in index order.
    pub fn iter_live(&self) -> impl Iterator<Item = H> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, &alive)| alive)
            .map(|(i, _)| H::from_parts(i as u32, self.generations[i]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
