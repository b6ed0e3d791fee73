//! Subpool ranges: contiguous, owner-private slices of a pool's dense array.
//!
//! A [`Subpool`] partitions a prefix of some dense array into disjoint,
//! gap-free ranges. Only the exclusive end of each range is stored; a range
//! starts where the previous one (in position order) ends. Range positions
//! can be reordered, so every range is addressed through a generational
//! [`Slot`] that maps to its current position.
//!
//! Elements past the last range's end are *unassigned*: they belong to the
//! pool but to no range. The range operations on [`ComponentPool`] keep the
//! relative order of every range's elements intact; all relocation goes
//! through [`rotate_block`](crate::element::rotate_block).

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{ComponentId, DestroyQueue};
use crate::entity::{EntityId, Handle, HandleAllocator, Slot};
use crate::pool::ComponentPool;
use crate::EcsError;

// ---------------------------------------------------------------------------
// RangeId
// ---------------------------------------------------------------------------

/// Identifies one range of one component pool.
///
/// Plain old data, so a range id can itself be stored in a component and
/// recovered later by a descriptor's `range_id` callback.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct RangeId {
    /// Pool the range partitions.
    pub component: ComponentId,
    /// Generational slot within the pool's range table.
    pub slot: Slot,
}

impl fmt::Debug for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RangeId({}:{}v{})",
            self.component.index(),
            self.slot.index(),
            self.slot.generation()
        )
    }
}

// ---------------------------------------------------------------------------
// Subpool
// ---------------------------------------------------------------------------

/// Range bookkeeping for one dense array.
#[derive(Debug)]
pub struct Subpool {
    slots: HandleAllocator<Slot>,
    /// Current position of each slot's range, indexed by slot index.
    position: Vec<u32>,
    /// Slot occupying each position.
    order: Vec<Slot>,
    /// Exclusive end of the range at each position.
    ends: Vec<u32>,
    grow: usize,
}

impl Subpool {
    /// Create an empty range table growing `grow` entries at a time.
    pub fn new(grow: u32) -> Self {
        Self {
            slots: HandleAllocator::new(u32::MAX, grow),
            position: Vec::new(),
            order: Vec::new(),
            ends: Vec::new(),
            grow: grow.max(1) as usize,
        }
    }

    /// Number of live ranges.
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    /// Whether there are no live ranges.
    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// End of the partitioned prefix; everything at or past it is unassigned.
    pub fn partition_end(&self) -> usize {
        self.ends.last().map_or(0, |&e| e as usize)
    }

    /// Exclusive range ends in position order.
    pub fn ends(&self) -> &[u32] {
        &self.ends
    }

    /// Whether `slot` names a live range.
    pub fn is_live(&self, slot: Slot) -> bool {
        self.slots.is_live(slot)
    }

    /// Current position of a live range.
    pub fn position(&self, slot: Slot) -> Option<usize> {
        self.slots
            .is_live(slot)
            .then(|| self.position[slot.index() as usize] as usize)
    }

    /// Slot of the range at `position`.
    pub fn slot_at(&self, position: usize) -> Slot {
        self.order[position]
    }

    /// Dense bounds of the range at `position`.
    pub fn bounds_at(&self, position: usize) -> Range<usize> {
        let start = if position == 0 {
            0
        } else {
            self.ends[position - 1] as usize
        };
        start..self.ends[position] as usize
    }

    /// Dense bounds of a live range.
    pub fn bounds(&self, slot: Slot) -> Option<Range<usize>> {
        self.position(slot).map(|p| self.bounds_at(p))
    }

    /// The range containing dense `index`, or `None` for unassigned indices.
    pub fn locate(&self, index: usize) -> Option<(Slot, usize)> {
        if index >= self.partition_end() {
            return None;
        }
        let position = self.ends.partition_point(|&end| end as usize <= index);
        Some((self.order[position], position))
    }

    /// Every live range in position order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, Range<usize>)> + '_ {
        (0..self.ends.len()).map(move |p| (self.order[p], self.bounds_at(p)))
    }

    /// Open an empty range at the end of the partitioned prefix.
    pub fn allocate(&mut self) -> Option<Slot> {
        let slot = self.slots.allocate()?;
        let index = slot.index() as usize;
        if index >= self.position.len() {
            self.position.resize(index + 1, 0);
        }
        if self.ends.len() == self.ends.capacity() {
            self.ends.reserve_exact(self.grow);
            self.order.reserve_exact(self.grow);
        }
        self.position[index] = self.ends.len() as u32;
        let end = self.partition_end() as u32;
        self.ends.push(end);
        self.order.push(slot);
        Some(slot)
    }

    /// Drop the bookkeeping of an empty range.
    ///
    /// The caller must have emptied the range first.
    pub fn release(&mut self, slot: Slot) -> bool {
        let Some(position) = self.position(slot) else {
            return false;
        };
        debug_assert!(self.bounds_at(position).is_empty());
        self.ends.remove(position);
        self.order.remove(position);
        self.reposition(position..self.order.len());
        self.slots.free(slot)
    }

    /// Add `delta` to the end of the range at `position` and to every range
    /// after it (they move along by the same amount).
    pub fn shift_ends(&mut self, position: usize, delta: isize) {
        for end in &mut self.ends[position..] {
            *end = (*end as isize + delta) as u32;
        }
    }

    /// Reorder the range at `position` to be last. Its dense elements must
    /// already have been rotated to the end of the partitioned prefix.
    pub fn move_last(&mut self, position: usize) {
        let last = self.ends.len() - 1;
        if position == last {
            return;
        }
        let count = self.bounds_at(position).len() as u32;
        for p in position..last {
            self.ends[p] = self.ends[p + 1] - count;
        }
        self.order[position..].rotate_left(1);
        self.reposition(position..self.order.len());
    }

    fn reposition(&mut self, positions: Range<usize>) {
        for p in positions {
            self.position[self.order[p].index() as usize] = p as u32;
        }
    }
}

// ---------------------------------------------------------------------------
// Range operations on a pool
// ---------------------------------------------------------------------------

impl ComponentPool {
    /// Range bookkeeping of this pool.
    pub fn subpool(&self) -> &Subpool {
        &self.ranges
    }

    fn range_id(&self, slot: Slot) -> RangeId {
        RangeId {
            component: self.id(),
            slot,
        }
    }

    fn range_position(&self, slot: Slot) -> Result<usize, EcsError> {
        self.ranges.position(slot).ok_or(EcsError::StaleRange {
            range: self.range_id(slot),
        })
    }

    /// Number of elements past the last range.
    pub fn unassigned(&self) -> usize {
        self.len() - self.ranges.partition_end()
    }

    /// Open a new, empty range at the end of the partitioned prefix.
    pub fn new_range(&mut self) -> Result<RangeId, EcsError> {
        let slot = self.ranges.allocate().ok_or(EcsError::IdsExhausted {
            what: "range",
        })?;
        let range = self.range_id(slot);
        debug!(?range, component = %self.descriptor().name, "range created");
        Ok(range)
    }

    /// Dense bounds of a range.
    pub fn range(&self, slot: Slot) -> Result<Range<usize>, EcsError> {
        let position = self.range_position(slot)?;
        Ok(self.ranges.bounds_at(position))
    }

    /// The range holding the element at dense `index`, if any.
    pub fn range_of_index(&self, index: usize) -> Option<RangeId> {
        self.ranges.locate(index).map(|(slot, _)| self.range_id(slot))
    }

    /// Every live range with its dense bounds, in position order.
    pub fn ranges(&self) -> impl Iterator<Item = (RangeId, Range<usize>)> + '_ {
        self.ranges
            .iter()
            .map(move |(slot, bounds)| (self.range_id(slot), bounds))
    }

    /// Entity/element pairs of a range, in range order.
    pub fn iter_range(
        &self,
        slot: Slot,
    ) -> Result<impl Iterator<Item = (EntityId, &[u8])> + '_, EcsError> {
        let bounds = self.range(slot)?;
        Ok(bounds.map(move |i| (self.entities()[i], self.element(i))))
    }

    /// Pull `count` elements starting at dense `src` (all past the range) to
    /// the end of the range at `position`.
    fn absorb(&mut self, position: usize, src: usize, count: usize) {
        let dst = self.ranges.bounds_at(position).end;
        self.rotate(dst, src, count);
        self.ranges.shift_ends(position, count as isize);
    }

    /// Extend a range by the first `count` unassigned elements.
    ///
    /// Later ranges are shifted right as whole blocks, so the relative order
    /// of every range's elements is unchanged.
    pub fn grow_range(&mut self, slot: Slot, count: usize) -> Result<Range<usize>, EcsError> {
        let position = self.range_position(slot)?;
        let available = self.unassigned();
        if count > available {
            return Err(EcsError::RangeOverflow {
                range: self.range_id(slot),
                requested: count,
                available,
            });
        }
        let src = self.ranges.partition_end();
        self.absorb(position, src, count);
        Ok(self.ranges.bounds_at(position))
    }

    /// Attach `entity` and place its element at the end of a range.
    pub fn attach_to_range(
        &mut self,
        slot: Slot,
        entity: EntityId,
        payload: Option<&[u8]>,
    ) -> Result<usize, EcsError> {
        let position = self.range_position(slot)?;
        let tail = self.push_checked(entity, payload)?;
        self.absorb(position, tail, 1);
        Ok(self.ranges.bounds_at(position).end - 1)
    }

    /// Destroy the last `count` elements of a range.
    ///
    /// The leaving elements are rotated to the end of the pool and truncated,
    /// so later ranges slide left without being reordered.
    pub fn shrink_range(
        &mut self,
        slot: Slot,
        count: usize,
        queue: &mut DestroyQueue,
    ) -> Result<Range<usize>, EcsError> {
        let position = self.range_position(slot)?;
        let bounds = self.ranges.bounds_at(position);
        if count > bounds.len() {
            return Err(EcsError::RangeUnderflow {
                range: self.range_id(slot),
                requested: count,
                length: bounds.len(),
            });
        }
        if count == 0 {
            return Ok(bounds);
        }
        let tail = self.len() - count;
        self.rotate(tail, bounds.end - count, count);
        self.ranges.shift_ends(position, -(count as isize));
        self.truncate(tail, queue);
        Ok(self.ranges.bounds_at(position))
    }

    /// Destroy every element of a range and retire its id.
    pub fn free_range(&mut self, slot: Slot, queue: &mut DestroyQueue) -> Result<(), EcsError> {
        let length = self.range(slot)?.len();
        self.shrink_range(slot, length, queue)?;
        self.ranges.release(slot);
        debug!(range = ?self.range_id(slot), "range freed");
        Ok(())
    }

    /// Reorder a range to be the last one in the partitioned prefix.
    pub fn move_range_last(&mut self, slot: Slot) -> Result<Range<usize>, EcsError> {
        let position = self.range_position(slot)?;
        let bounds = self.ranges.bounds_at(position);
        let end = self.ranges.partition_end();
        self.rotate(end - bounds.len(), bounds.start, bounds.len());
        self.ranges.move_last(position);
        Ok(self.ranges.bounds(slot).unwrap_or(bounds))
    }

    /// Stable sort of one range's elements; nothing outside it moves.
    pub fn sort_range<F>(&mut self, slot: Slot, compare: F) -> Result<(), EcsError>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        let bounds = self.range(slot)?;
        self.sort_span(bounds, compare);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
