//! Component pools: packed element storage for one component type.
//!
//! A pool keeps three parallel structures:
//!
//! - `data`: the elements, packed into `[0, len)` with no holes.
//! - `dense`: the owning entity of each element.
//! - `sparse`: entity index -> dense index, a flat table grown in chunks.
//!
//! For every `i < len`, `sparse[dense[i].index()] == i`. Elements of
//! unranged entities are removed by swapping the last element into the hole;
//! elements inside a [range](crate::subpool) are rotated out instead so the
//! range keeps its order.

use std::cmp::Ordering;

use tracing::trace;

use crate::component::{ComponentDescriptor, ComponentId, DestroyQueue};
use crate::config::{round_up, RegistryConfig};
use crate::element::{reserve_or_abort, rotate_block, ComponentArray};
use crate::entity::EntityId;
use crate::subpool::Subpool;
use crate::EcsError;

/// Sparse-table marker for "no element".
const ABSENT: u32 = u32::MAX;

/// Packed storage of one component type.
#[derive(Debug)]
pub struct ComponentPool {
    id: ComponentId,
    desc: ComponentDescriptor,
    data: ComponentArray,
    dense: Vec<EntityId>,
    sparse: Vec<u32>,
    pub(crate) ranges: Subpool,
    entity_grow: u32,
    component_grow: usize,
    range_grow: u32,
}

impl ComponentPool {
    /// Create an empty pool for `desc`.
    pub fn new(id: ComponentId, desc: ComponentDescriptor, config: &RegistryConfig) -> Self {
        Self {
            id,
            data: ComponentArray::for_descriptor(&desc),
            desc,
            dense: Vec::new(),
            sparse: Vec::new(),
            ranges: Subpool::new(config.range_grow),
            entity_grow: config.entity_grow,
            component_grow: config.component_grow.max(1) as usize,
            range_grow: config.range_grow,
        }
    }

    /// Id of the component stored here.
    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Descriptor of the component stored here.
    #[inline]
    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.desc
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Whether the pool holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Owning entity of each element, in dense order.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.dense
    }

    /// The packed element storage.
    #[inline]
    pub fn data(&self) -> &ComponentArray {
        &self.data
    }

    /// Bytes of the element at dense `index`.
    #[inline]
    pub fn element(&self, index: usize) -> &[u8] {
        self.data.element(index)
    }

    /// Bytes of the element at dense `index`, mutably.
    #[inline]
    pub fn element_mut(&mut self, index: usize) -> &mut [u8] {
        self.data.element_mut(index)
    }

    /// Dense index of `entity`'s element.
    pub fn index_of(&self, entity: EntityId) -> Option<usize> {
        let index = *self.sparse.get(entity.index() as usize)?;
        if index == ABSENT || self.dense[index as usize] != entity {
            return None;
        }
        Some(index as usize)
    }

    /// Whether `entity` has an element here.
    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.index_of(entity).is_some()
    }

    /// Bytes of `entity`'s element.
    pub fn get(&self, entity: EntityId) -> Option<&[u8]> {
        self.index_of(entity).map(|i| self.data.element(i))
    }

    /// Bytes of `entity`'s element, mutably.
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut [u8]> {
        self.index_of(entity).map(|i| self.data.element_mut(i))
    }

    /// Entity/element pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &[u8])> + '_ {
        self.dense
            .iter()
            .enumerate()
            .map(move |(i, &entity)| (entity, self.data.element(i)))
    }

    // -- attach / detach ----------------------------------------------------

    /// Attach a constructed (or zeroed) element for `entity` at the tail.
    pub fn attach(&mut self, entity: EntityId) -> Result<&mut [u8], EcsError> {
        let index = self.push_checked(entity, None)?;
        Ok(self.data.element_mut(index))
    }

    /// Attach an element for `entity` at the tail, copying `payload` into it.
    pub fn attach_with(&mut self, entity: EntityId, payload: &[u8]) -> Result<&mut [u8], EcsError> {
        let index = self.push_checked(entity, Some(payload))?;
        Ok(self.data.element_mut(index))
    }

    /// Remove `entity`'s element, running the destructor.
    pub fn detach(&mut self, entity: EntityId, queue: &mut DestroyQueue) -> Result<(), EcsError> {
        if !self.remove(entity, queue) {
            return Err(EcsError::MissingComponent {
                entity,
                component: self.desc.name.clone(),
            });
        }
        Ok(())
    }

    /// Detach `entity`'s element if it has one.
    pub(crate) fn remove(&mut self, entity: EntityId, queue: &mut DestroyQueue) -> bool {
        let Some(index) = self.index_of(entity) else {
            return false;
        };
        self.remove_at(index, queue);
        trace!(?entity, component = %self.desc.name, "detached");
        true
    }

    /// Stable sort of the whole pool. Not available once the pool has ranges;
    /// use [`sort_range`](Self::sort_range) there.
    pub fn sort_by<F>(&mut self, compare: F) -> Result<(), EcsError>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        if !self.ranges.is_empty() {
            return Err(EcsError::PoolHasRanges {
                component: self.desc.name.clone(),
            });
        }
        self.sort_span(0..self.len(), compare);
        Ok(())
    }

    /// Check the packing and partition invariants, describing the first
    /// violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.data.len() != self.dense.len() {
            return Err(format!(
                "data holds {} elements, dense holds {}",
                self.data.len(),
                self.dense.len()
            ));
        }
        for (i, entity) in self.dense.iter().enumerate() {
            match self.sparse.get(entity.index() as usize) {
                Some(&s) if s as usize == i => {}
                other => return Err(format!("sparse[{entity}] is {other:?}, expected {i}")),
            }
        }
        let mapped = self.sparse.iter().filter(|&&s| s != ABSENT).count();
        if mapped != self.dense.len() {
            return Err(format!("{mapped} sparse entries for {} elements", self.dense.len()));
        }
        let ends = self.ranges.ends();
        if ends.windows(2).any(|w| w[0] > w[1]) {
            return Err(format!("range ends out of order: {ends:?}"));
        }
        if self.ranges.partition_end() > self.len() {
            return Err(format!(
                "ranges cover {} of {} elements",
                self.ranges.partition_end(),
                self.len()
            ));
        }
        Ok(())
    }

    // -- internals shared with the range operations -------------------------

    pub(crate) fn push_checked(
        &mut self,
        entity: EntityId,
        payload: Option<&[u8]>,
    ) -> Result<usize, EcsError> {
        if self.contains(entity) {
            return Err(EcsError::AlreadyAttached {
                entity,
                component: self.desc.name.clone(),
            });
        }
        if let Some(bytes) = payload {
            if bytes.len() != self.desc.size {
                return Err(EcsError::PayloadSize {
                    component: self.desc.name.clone(),
                    expected: self.desc.size,
                    actual: bytes.len(),
                });
            }
        }
        let index = self.push(entity, payload);
        trace!(?entity, component = %self.desc.name, index, "attached");
        Ok(index)
    }

    fn push(&mut self, entity: EntityId, payload: Option<&[u8]>) -> usize {
        let index = self.dense.len();
        if index == self.dense.capacity() {
            reserve_or_abort(&mut self.dense, self.component_grow, "pool entities");
            self.data.reserve(self.component_grow);
        }
        self.data.resize(index + 1);
        self.dense.push(entity);
        self.map_sparse(entity, index);
        match payload {
            Some(bytes) => self.data.copy_elements(index, bytes, 0, 1),
            None => {
                self.data.create_elements(&self.desc, index, 1);
            }
        }
        index
    }

    fn map_sparse(&mut self, entity: EntityId, index: usize) {
        let slot = entity.index() as usize;
        if slot >= self.sparse.len() {
            let len = round_up(slot + 1, self.entity_grow);
            let additional = len - self.sparse.len();
            reserve_or_abort(&mut self.sparse, additional, "pool sparse map");
            self.sparse.resize(len, ABSENT);
        }
        self.sparse[slot] = index as u32;
    }

    fn reindex(&mut self, span: std::ops::Range<usize>) {
        for i in span {
            self.sparse[self.dense[i].index() as usize] = i as u32;
        }
    }

    /// Rotate elements and owners together, then repair the sparse map over
    /// the affected span.
    pub(crate) fn rotate(&mut self, dst: usize, src: usize, count: usize) {
        if dst == src || count == 0 {
            return;
        }
        self.data.rotate_elements(dst, src, count);
        rotate_block(&mut self.dense, dst, src, count);
        self.reindex(dst.min(src)..dst.max(src) + count);
    }

    /// Destroy every element from `new_len` on and shrink to `new_len`.
    pub(crate) fn truncate(&mut self, new_len: usize, queue: &mut DestroyQueue) {
        let count = self.len() - new_len;
        self.data.destroy_elements(&self.desc, new_len, count, queue);
        for entity in self.dense.drain(new_len..) {
            self.sparse[entity.index() as usize] = ABSENT;
        }
        self.data.resize(new_len);
    }

    fn remove_at(&mut self, index: usize, queue: &mut DestroyQueue) {
        let last = self.len() - 1;
        if let Some((_, position)) = self.ranges.locate(index) {
            self.rotate(last, index, 1);
            self.ranges.shift_ends(position, -1);
        } else if index != last {
            self.data.swap_elements(index, last);
            self.dense.swap(index, last);
            self.sparse[self.dense[index].index() as usize] = index as u32;
        }
        self.truncate(last, queue);
    }

    pub(crate) fn sort_span<F>(&mut self, span: std::ops::Range<usize>, mut compare: F)
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        if span.len() < 2 {
            return;
        }
        let mut order: Vec<usize> = span.clone().collect();
        order.sort_by(|&a, &b| compare(self.data.element(a), self.data.element(b)));

        let mut bytes = Vec::with_capacity(span.len() * self.desc.size);
        let mut owners = Vec::with_capacity(span.len());
        for &i in &order {
            bytes.extend_from_slice(self.data.element(i));
            owners.push(self.dense[i]);
        }
        self.data.copy_elements(span.start, &bytes, 0, order.len());
        self.dense[span.clone()].copy_from_slice(&owners);
        self.reindex(span);
    }

    /// Destroy every element and forget every range.
    pub(crate) fn clear(&mut self, queue: &mut DestroyQueue) {
        self.truncate(0, queue);
        self.ranges = Subpool::new(self.range_grow);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
