//! Component descriptors.
//!
//! Every component type used by a [`Registry`](crate::registry::Registry) is
//! described at runtime by a [`ComponentDescriptor`]: element size and
//! alignment plus an explicit table of optional lifecycle callbacks. Nothing
//! else in the engine knows the component's Rust type; pools, ranges and
//! hierarchy payloads move raw element bytes around using only this record.

use std::collections::VecDeque;
use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::registry::Registry;
use crate::subpool::RangeId;
use crate::EcsError;

/// Largest element alignment the byte storage can honour.
pub const MAX_ALIGN: usize = 8;

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
///
/// Ids are dense and stable for the lifetime of the registry that issued them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Pod, Zeroable)]
#[repr(transparent)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    /// Position of the component in its registry's descriptor table.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The id `offset` places after this one. Used with the base id returned
    /// by [`Registry::register_components`].
    #[inline]
    pub fn offset(self, offset: u32) -> ComponentId {
        ComponentId(self.0 + offset)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// DestroyQueue
// ---------------------------------------------------------------------------

/// Context handed to destructors.
///
/// A destructor cannot touch the registry while one of its pools is being
/// mutated, so follow-up teardown is requested here instead. The registry
/// destroys every queued entity once the current operation has finished.
#[derive(Debug, Default)]
pub struct DestroyQueue {
    entities: VecDeque<EntityId>,
}

impl DestroyQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for `entity` to be destroyed after the current operation.
    pub fn destroy_entity(&mut self, entity: EntityId) {
        if !entity.is_null() {
            self.entities.push_back(entity);
        }
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Take the next pending entity (FIFO).
    pub(crate) fn pop(&mut self) -> Option<EntityId> {
        self.entities.pop_front()
    }

    pub(crate) fn extend(&mut self, entities: impl IntoIterator<Item = EntityId>) {
        for entity in entities {
            self.destroy_entity(entity);
        }
    }
}

// ---------------------------------------------------------------------------
// Callback table
// ---------------------------------------------------------------------------

/// Initialise one freshly zeroed element.
pub type ConstructFn = fn(element: &mut [u8]);

/// Release one element that is about to be discarded.
pub type DestructFn = fn(element: &mut [u8], queue: &mut DestroyQueue);

/// Recover which range of `component`'s pool `entity`'s element belongs to.
pub type RangeIdFn =
    fn(registry: &Registry, entity: EntityId, component: ComponentId) -> Option<RangeId>;

// ---------------------------------------------------------------------------
// ComponentDescriptor
// ---------------------------------------------------------------------------

/// Size, alignment and lifecycle callbacks of one component type.
///
/// When `construct` is absent new elements are left zero-filled; when
/// `destruct` is absent destruction is a no-op.
#[derive(Clone)]
pub struct ComponentDescriptor {
    /// Display name; unique within a registry.
    pub name: String,
    /// Element size in bytes.
    pub size: usize,
    /// Element alignment in bytes (power of two, at most [`MAX_ALIGN`]).
    pub align: usize,
    /// Optional element initialiser.
    pub construct: Option<ConstructFn>,
    /// Optional element finaliser.
    pub destruct: Option<DestructFn>,
    /// Optional range resolver for pools partitioned into ranges.
    pub range_id: Option<RangeIdFn>,
}

impl ComponentDescriptor {
    /// A plain byte-record component of `size` bytes, byte aligned.
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            align: 1,
            construct: None,
            destruct: None,
            range_id: None,
        }
    }

    /// Describe the plain-old-data type `T`.
    pub fn of<T: Pod>(name: &str) -> Self {
        Self {
            align: std::mem::align_of::<T>(),
            ..Self::new(name, std::mem::size_of::<T>())
        }
    }

    /// Set the element alignment.
    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Set the constructor.
    pub fn with_construct(mut self, construct: ConstructFn) -> Self {
        self.construct = Some(construct);
        self
    }

    /// Set the destructor.
    pub fn with_destruct(mut self, destruct: DestructFn) -> Self {
        self.destruct = Some(destruct);
        self
    }

    /// Set the range resolver.
    pub fn with_range_id(mut self, range_id: RangeIdFn) -> Self {
        self.range_id = Some(range_id);
        self
    }

    /// Check that the layout can be stored in an aligned byte array.
    pub fn validate(&self) -> Result<(), EcsError> {
        let reason = if !self.align.is_power_of_two() {
            "alignment is not a power of two"
        } else if self.align > MAX_ALIGN {
            "alignment exceeds 8 bytes"
        } else if self.size % self.align != 0 {
            "size is not a multiple of the alignment"
        } else {
            return Ok(());
        };
        Err(EcsError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_owned(),
        })
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("construct", &self.construct.is_some())
            .field("destruct", &self.destruct.is_some())
            .field("range_id", &self.range_id.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
