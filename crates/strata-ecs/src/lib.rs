//! Strata ECS -- type-erased entity/component storage with ranges and trees.
//!
//! Components are described at runtime by a [`ComponentDescriptor`]: element
//! size, alignment and an explicit table of optional lifecycle callbacks. Each
//! registered component gets a packed pool (dense elements + sparse entity
//! map). On top of a pool, *ranges* carve the dense array into contiguous,
//! per-owner slices that can grow, shrink, reorder and sort without
//! disturbing each other; *hierarchies* store entity trees in flat pre-order
//! arrays with per-node payload.
//!
//! Every structural move goes through one primitive,
//! [`rotate_block`](element::rotate_block), which relocates a block of
//! elements while shifting the ones in between.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! let mut registry = Registry::new("demo");
//! let glyph = registry.register_type::<[f32; 4]>("glyph").unwrap();
//!
//! // One range per canvas; each canvas iterates only its own glyphs.
//! let canvas = registry.new_range(glyph).unwrap();
//! let e = registry.create_entity().unwrap();
//! registry.attach_to_range(canvas, e).unwrap();
//! registry.set(e, glyph, [0.0f32, 0.0, 8.0, 12.0]).unwrap();
//!
//! assert_eq!(registry.range(canvas).unwrap(), 0..1);
//! assert_eq!(registry.get_as::<[f32; 4]>(e, glyph).unwrap()[3], 12.0);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod element;
pub mod entity;
pub mod hierarchy;
pub mod pool;
pub mod registry;
pub mod report;
pub mod subpool;

use component::ComponentId;
use entity::EntityId;
use hierarchy::{HierarchyId, HierarchyKind};
use subpool::RangeId;

pub use component::ComponentDescriptor;
pub use registry::Registry;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registry, pool, range and hierarchy operations.
///
/// All of them are caller precondition violations; storage allocation failure
/// is not an error value, it aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: EntityId },

    /// No component with this id is registered.
    #[error("component {component:?} is not registered")]
    UnknownComponent { component: ComponentId },

    /// No component with this name is registered.
    #[error("component '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponentName { name: String, registered: String },

    /// A component with this name is already registered.
    #[error("component '{name}' is already registered")]
    DuplicateComponentName { name: String },

    /// The descriptor's layout cannot be stored.
    #[error("invalid descriptor for '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },

    /// The entity already carries the component.
    #[error("entity {entity:?} already has component '{component}'")]
    AlreadyAttached { entity: EntityId, component: String },

    /// The entity does not carry the component.
    #[error("entity {entity:?} has no component '{component}'")]
    MissingComponent { entity: EntityId, component: String },

    /// A payload's length differs from the component's element size.
    #[error("payload for '{component}' is {actual} bytes, expected {expected}")]
    PayloadSize {
        component: String,
        expected: usize,
        actual: usize,
    },

    /// A typed view does not match the component's layout.
    #[error("component {component:?} cannot be viewed as {type_name}")]
    TypeMismatch {
        component: ComponentId,
        type_name: &'static str,
    },

    /// The range id is stale or was never issued.
    #[error("range {range:?} does not exist")]
    StaleRange { range: RangeId },

    /// The descriptor's `range_id` callback places the entity elsewhere.
    #[error("entity {entity:?} resolves to range {resolved:?}, not {range:?}")]
    RangeMismatch {
        entity: EntityId,
        range: RangeId,
        resolved: Option<RangeId>,
    },

    /// Growing a range needs more unassigned elements than the pool holds.
    #[error("cannot grow {range:?} by {requested}: only {available} unassigned elements")]
    RangeOverflow {
        range: RangeId,
        requested: usize,
        available: usize,
    },

    /// Shrinking a range by more than its length.
    #[error("cannot shrink {range:?} by {requested}: it holds {length} elements")]
    RangeUnderflow {
        range: RangeId,
        requested: usize,
        length: usize,
    },

    /// Whole-pool reordering would break the pool's ranges.
    #[error("pool '{component}' is partitioned into ranges; sort a range instead")]
    PoolHasRanges { component: String },

    /// No hierarchy kind with this id is defined.
    #[error("hierarchy kind {kind:?} is not defined")]
    UnknownHierarchyKind { kind: HierarchyKind },

    /// The hierarchy id is stale or was never issued.
    #[error("hierarchy {hierarchy:?} does not exist")]
    StaleHierarchy { hierarchy: HierarchyId },

    /// A node index past the end of its hierarchy.
    #[error("node {index} out of bounds for {hierarchy:?} with {len} nodes")]
    NodeOutOfBounds {
        hierarchy: HierarchyId,
        index: usize,
        len: usize,
    },

    /// A payload index past the kind's payload list.
    #[error("hierarchy kind '{hierarchy}' has no payload {payload}")]
    UnknownPayload { hierarchy: String, payload: usize },

    /// The entity is already a node of some hierarchy.
    #[error("entity {entity:?} is already a node of {hierarchy:?}")]
    AlreadyInHierarchy {
        entity: EntityId,
        hierarchy: HierarchyId,
    },

    /// The new parent lies inside the subtree being moved.
    #[error("cannot move node {index} of {hierarchy:?} under its own descendant {parent}")]
    CyclicReparent {
        hierarchy: HierarchyId,
        index: usize,
        parent: usize,
    },

    /// Two hierarchies of different kinds were combined.
    #[error("expected hierarchy kind {expected:?}, found {found:?}")]
    HierarchyKindMismatch {
        expected: HierarchyKind,
        found: HierarchyKind,
    },

    /// Every id of this kind is in use.
    #[error("out of {what} ids")]
    IdsExhausted { what: &'static str },

    /// The configuration is malformed or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentDescriptor, ComponentId, DestroyQueue};
    pub use crate::config::RegistryConfig;
    pub use crate::entity::EntityId;
    pub use crate::hierarchy::{HierarchyId, HierarchyKind};
    pub use crate::registry::Registry;
    pub use crate::report::{EntityReport, RegistryReport};
    pub use crate::subpool::RangeId;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use bytemuck::{Pod, Zeroable};

    // -- test component types -----------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(transparent)]
    struct Health(u32);

    fn setup() -> (Registry, ComponentId, ComponentId, ComponentId) {
        let mut reg = Registry::new("world");
        let pos = reg.register_type::<Position>("position").unwrap();
        let vel = reg.register_type::<Velocity>("velocity").unwrap();
        let hp = reg.register_type::<Health>("health").unwrap();
        (reg, pos, vel, hp)
    }

    // -- entities and components --------------------------------------------

    #[test]
    fn attach_get_detach() {
        let (mut reg, pos, vel, _) = setup();
        let e = reg.create_entity().unwrap();
        reg.set(e, pos, Position { x: 1.0, y: 2.0 }).unwrap();
        assert!(reg.has(e, pos));
        assert!(!reg.has(e, vel));
        assert_eq!(
            reg.get_as::<Position>(e, pos).unwrap(),
            &Position { x: 1.0, y: 2.0 }
        );

        reg.detach(e, pos).unwrap();
        assert!(!reg.has(e, pos));
        assert!(matches!(
            reg.get(e, pos),
            Err(EcsError::MissingComponent { .. })
        ));
        assert!(matches!(
            reg.detach(e, pos),
            Err(EcsError::MissingComponent { .. })
        ));
    }

    #[test]
    fn attach_twice_rejected() {
        let (mut reg, pos, _, _) = setup();
        let e = reg.create_entity().unwrap();
        reg.attach(e, pos).unwrap();
        assert!(matches!(
            reg.attach(e, pos),
            Err(EcsError::AlreadyAttached { .. })
        ));
    }

    #[test]
    fn get_as_mut_writes_through() {
        let (mut reg, _, _, hp) = setup();
        let e = reg.create_entity().unwrap();
        reg.set(e, hp, Health(10)).unwrap();
        reg.get_as_mut::<Health>(e, hp).unwrap().0 -= 3;
        assert_eq!(reg.get_as::<Health>(e, hp).unwrap(), &Health(7));
    }

    #[test]
    fn destroy_detaches_everything() {
        let (mut reg, pos, vel, hp) = setup();
        let e = reg.create_entity().unwrap();
        reg.attach(e, pos).unwrap();
        reg.attach(e, vel).unwrap();
        reg.attach(e, hp).unwrap();
        let other = reg.create_entity().unwrap();
        reg.attach(other, pos).unwrap();

        reg.destroy_entity(e).unwrap();
        assert!(!reg.is_alive(e));
        assert_eq!(reg.pool(pos).unwrap().entities(), &[other]);
        assert!(reg.pool(vel).unwrap().is_empty());
        assert!(reg.pool(hp).unwrap().is_empty());
    }

    #[test]
    fn recycled_id_is_distinct() {
        let (mut reg, pos, _, _) = setup();
        let e = reg.create_entity().unwrap();
        reg.attach(e, pos).unwrap();
        reg.destroy_entity(e).unwrap();
        let f = reg.create_entity().unwrap();
        assert_eq!(f.index(), e.index());
        assert_ne!(f, e);
        assert!(!reg.has(f, pos));
    }

    #[test]
    fn iter_as_yields_typed_values() {
        let (mut reg, _, _, hp) = setup();
        for i in 0..4 {
            let e = reg.create_entity().unwrap();
            reg.set(e, hp, Health(i * 10)).unwrap();
        }
        let total: u32 = reg.iter_as::<Health>(hp).unwrap().map(|(_, h)| h.0).sum();
        assert_eq!(total, 60);
        assert!(matches!(
            reg.iter_as::<Position>(hp),
            Err(EcsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn destroy_entities_with_component() {
        let (mut reg, pos, vel, _) = setup();
        let a = reg.create_entity().unwrap();
        let b = reg.create_entity().unwrap();
        let c = reg.create_entity().unwrap();
        reg.attach(a, vel).unwrap();
        reg.attach(b, vel).unwrap();
        reg.attach(c, pos).unwrap();
        assert_eq!(reg.destroy_entities_with(vel).unwrap(), 2);
        assert_eq!(reg.entity_count(), 1);
        assert!(reg.is_alive(c));
    }

    // -- ranges --------------------------------------------------------------

    #[test]
    fn canvases_keep_their_own_order() {
        let (mut reg, pos, _, _) = setup();
        let left = reg.new_range(pos).unwrap();
        let right = reg.new_range(pos).unwrap();
        let mut spawn = |range: RangeId, x: f32| {
            let e = reg.create_entity().unwrap();
            reg.attach_to_range(range, e).unwrap();
            reg.set(e, pos, Position { x, y: 0.0 }).unwrap();
        };
        spawn(left, 1.0);
        spawn(right, 10.0);
        spawn(left, 2.0);
        spawn(right, 20.0);
        spawn(left, 3.0);

        let xs = |reg: &Registry, r: RangeId| -> Vec<f32> {
            reg.iter_range(r)
                .unwrap()
                .map(|(_, bytes)| bytemuck::from_bytes::<Position>(bytes).x)
                .collect()
        };
        assert_eq!(xs(&reg, left), vec![1.0, 2.0, 3.0]);
        assert_eq!(xs(&reg, right), vec![10.0, 20.0]);

        reg.sort_range_as::<Position, _>(left, |a, b| b.x.total_cmp(&a.x))
            .unwrap();
        assert_eq!(xs(&reg, left), vec![3.0, 2.0, 1.0]);
        assert_eq!(xs(&reg, right), vec![10.0, 20.0]);

        reg.free_range(left).unwrap();
        assert_eq!(reg.entity_count(), 5);
        assert_eq!(reg.pool(pos).unwrap().len(), 2);
        assert_eq!(reg.range(right).unwrap(), 0..2);
        assert!(matches!(
            reg.range(left),
            Err(EcsError::StaleRange { .. })
        ));
    }

    #[test]
    fn whole_pool_sort_blocked_by_ranges() {
        let (mut reg, _, _, hp) = setup();
        for value in [3, 1, 2] {
            let e = reg.create_entity().unwrap();
            reg.set(e, hp, Health(value)).unwrap();
        }
        reg.sort_pool(hp, |a, b| a.cmp(b)).unwrap();
        let values: Vec<u32> = reg.iter_as::<Health>(hp).unwrap().map(|(_, h)| h.0).collect();
        assert_eq!(values, vec![1, 2, 3]);

        reg.new_range(hp).unwrap();
        assert!(matches!(
            reg.sort_pool(hp, |a, b| a.cmp(b)),
            Err(EcsError::PoolHasRanges { .. })
        ));
    }

    // -- hierarchies ---------------------------------------------------------

    #[test]
    fn hierarchy_with_payload() {
        let mut reg = Registry::new("ui");
        let kind = reg
            .define_hierarchy_kind("passage", &[ComponentDescriptor::of::<u32>("text_offset")])
            .unwrap();
        let passage = reg.create_entity().unwrap();
        let para = reg.create_entity().unwrap();
        let run = reg.create_entity().unwrap();
        let h = reg.new_hierarchy_of_kind(kind, passage).unwrap();
        let p = reg.insert(h, 0, para).unwrap();
        let r = reg.insert(h, p, run).unwrap();
        reg.hierarchy_payload_mut(h, 0, r)
            .unwrap()
            .copy_from_slice(&42u32.to_le_bytes());

        assert_eq!(reg.children(h, 0).unwrap().collect::<Vec<_>>(), vec![p]);
        assert_eq!(reg.hierarchy_payload(h, 0, r).unwrap(), &42u32.to_le_bytes());

        reg.destroy_entity(passage).unwrap();
        assert_eq!(reg.entity_count(), 0);
        assert_eq!(reg.hierarchy_store(kind).unwrap().node_count(), 0);
    }

    #[test]
    fn remove_subtree_keeps_entities() {
        let mut reg = Registry::new("ui");
        let root = reg.create_entity().unwrap();
        let child = reg.create_entity().unwrap();
        let h = reg.new_hierarchy(root).unwrap();
        reg.insert(h, 0, child).unwrap();
        let removed = reg.remove_subtree(h, 1).unwrap();
        assert_eq!(removed, vec![child]);
        assert!(reg.is_alive(child));
        assert_eq!(reg.hierarchy_of(child), None);
        // No longer a node, so it can root a new tree.
        reg.new_hierarchy(child).unwrap();
    }
}
