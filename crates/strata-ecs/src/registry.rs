//! The registry: entities, component pools, ranges and hierarchies.
//!
//! [`Registry`] is the public entry point. It hands out generational
//! [`EntityId`]s, owns one [`ComponentPool`] per registered component and one
//! [`HierarchyStore`] per hierarchy kind, and validates every caller-supplied
//! id before handing the request to the storage layers.
//!
//! Destructors never see the registry directly; they push follow-up
//! destruction requests onto a [`DestroyQueue`], which the registry drains
//! once the operation that ran them has finished.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

use bytemuck::Pod;
use tracing::{debug, trace, warn};

use crate::component::{ComponentDescriptor, ComponentId, DestroyQueue, MAX_ALIGN};
use crate::config::RegistryConfig;
use crate::entity::{EntityId, HandleAllocator};
use crate::hierarchy::{Children, HierarchyId, HierarchyKind, HierarchyStore};
use crate::pool::ComponentPool;
use crate::subpool::RangeId;
use crate::EcsError;

/// Entity storage engine: owns every pool, range and hierarchy of a world.
pub struct Registry {
    name: String,
    config: RegistryConfig,
    entities: HandleAllocator<EntityId>,
    pools: Vec<ComponentPool>,
    by_name: HashMap<String, ComponentId>,
    hierarchies: Vec<HierarchyStore>,
    /// Hierarchy each node entity belongs to.
    nodes: HashMap<EntityId, HierarchyId>,
    pending: DestroyQueue,
}

impl Registry {
    /// Kind used by [`new_hierarchy`](Self::new_hierarchy): no payload.
    pub const DEFAULT_HIERARCHY: HierarchyKind = HierarchyKind(0);

    /// Create an empty registry with default configuration.
    pub fn new(name: &str) -> Self {
        Self::build(name, RegistryConfig::default())
    }

    /// Create an empty registry with a validated configuration.
    pub fn with_config(name: &str, config: RegistryConfig) -> Result<Self, EcsError> {
        config.validate()?;
        Ok(Self::build(name, config))
    }

    fn build(name: &str, config: RegistryConfig) -> Self {
        let default_kind = HierarchyStore::new(
            Self::DEFAULT_HIERARCHY,
            "hierarchy",
            Vec::new(),
            config.hierarchy_grow,
        );
        Self {
            name: name.to_owned(),
            entities: HandleAllocator::new(config.max_entities, config.entity_grow),
            pools: Vec::new(),
            by_name: HashMap::new(),
            hierarchies: vec![default_kind],
            nodes: HashMap::new(),
            pending: DestroyQueue::new(),
            config,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// Register a component type and create its pool.
    pub fn register(&mut self, desc: ComponentDescriptor) -> Result<ComponentId, EcsError> {
        desc.validate()?;
        if self.by_name.contains_key(&desc.name) {
            return Err(EcsError::DuplicateComponentName { name: desc.name });
        }
        let id = ComponentId(self.pools.len() as u32);
        debug!(
            registry = %self.name,
            component = %desc.name,
            id = id.index(),
            size = desc.size,
            "component registered"
        );
        self.by_name.insert(desc.name.clone(), id);
        self.pools.push(ComponentPool::new(id, desc, &self.config));
        Ok(id)
    }

    /// Register the plain-old-data type `T` under `name`.
    pub fn register_type<T: Pod>(&mut self, name: &str) -> Result<ComponentId, EcsError> {
        self.register(ComponentDescriptor::of::<T>(name))
    }

    /// Register a batch of components with consecutive ids, returning the
    /// first. Nothing is registered if any descriptor is rejected.
    pub fn register_components(
        &mut self,
        descs: &[ComponentDescriptor],
    ) -> Result<ComponentId, EcsError> {
        let mut seen = HashSet::new();
        for desc in descs {
            desc.validate()?;
            if self.by_name.contains_key(&desc.name) || !seen.insert(desc.name.as_str()) {
                return Err(EcsError::DuplicateComponentName {
                    name: desc.name.clone(),
                });
            }
        }
        let base = ComponentId(self.pools.len() as u32);
        for desc in descs {
            self.register(desc.clone())?;
        }
        Ok(base)
    }

    /// Look up a component by name.
    pub fn component_id(&self, name: &str) -> Result<ComponentId, EcsError> {
        self.by_name.get(name).copied().ok_or_else(|| {
            let registered: Vec<&str> = self.pools.iter().map(|p| p.descriptor().name.as_str()).collect();
            EcsError::UnknownComponentName {
                name: name.to_owned(),
                registered: registered.join(", "),
            }
        })
    }

    /// Number of registered components.
    pub fn component_count(&self) -> usize {
        self.pools.len()
    }

    /// Descriptor of a registered component.
    pub fn descriptor(&self, component: ComponentId) -> Result<&ComponentDescriptor, EcsError> {
        Ok(self.pool(component)?.descriptor())
    }

    /// Pool of a registered component.
    pub fn pool(&self, component: ComponentId) -> Result<&ComponentPool, EcsError> {
        self.pools
            .get(component.index())
            .ok_or(EcsError::UnknownComponent { component })
    }

    fn pool_mut(&mut self, component: ComponentId) -> Result<&mut ComponentPool, EcsError> {
        self.pools
            .get_mut(component.index())
            .ok_or(EcsError::UnknownComponent { component })
    }

    /// Every pool, in component-id order.
    pub fn pools(&self) -> &[ComponentPool] {
        &self.pools
    }

    fn check_type<T: Pod>(&self, component: ComponentId) -> Result<(), EcsError> {
        let desc = self.descriptor(component)?;
        if std::mem::size_of::<T>() != desc.size || std::mem::align_of::<T>() > MAX_ALIGN {
            return Err(type_mismatch::<T>(component));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Allocate a new entity.
    pub fn create_entity(&mut self) -> Result<EntityId, EcsError> {
        let entity = self
            .entities
            .allocate()
            .ok_or(EcsError::IdsExhausted { what: "entity" })?;
        trace!(?entity, "entity created");
        Ok(entity)
    }

    /// Whether `entity` is alive.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_live(entity)
    }

    fn check_alive(&self, entity: EntityId) -> Result<(), EcsError> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleEntity { entity })
        }
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    /// Every live entity, in index order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter_live()
    }

    /// Destroy an entity: its hierarchy subtree (descendant entities are
    /// destroyed too), every component it carries, then the id itself.
    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.check_alive(entity)?;
        self.teardown(entity);
        self.drain_pending();
        Ok(())
    }

    /// Destroy every entity that carries `component`. Returns how many were
    /// destroyed directly (cascaded destruction is not counted).
    pub fn destroy_entities_with(&mut self, component: ComponentId) -> Result<usize, EcsError> {
        let targets = self.pool(component)?.entities().to_vec();
        let mut destroyed = 0;
        for entity in targets {
            if self.is_alive(entity) {
                self.teardown(entity);
                destroyed += 1;
            }
        }
        self.drain_pending();
        Ok(destroyed)
    }

    fn teardown(&mut self, entity: EntityId) {
        if let Some(hierarchy) = self.nodes.get(&entity).copied() {
            let store = &mut self.hierarchies[hierarchy.kind.index()];
            let removed = match store.find(hierarchy, entity) {
                Ok(Some(index)) => store.remove_subtree(hierarchy, index, &mut self.pending),
                Ok(None) => Ok(Vec::new()),
                Err(err) => Err(err),
            };
            match removed {
                Ok(removed) => {
                    for node in &removed {
                        self.nodes.remove(node);
                    }
                    self.pending
                        .extend(removed.into_iter().filter(|&node| node != entity));
                }
                Err(err) => warn!(?entity, %err, "hierarchy node lost before teardown"),
            }
            self.nodes.remove(&entity);
        }
        for pool in &mut self.pools {
            pool.remove(entity, &mut self.pending);
        }
        self.entities.free(entity);
        trace!(?entity, "entity destroyed");
    }

    fn drain_pending(&mut self) {
        while let Some(entity) = self.pending.pop() {
            if !self.is_alive(entity) {
                warn!(?entity, "destroy requested for an entity that is already gone");
                continue;
            }
            self.teardown(entity);
        }
    }

    // -----------------------------------------------------------------------
    // Components on entities
    // -----------------------------------------------------------------------

    /// Attach a new element of `component` to `entity`, constructed by the
    /// descriptor (or zero-filled). Components with a `range_id` resolver are
    /// placed at the end of the range it names.
    pub fn attach(&mut self, entity: EntityId, component: ComponentId) -> Result<&mut [u8], EcsError> {
        self.place(entity, component, None)
    }

    /// Attach a new element initialised from `payload`.
    pub fn attach_with(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        payload: &[u8],
    ) -> Result<&mut [u8], EcsError> {
        self.place(entity, component, Some(payload))
    }

    fn place(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        payload: Option<&[u8]>,
    ) -> Result<&mut [u8], EcsError> {
        self.check_alive(entity)?;
        let range = match self.pool(component)?.descriptor().range_id {
            Some(resolve) => resolve(self, entity, component),
            None => None,
        };
        let pool = self.pool_mut(component)?;
        let index = match range {
            Some(range) if range.component != component => {
                return Err(EcsError::StaleRange { range });
            }
            Some(range) => pool.attach_to_range(range.slot, entity, payload)?,
            None => pool.push_checked(entity, payload)?,
        };
        Ok(pool.element_mut(index))
    }

    /// Store `value` as `entity`'s `component`, attaching it if absent.
    pub fn set<T: Pod>(&mut self, entity: EntityId, component: ComponentId, value: T) -> Result<(), EcsError> {
        self.check_type::<T>(component)?;
        let bytes = bytemuck::bytes_of(&value);
        if self.has(entity, component) {
            self.get_mut(entity, component)?.copy_from_slice(bytes);
        } else {
            self.attach_with(entity, component, bytes)?;
        }
        Ok(())
    }

    /// Element bytes of `entity`'s `component`.
    pub fn get(&self, entity: EntityId, component: ComponentId) -> Result<&[u8], EcsError> {
        self.check_alive(entity)?;
        let pool = self.pool(component)?;
        pool.get(entity).ok_or_else(|| EcsError::MissingComponent {
            entity,
            component: pool.descriptor().name.clone(),
        })
    }

    /// Element bytes of `entity`'s `component`, mutably.
    pub fn get_mut(&mut self, entity: EntityId, component: ComponentId) -> Result<&mut [u8], EcsError> {
        self.check_alive(entity)?;
        let pool = self.pool_mut(component)?;
        let Some(index) = pool.index_of(entity) else {
            return Err(EcsError::MissingComponent {
                entity,
                component: pool.descriptor().name.clone(),
            });
        };
        Ok(pool.element_mut(index))
    }

    /// `entity`'s `component`, viewed as `T`.
    pub fn get_as<T: Pod>(&self, entity: EntityId, component: ComponentId) -> Result<&T, EcsError> {
        let bytes = self.get(entity, component)?;
        bytemuck::try_from_bytes(bytes).map_err(|_| type_mismatch::<T>(component))
    }

    /// `entity`'s `component`, viewed mutably as `T`.
    pub fn get_as_mut<T: Pod>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
    ) -> Result<&mut T, EcsError> {
        let bytes = self.get_mut(entity, component)?;
        bytemuck::try_from_bytes_mut(bytes).map_err(|_| type_mismatch::<T>(component))
    }

    /// Whether `entity` is alive and carries `component`.
    pub fn has(&self, entity: EntityId, component: ComponentId) -> bool {
        self.is_alive(entity)
            && self
                .pools
                .get(component.index())
                .is_some_and(|pool| pool.contains(entity))
    }

    /// Detach `component` from `entity`, running its destructor.
    pub fn detach(&mut self, entity: EntityId, component: ComponentId) -> Result<(), EcsError> {
        self.check_alive(entity)?;
        let pool = self
            .pools
            .get_mut(component.index())
            .ok_or(EcsError::UnknownComponent { component })?;
        pool.detach(entity, &mut self.pending)?;
        self.drain_pending();
        Ok(())
    }

    /// Entity/element pairs of `component` in dense order.
    pub fn iter(
        &self,
        component: ComponentId,
    ) -> Result<impl Iterator<Item = (EntityId, &[u8])> + '_, EcsError> {
        Ok(self.pool(component)?.iter())
    }

    /// Entity/value pairs of `component` in dense order, viewed as `T`.
    pub fn iter_as<T: Pod>(
        &self,
        component: ComponentId,
    ) -> Result<impl Iterator<Item = (EntityId, &T)> + '_, EcsError> {
        self.check_type::<T>(component)?;
        let pool = self.pool(component)?;
        let values: &[T] = bytemuck::try_cast_slice(pool.data().bytes())
            .map_err(|_| type_mismatch::<T>(component))?;
        Ok(pool.entities().iter().copied().zip(values))
    }

    /// Stable sort of `component`'s whole pool by element bytes. Fails with
    /// [`EcsError::PoolHasRanges`] once the pool is partitioned.
    pub fn sort_pool<F>(&mut self, component: ComponentId, compare: F) -> Result<(), EcsError>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.pool_mut(component)?.sort_by(compare)
    }

    // -----------------------------------------------------------------------
    // Ranges
    // -----------------------------------------------------------------------

    /// Open an empty range in `component`'s pool.
    pub fn new_range(&mut self, component: ComponentId) -> Result<RangeId, EcsError> {
        self.pool_mut(component)?.new_range()
    }

    /// Dense bounds of a range.
    pub fn range(&self, range: RangeId) -> Result<Range<usize>, EcsError> {
        self.pool(range.component)?.range(range.slot)
    }

    /// Extend a range by the first `count` unassigned elements of its pool.
    pub fn grow_range(&mut self, range: RangeId, count: usize) -> Result<Range<usize>, EcsError> {
        self.pool_mut(range.component)?.grow_range(range.slot, count)
    }

    /// Destroy the last `count` elements of a range.
    pub fn shrink_range(&mut self, range: RangeId, count: usize) -> Result<Range<usize>, EcsError> {
        let pool = self
            .pools
            .get_mut(range.component.index())
            .ok_or(EcsError::UnknownComponent {
                component: range.component,
            })?;
        let bounds = pool.shrink_range(range.slot, count, &mut self.pending)?;
        self.drain_pending();
        Ok(bounds)
    }

    /// Destroy every element of a range and retire the range id.
    pub fn free_range(&mut self, range: RangeId) -> Result<(), EcsError> {
        let pool = self
            .pools
            .get_mut(range.component.index())
            .ok_or(EcsError::UnknownComponent {
                component: range.component,
            })?;
        pool.free_range(range.slot, &mut self.pending)?;
        self.drain_pending();
        Ok(())
    }

    /// Reorder a range to be the last of its pool.
    pub fn move_range_last(&mut self, range: RangeId) -> Result<Range<usize>, EcsError> {
        self.pool_mut(range.component)?.move_range_last(range.slot)
    }

    /// Stable sort of one range by element bytes.
    pub fn sort_range<F>(&mut self, range: RangeId, compare: F) -> Result<(), EcsError>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.pool_mut(range.component)?.sort_range(range.slot, compare)
    }

    /// Stable sort of one range, comparing elements as `T`.
    pub fn sort_range_as<T, F>(&mut self, range: RangeId, mut compare: F) -> Result<(), EcsError>
    where
        T: Pod,
        F: FnMut(&T, &T) -> Ordering,
    {
        self.check_type::<T>(range.component)?;
        self.pool_mut(range.component)?
            .sort_range(range.slot, |a, b| compare(bytemuck::from_bytes(a), bytemuck::from_bytes(b)))
    }

    /// Entity/element pairs of a range, in range order.
    pub fn iter_range(
        &self,
        range: RangeId,
    ) -> Result<impl Iterator<Item = (EntityId, &[u8])> + '_, EcsError> {
        self.pool(range.component)?.iter_range(range.slot)
    }

    /// Attach `range.component` to `entity` at the end of `range`. If the
    /// descriptor has a `range_id` callback it must resolve to `range`.
    pub fn attach_to_range(&mut self, range: RangeId, entity: EntityId) -> Result<&mut [u8], EcsError> {
        self.check_alive(entity)?;
        if let Some(resolve) = self.pool(range.component)?.descriptor().range_id {
            let resolved = resolve(self, entity, range.component);
            if resolved != Some(range) {
                return Err(EcsError::RangeMismatch {
                    entity,
                    range,
                    resolved,
                });
            }
        }
        let pool = self.pool_mut(range.component)?;
        let index = pool.attach_to_range(range.slot, entity, None)?;
        Ok(pool.element_mut(index))
    }

    /// Range holding `entity`'s `component`, resolved through the
    /// descriptor's `range_id` callback when it has one.
    pub fn range_of(&self, entity: EntityId, component: ComponentId) -> Result<Option<RangeId>, EcsError> {
        self.check_alive(entity)?;
        let pool = self.pool(component)?;
        let Some(index) = pool.index_of(entity) else {
            return Err(EcsError::MissingComponent {
                entity,
                component: pool.descriptor().name.clone(),
            });
        };
        Ok(match pool.descriptor().range_id {
            Some(resolve) => resolve(self, entity, component),
            None => pool.range_of_index(index),
        })
    }

    // -----------------------------------------------------------------------
    // Hierarchies
    // -----------------------------------------------------------------------

    /// Define a hierarchy kind whose nodes carry one element of each payload
    /// descriptor.
    pub fn define_hierarchy_kind(
        &mut self,
        name: &str,
        payload: &[ComponentDescriptor],
    ) -> Result<HierarchyKind, EcsError> {
        for desc in payload {
            desc.validate()?;
        }
        let kind = HierarchyKind(self.hierarchies.len() as u32);
        self.hierarchies.push(HierarchyStore::new(
            kind,
            name,
            payload.to_vec(),
            self.config.hierarchy_grow,
        ));
        debug!(?kind, name, payloads = payload.len(), "hierarchy kind defined");
        Ok(kind)
    }

    /// Store holding every hierarchy of `kind`.
    pub fn hierarchy_store(&self, kind: HierarchyKind) -> Result<&HierarchyStore, EcsError> {
        self.hierarchies
            .get(kind.index())
            .ok_or(EcsError::UnknownHierarchyKind { kind })
    }

    /// Every hierarchy store, in kind order.
    pub fn hierarchy_stores(&self) -> &[HierarchyStore] {
        &self.hierarchies
    }

    fn check_not_node(&self, entity: EntityId) -> Result<(), EcsError> {
        self.check_alive(entity)?;
        match self.nodes.get(&entity) {
            Some(&hierarchy) => Err(EcsError::AlreadyInHierarchy { entity, hierarchy }),
            None => Ok(()),
        }
    }

    /// Start a payload-free hierarchy rooted at `root`.
    pub fn new_hierarchy(&mut self, root: EntityId) -> Result<HierarchyId, EcsError> {
        self.new_hierarchy_of_kind(Self::DEFAULT_HIERARCHY, root)
    }

    /// Start a hierarchy of `kind` rooted at `root`.
    pub fn new_hierarchy_of_kind(
        &mut self,
        kind: HierarchyKind,
        root: EntityId,
    ) -> Result<HierarchyId, EcsError> {
        self.check_not_node(root)?;
        let store = self
            .hierarchies
            .get_mut(kind.index())
            .ok_or(EcsError::UnknownHierarchyKind { kind })?;
        let hierarchy = store.new_hierarchy(root)?;
        self.nodes.insert(root, hierarchy);
        Ok(hierarchy)
    }

    /// Add `entity` as the last child of node `parent`.
    pub fn insert(
        &mut self,
        hierarchy: HierarchyId,
        parent: usize,
        entity: EntityId,
    ) -> Result<usize, EcsError> {
        self.check_not_node(entity)?;
        let store = self.store_mut(hierarchy.kind)?;
        let index = store.insert(hierarchy, parent, entity)?;
        self.nodes.insert(entity, hierarchy);
        Ok(index)
    }

    fn store_mut(&mut self, kind: HierarchyKind) -> Result<&mut HierarchyStore, EcsError> {
        self.hierarchies
            .get_mut(kind.index())
            .ok_or(EcsError::UnknownHierarchyKind { kind })
    }

    /// Remove a node and its subtree. The entities stay alive; they simply
    /// stop being nodes. Removing the root deletes the hierarchy.
    pub fn remove_subtree(
        &mut self,
        hierarchy: HierarchyId,
        index: usize,
    ) -> Result<Vec<EntityId>, EcsError> {
        let store = self
            .hierarchies
            .get_mut(hierarchy.kind.index())
            .ok_or(EcsError::UnknownHierarchyKind {
                kind: hierarchy.kind,
            })?;
        let removed = store.remove_subtree(hierarchy, index, &mut self.pending)?;
        for entity in &removed {
            self.nodes.remove(entity);
        }
        self.drain_pending();
        Ok(removed)
    }

    /// Delete a whole hierarchy. Its entities stay alive.
    pub fn delete_hierarchy(&mut self, hierarchy: HierarchyId) -> Result<Vec<EntityId>, EcsError> {
        self.remove_subtree(hierarchy, 0)
    }

    /// Direct children of a node.
    pub fn children(&self, hierarchy: HierarchyId, index: usize) -> Result<Children<'_>, EcsError> {
        self.hierarchy_store(hierarchy.kind)?.children(hierarchy, index)
    }

    /// Hierarchy and local index of `entity`'s node.
    pub fn hierarchy_of(&self, entity: EntityId) -> Option<(HierarchyId, usize)> {
        let &hierarchy = self.nodes.get(&entity)?;
        let index = self
            .hierarchies
            .get(hierarchy.kind.index())?
            .find(hierarchy, entity)
            .ok()??;
        Some((hierarchy, index))
    }

    /// Move the subtree at `index` under another node (of the same or another
    /// hierarchy of the same kind), or split it into a new hierarchy with
    /// `None`.
    pub fn reparent(
        &mut self,
        hierarchy: HierarchyId,
        index: usize,
        target: Option<(HierarchyId, usize)>,
    ) -> Result<(HierarchyId, usize), EcsError> {
        if let Some((dst, _)) = target {
            if dst.kind != hierarchy.kind {
                return Err(EcsError::HierarchyKindMismatch {
                    expected: hierarchy.kind,
                    found: dst.kind,
                });
            }
        }
        let store = self
            .hierarchies
            .get_mut(hierarchy.kind.index())
            .ok_or(EcsError::UnknownHierarchyKind {
                kind: hierarchy.kind,
            })?;
        let (dst, local) = store.reparent(hierarchy, index, target)?;
        if dst != hierarchy {
            let span = store.subtree(dst, local)?;
            for &entity in &store.entities(dst)?[span] {
                self.nodes.insert(entity, dst);
            }
        }
        Ok((dst, local))
    }

    /// Payload bytes of a node.
    pub fn hierarchy_payload(
        &self,
        hierarchy: HierarchyId,
        payload: usize,
        index: usize,
    ) -> Result<&[u8], EcsError> {
        self.hierarchy_store(hierarchy.kind)?
            .payload(hierarchy, payload, index)
    }

    /// Payload bytes of a node, mutably.
    pub fn hierarchy_payload_mut(
        &mut self,
        hierarchy: HierarchyId,
        payload: usize,
        index: usize,
    ) -> Result<&mut [u8], EcsError> {
        self.store_mut(hierarchy.kind)?
            .payload_mut(hierarchy, payload, index)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let mut queue = DestroyQueue::new();
        for pool in &mut self.pools {
            pool.clear(&mut queue);
        }
        for store in &mut self.hierarchies {
            store.clear(&mut queue);
        }
        if !queue.is_empty() {
            trace!(
                registry = %self.name,
                discarded = queue.len(),
                "destroy requests dropped with the registry"
            );
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("entities", &self.entities.live_count())
            .field("components", &self.pools.len())
            .field("hierarchy_kinds", &self.hierarchies.len())
            .finish()
    }
}

fn type_mismatch<T>(component: ComponentId) -> EcsError {
    EcsError::TypeMismatch {
        component,
        type_name: std::any::type_name::<T>(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = Registry::new("test");
        reg.register_type::<u32>("hp").unwrap();
        assert!(matches!(
            reg.register_type::<u64>("hp"),
            Err(EcsError::DuplicateComponentName { .. })
        ));
    }

    #[test]
    fn batch_registration_is_all_or_nothing() {
        let mut reg = Registry::new("test");
        let descs = [
            ComponentDescriptor::of::<u32>("a"),
            ComponentDescriptor::new("bad", 6).with_align(4),
        ];
        assert!(reg.register_components(&descs).is_err());
        assert_eq!(reg.component_count(), 0);

        let base = reg
            .register_components(&[
                ComponentDescriptor::of::<u32>("a"),
                ComponentDescriptor::of::<u16>("b"),
            ])
            .unwrap();
        assert_eq!(reg.component_id("b").unwrap(), base.offset(1));
    }

    #[test]
    fn unknown_name_lists_registered() {
        let mut reg = Registry::new("test");
        reg.register_type::<u32>("hp").unwrap();
        let err = reg.component_id("mana").unwrap_err();
        assert!(err.to_string().contains("hp"));
    }

    #[test]
    fn stale_entity_rejected() {
        let mut reg = Registry::new("test");
        let hp = reg.register_type::<u32>("hp").unwrap();
        let e = reg.create_entity().unwrap();
        reg.destroy_entity(e).unwrap();
        assert!(matches!(reg.attach(e, hp), Err(EcsError::StaleEntity { .. })));
        assert!(matches!(reg.destroy_entity(e), Err(EcsError::StaleEntity { .. })));
        assert!(!reg.has(e, hp));
    }

    #[test]
    fn entity_limit_enforced() {
        let config = RegistryConfig {
            max_entities: 2,
            ..RegistryConfig::default()
        };
        let mut reg = Registry::with_config("small", config).unwrap();
        reg.create_entity().unwrap();
        reg.create_entity().unwrap();
        assert!(matches!(
            reg.create_entity(),
            Err(EcsError::IdsExhausted { what: "entity" })
        ));
    }

    #[test]
    fn set_attaches_then_overwrites() {
        let mut reg = Registry::new("test");
        let hp = reg.register_type::<u32>("hp").unwrap();
        let e = reg.create_entity().unwrap();
        reg.set(e, hp, 10u32).unwrap();
        reg.set(e, hp, 25u32).unwrap();
        assert_eq!(*reg.get_as::<u32>(e, hp).unwrap(), 25);
        assert_eq!(reg.pool(hp).unwrap().len(), 1);
    }

    #[test]
    fn wrong_type_view_rejected() {
        let mut reg = Registry::new("test");
        let hp = reg.register_type::<u32>("hp").unwrap();
        let e = reg.create_entity().unwrap();
        reg.attach(e, hp).unwrap();
        assert!(matches!(
            reg.get_as::<u64>(e, hp),
            Err(EcsError::TypeMismatch { .. })
        ));
        assert!(matches!(
            reg.set(e, hp, 1u8),
            Err(EcsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn destructor_cascades_destruction() {
        fn destroy_target(element: &mut [u8], queue: &mut DestroyQueue) {
            queue.destroy_entity(*bytemuck::from_bytes::<EntityId>(element));
        }
        let mut reg = Registry::new("test");
        let owns = reg
            .register(ComponentDescriptor::of::<EntityId>("owns").with_destruct(destroy_target))
            .unwrap();
        let parent = reg.create_entity().unwrap();
        let child = reg.create_entity().unwrap();
        let grandchild = reg.create_entity().unwrap();
        reg.set(parent, owns, child).unwrap();
        reg.set(child, owns, grandchild).unwrap();

        reg.destroy_entity(parent).unwrap();
        assert!(!reg.is_alive(child));
        assert!(!reg.is_alive(grandchild));
        assert_eq!(reg.entity_count(), 0);
        assert!(reg.pool(owns).unwrap().is_empty());
    }

    #[test]
    fn range_id_callback_places_elements() {
        fn range_from_sibling(reg: &Registry, entity: EntityId, component: ComponentId) -> Option<RangeId> {
            let owner = reg.component_id("owner").ok()?;
            debug_assert_ne!(owner, component);
            reg.get_as::<RangeId>(entity, owner).ok().copied()
        }
        let mut reg = Registry::new("test");
        let owner = reg.register_type::<RangeId>("owner").unwrap();
        let item = reg
            .register(ComponentDescriptor::of::<u32>("item").with_range_id(range_from_sibling))
            .unwrap();
        let r1 = reg.new_range(item).unwrap();
        let r2 = reg.new_range(item).unwrap();

        let mut make = |range: RangeId, value: u32| {
            let e = reg.create_entity().unwrap();
            reg.set(e, owner, range).unwrap();
            reg.set(e, item, value).unwrap();
            e
        };
        let a = make(r1, 1);
        let b = make(r2, 2);
        let c = make(r1, 3);

        assert_eq!(reg.range(r1).unwrap(), 0..2);
        assert_eq!(reg.range(r2).unwrap(), 2..3);
        assert_eq!(reg.range_of(c, item).unwrap(), Some(r1));
        assert_eq!(reg.range_of(b, item).unwrap(), Some(r2));
        let in_r1: Vec<EntityId> = reg.iter_range(r1).unwrap().map(|(e, _)| e).collect();
        assert_eq!(in_r1, vec![a, c]);

        let d = reg.create_entity().unwrap();
        reg.set(d, owner, r2).unwrap();
        assert!(matches!(
            reg.attach_to_range(r1, d),
            Err(EcsError::RangeMismatch { resolved: Some(r), .. }) if r == r2
        ));
        assert!(!reg.has(d, item));
        reg.attach_to_range(r2, d).unwrap();
        assert_eq!(reg.range_of(d, item).unwrap(), Some(r2));
        assert_eq!(reg.range(r2).unwrap(), 2..4);
    }

    #[test]
    fn range_of_without_callback_uses_bounds() {
        let mut reg = Registry::new("test");
        let item = reg.register_type::<u32>("item").unwrap();
        let r = reg.new_range(item).unwrap();
        let inside = reg.create_entity().unwrap();
        let outside = reg.create_entity().unwrap();
        reg.attach_to_range(r, inside).unwrap();
        reg.attach(outside, item).unwrap();
        assert_eq!(reg.range_of(inside, item).unwrap(), Some(r));
        assert_eq!(reg.range_of(outside, item).unwrap(), None);
    }

    #[test]
    fn destroying_node_destroys_descendants() {
        let mut reg = Registry::new("test");
        let root = reg.create_entity().unwrap();
        let a = reg.create_entity().unwrap();
        let b = reg.create_entity().unwrap();
        let keep = reg.create_entity().unwrap();
        let h = reg.new_hierarchy(root).unwrap();
        let ai = reg.insert(h, 0, a).unwrap();
        reg.insert(h, ai, b).unwrap();
        reg.insert(h, 0, keep).unwrap();

        reg.destroy_entity(a).unwrap();
        assert!(!reg.is_alive(b));
        assert!(reg.is_alive(keep));
        assert_eq!(reg.hierarchy_of(keep), Some((h, 1)));
        assert_eq!(reg.hierarchy_of(b), None);
    }

    #[test]
    fn node_membership_is_exclusive() {
        let mut reg = Registry::new("test");
        let root = reg.create_entity().unwrap();
        let other = reg.create_entity().unwrap();
        let h = reg.new_hierarchy(root).unwrap();
        assert!(matches!(
            reg.insert(h, 0, root),
            Err(EcsError::AlreadyInHierarchy { .. })
        ));
        reg.insert(h, 0, other).unwrap();
        assert!(matches!(
            reg.new_hierarchy(other),
            Err(EcsError::AlreadyInHierarchy { .. })
        ));
    }

    #[test]
    fn reparent_updates_membership() {
        let mut reg = Registry::new("test");
        let [r1, r2, a, b] = [(); 4].map(|_| reg.create_entity().unwrap());
        let h1 = reg.new_hierarchy(r1).unwrap();
        let h2 = reg.new_hierarchy(r2).unwrap();
        let ai = reg.insert(h1, 0, a).unwrap();
        reg.insert(h1, ai, b).unwrap();
        reg.reparent(h1, ai, Some((h2, 0))).unwrap();
        assert_eq!(reg.hierarchy_of(a), Some((h2, 1)));
        assert_eq!(reg.hierarchy_of(b), Some((h2, 2)));

        let (split, index) = reg.reparent(h2, 1, None).unwrap();
        assert_eq!(index, 0);
        assert_eq!(reg.hierarchy_of(b), Some((split, 1)));
    }

    #[test]
    fn reparent_across_kinds_rejected() {
        let mut reg = Registry::new("test");
        let text = reg
            .define_hierarchy_kind("text", &[ComponentDescriptor::of::<u32>("offset")])
            .unwrap();
        let [r1, r2] = [(); 2].map(|_| reg.create_entity().unwrap());
        let h1 = reg.new_hierarchy(r1).unwrap();
        let h2 = reg.new_hierarchy_of_kind(text, r2).unwrap();
        assert!(matches!(
            reg.reparent(h1, 0, Some((h2, 0))),
            Err(EcsError::HierarchyKindMismatch { .. })
        ));
    }

    #[test]
    fn drop_runs_remaining_destructors() {
        static DROPPED: AtomicUsize = AtomicUsize::new(0);
        fn count(_element: &mut [u8], _queue: &mut DestroyQueue) {
            DROPPED.fetch_add(1, AtomicOrdering::SeqCst);
        }
        {
            let mut reg = Registry::new("test");
            let c = reg
                .register(ComponentDescriptor::of::<u32>("counted").with_destruct(count))
                .unwrap();
            for _ in 0..3 {
                let e = reg.create_entity().unwrap();
                reg.attach(e, c).unwrap();
            }
        }
        assert_eq!(DROPPED.load(AtomicOrdering::SeqCst), 3);
    }
}
