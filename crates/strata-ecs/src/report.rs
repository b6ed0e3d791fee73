//! Diagnostics: structured dumps of a registry and a content hash.
//!
//! Reports are plain serde structs so they can be logged, diffed or written
//! out as JSON. [`Registry::content_hash`] condenses the full storage layout
//! (dense order, element bytes, range and hierarchy tables) into one BLAKE3
//! digest, which makes it cheap to assert that two mutation sequences produce
//! identical state.

use serde::{Deserialize, Serialize};

use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::hierarchy::{HierarchyId, HierarchyKind};
use crate::registry::Registry;
use crate::subpool::RangeId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Summary of a whole registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryReport {
    pub name: String,
    pub entities: usize,
    pub components: Vec<ComponentReport>,
    pub hierarchy_kinds: Vec<HierarchyKindReport>,
}

/// One component pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub id: ComponentId,
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub count: usize,
    /// Elements past the last range.
    pub unassigned: usize,
    pub ranges: Vec<RangeReport>,
}

/// One range, with its dense bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeReport {
    pub range: RangeId,
    pub start: usize,
    pub end: usize,
}

/// One hierarchy kind and its hierarchies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyKindReport {
    pub kind: HierarchyKind,
    pub name: String,
    pub payloads: Vec<String>,
    pub hierarchies: Vec<HierarchyReport>,
}

/// One hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyReport {
    pub hierarchy: HierarchyId,
    pub root: EntityId,
    pub nodes: usize,
}

/// Everything the registry knows about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: EntityId,
    /// Names of the attached components, in component-id order.
    pub components: Vec<String>,
    /// Ranges holding the entity's elements.
    pub ranges: Vec<RangeId>,
    pub node: Option<NodeReport>,
}

/// An entity's place in its hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub hierarchy: HierarchyId,
    pub index: usize,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
}

impl RegistryReport {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl EntityReport {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Registry diagnostics
// ---------------------------------------------------------------------------

impl Registry {
    /// Summarise every pool, range and hierarchy.
    pub fn report(&self) -> RegistryReport {
        let components = self
            .pools()
            .iter()
            .map(|pool| {
                let desc = pool.descriptor();
                ComponentReport {
                    id: pool.id(),
                    name: desc.name.clone(),
                    size: desc.size,
                    align: desc.align,
                    count: pool.len(),
                    unassigned: pool.unassigned(),
                    ranges: pool
                        .ranges()
                        .map(|(range, bounds)| RangeReport {
                            range,
                            start: bounds.start,
                            end: bounds.end,
                        })
                        .collect(),
                }
            })
            .collect();

        let hierarchy_kinds = self
            .hierarchy_stores()
            .iter()
            .map(|store| HierarchyKindReport {
                kind: store.kind(),
                name: store.name().to_owned(),
                payloads: store
                    .payload_descriptors()
                    .iter()
                    .map(|d| d.name.clone())
                    .collect(),
                hierarchies: store
                    .hierarchies()
                    .map(|(hierarchy, span)| HierarchyReport {
                        hierarchy,
                        root: store.all_entities()[span.start],
                        nodes: span.len(),
                    })
                    .collect(),
            })
            .collect();

        RegistryReport {
            name: self.name().to_owned(),
            entities: self.entity_count(),
            components,
            hierarchy_kinds,
        }
    }

    /// Describe one live entity.
    pub fn entity_report(&self, entity: EntityId) -> Result<EntityReport, EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        let mut components = Vec::new();
        let mut ranges = Vec::new();
        for pool in self.pools() {
            if let Some(index) = pool.index_of(entity) {
                components.push(pool.descriptor().name.clone());
                ranges.extend(pool.range_of_index(index));
            }
        }

        let node = match self.hierarchy_of(entity) {
            Some((hierarchy, index)) => {
                let store = self.hierarchy_store(hierarchy.kind)?;
                let parent = match store.parent(hierarchy, index)? {
                    Some(p) => Some(store.entity(hierarchy, p)?),
                    None => None,
                };
                let children = store
                    .children(hierarchy, index)?
                    .map(|c| store.entity(hierarchy, c))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(NodeReport {
                    hierarchy,
                    index,
                    parent,
                    children,
                })
            }
            None => None,
        };

        Ok(EntityReport {
            entity,
            components,
            ranges,
            node,
        })
    }

    /// BLAKE3 hex digest of the complete storage layout.
    ///
    /// Two registries that went through the same sequence of operations hash
    /// identically; any difference in element bytes, dense order, range
    /// bounds or tree shape changes the digest.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.entity_count() as u64).to_le_bytes());
        for entity in self.entities() {
            hasher.update(&entity.to_raw().to_le_bytes());
        }

        for pool in self.pools() {
            hasher.update(pool.descriptor().name.as_bytes());
            hasher.update(&(pool.len() as u64).to_le_bytes());
            for entity in pool.entities() {
                hasher.update(&entity.to_raw().to_le_bytes());
            }
            hasher.update(pool.data().bytes());
            for (range, bounds) in pool.ranges() {
                hasher.update(bytemuck::bytes_of(&range));
                hasher.update(&(bounds.end as u64).to_le_bytes());
            }
        }

        for store in self.hierarchy_stores() {
            hasher.update(store.name().as_bytes());
            for (hierarchy, span) in store.hierarchies() {
                hasher.update(bytemuck::bytes_of(&hierarchy));
                hasher.update(&(span.end as u64).to_le_bytes());
            }
            hasher.update(bytemuck::cast_slice(store.all_entities()));
            hasher.update(bytemuck::cast_slice(store.all_parents()));
            hasher.update(bytemuck::cast_slice(store.all_child_counts()));
            hasher.update(bytemuck::cast_slice(store.all_descendants()));
            for payload in store.payload_arrays() {
                hasher.update(payload.bytes());
            }
        }

        hasher.finalize().to_hex().to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDescriptor;

    fn populated() -> Registry {
        let mut reg = Registry::new("scene");
        let pos = reg.register_type::<[f32; 2]>("position").unwrap();
        let tag = reg.register_type::<u8>("tag").unwrap();
        let r = reg.new_range(pos).unwrap();
        let root = reg.create_entity().unwrap();
        let child = reg.create_entity().unwrap();
        reg.attach_to_range(r, root).unwrap();
        reg.set(child, pos, [1.0f32, 2.0]).unwrap();
        reg.set(child, tag, 7u8).unwrap();
        let h = reg.new_hierarchy(root).unwrap();
        reg.insert(h, 0, child).unwrap();
        reg
    }

    #[test]
    fn registry_report_lists_pools_and_trees() {
        let reg = populated();
        let report = reg.report();
        assert_eq!(report.entities, 2);
        assert_eq!(report.components.len(), 2);
        assert_eq!(report.components[0].count, 2);
        assert_eq!(report.components[0].unassigned, 1);
        assert_eq!(report.components[0].ranges.len(), 1);
        assert_eq!(report.hierarchy_kinds[0].hierarchies[0].nodes, 2);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"position\""));
    }

    #[test]
    fn entity_report_describes_node() {
        let reg = populated();
        let child = reg.entities().nth(1).unwrap();
        let report = reg.entity_report(child).unwrap();
        assert_eq!(report.components, vec!["position", "tag"]);
        assert!(report.ranges.is_empty());
        let node = report.node.unwrap();
        assert_eq!(node.index, 1);
        assert!(node.parent.is_some());
        assert!(node.children.is_empty());
    }

    #[test]
    fn hash_is_deterministic_and_sensitive() {
        let a = populated();
        let mut b = populated();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);

        let tag = b.component_id("tag").unwrap();
        let child = b.entities().nth(1).unwrap();
        b.set(child, tag, 8u8).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    fn labelled(label: u32) -> Registry {
        let mut reg = Registry::new("scene");
        let kind = reg
            .define_hierarchy_kind("outline", &[ComponentDescriptor::of::<u32>("label")])
            .unwrap();
        let root = reg.create_entity().unwrap();
        let child = reg.create_entity().unwrap();
        let h = reg.new_hierarchy_of_kind(kind, root).unwrap();
        let index = reg.insert(h, 0, child).unwrap();
        reg.hierarchy_payload_mut(h, 0, index)
            .unwrap()
            .copy_from_slice(&label.to_ne_bytes());
        reg
    }

    #[test]
    fn hash_covers_hierarchy_payload() {
        assert_eq!(labelled(1).content_hash(), labelled(1).content_hash());
        assert_ne!(labelled(1).content_hash(), labelled(2).content_hash());
    }
}
