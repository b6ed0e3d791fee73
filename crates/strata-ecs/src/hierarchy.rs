//! Flat, arena-backed trees of entities.
//!
//! A [`HierarchyStore`] holds every hierarchy of one [`HierarchyKind`]. All of
//! them share the same parallel node arrays (`ent`, `parent`, `child_count`,
//! `descendants`, plus one payload array per payload descriptor of the kind),
//! partitioned into one contiguous block per hierarchy by a
//! [`Subpool`](crate::subpool::Subpool).
//!
//! Within a hierarchy nodes are stored in pre-order and addressed by their
//! local index; node 0 is the root. A node's subtree is the contiguous span
//! `[i, i + descendants[i] + 1)`, its first child is `i + 1` and the sibling
//! after child `c` is `c + descendants[c] + 1`. Parent links hold local
//! indices, so moving a whole hierarchy block never touches them.

use std::fmt;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{ComponentDescriptor, DestroyQueue};
use crate::config::round_up;
use crate::element::{reserve_or_abort, rotate_block, rotated_index, ComponentArray};
use crate::entity::{EntityId, Handle, Slot};
use crate::subpool::Subpool;
use crate::EcsError;

/// Parent link of a root node.
pub const NO_PARENT: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifies a hierarchy kind: a name plus a fixed set of payload components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Pod, Zeroable)]
#[repr(transparent)]
pub struct HierarchyKind(pub(crate) u32);

impl HierarchyKind {
    /// Position of the kind in its registry.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for HierarchyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HierarchyKind({})", self.0)
    }
}

/// Identifies one hierarchy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct HierarchyId {
    /// Store holding the hierarchy.
    pub kind: HierarchyKind,
    /// Generational slot within the store.
    pub slot: Slot,
}

impl fmt::Debug for HierarchyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HierarchyId({}:{}v{})",
            self.kind.0,
            self.slot.index(),
            self.slot.generation()
        )
    }
}

// ---------------------------------------------------------------------------
// Children
// ---------------------------------------------------------------------------

/// Local indices of a node's direct children, in order.
#[derive(Debug, Clone)]
pub struct Children<'a> {
    descendants: &'a [u32],
    next: usize,
    remaining: usize,
}

impl Iterator for Children<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let child = self.next;
        self.next = child + self.descendants[child] as usize + 1;
        self.remaining -= 1;
        Some(child)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Children<'_> {}

// ---------------------------------------------------------------------------
// HierarchyStore
// ---------------------------------------------------------------------------

/// Every hierarchy of one kind, in shared flat arrays.
///
/// Nodes sit in pre-order, so a node's children are not contiguous: each
/// child is followed by its own descendants. Keeping whole subtrees
/// contiguous instead makes removal and reparenting a single block move, and
/// [`children`](Self::children) walks siblings by skipping `descendants`.
#[derive(Debug)]
pub struct HierarchyStore {
    kind: HierarchyKind,
    name: String,
    payload_desc: Vec<ComponentDescriptor>,
    ent: Vec<EntityId>,
    parent: Vec<u32>,
    child_count: Vec<u32>,
    descendants: Vec<u32>,
    payload: Vec<ComponentArray>,
    trees: Subpool,
    grow: u32,
}

impl HierarchyStore {
    /// Create an empty store. `grow` is the node-count granularity of the
    /// backing arrays and of the hierarchy table.
    pub fn new(
        kind: HierarchyKind,
        name: &str,
        payload: Vec<ComponentDescriptor>,
        grow: u32,
    ) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            payload: payload.iter().map(ComponentArray::for_descriptor).collect(),
            payload_desc: payload,
            ent: Vec::new(),
            parent: Vec::new(),
            child_count: Vec::new(),
            descendants: Vec::new(),
            trees: Subpool::new(grow),
            grow,
        }
    }

    /// Kind of every hierarchy in this store.
    pub fn kind(&self) -> HierarchyKind {
        self.kind
    }

    /// Display name of the kind.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload descriptors, in payload-index order.
    pub fn payload_descriptors(&self) -> &[ComponentDescriptor] {
        &self.payload_desc
    }

    /// Total nodes across all hierarchies.
    pub fn node_count(&self) -> usize {
        self.ent.len()
    }

    /// Number of live hierarchies.
    pub fn hierarchy_count(&self) -> usize {
        self.trees.len()
    }

    /// Every live hierarchy with its span in the shared arrays.
    pub fn hierarchies(&self) -> impl Iterator<Item = (HierarchyId, Range<usize>)> + '_ {
        self.trees
            .iter()
            .map(move |(slot, span)| (self.id(slot), span))
    }

    /// Owning entity of every node, in shared-array order.
    pub fn all_entities(&self) -> &[EntityId] {
        &self.ent
    }

    /// Parent link of every node, in shared-array order.
    pub fn all_parents(&self) -> &[u32] {
        &self.parent
    }

    /// Child count of every node, in shared-array order.
    pub fn all_child_counts(&self) -> &[u32] {
        &self.child_count
    }

    /// Descendant count of every node, in shared-array order.
    pub fn all_descendants(&self) -> &[u32] {
        &self.descendants
    }

    /// Payload arrays, in payload-index order.
    pub fn payload_arrays(&self) -> &[ComponentArray] {
        &self.payload
    }

    /// Whether `id` names a live hierarchy of this store.
    pub fn contains(&self, id: HierarchyId) -> bool {
        id.kind == self.kind && self.trees.is_live(id.slot)
    }

    fn id(&self, slot: Slot) -> HierarchyId {
        HierarchyId {
            kind: self.kind,
            slot,
        }
    }

    fn locate(&self, id: HierarchyId) -> Result<(usize, Range<usize>), EcsError> {
        if id.kind != self.kind {
            return Err(EcsError::HierarchyKindMismatch {
                expected: self.kind,
                found: id.kind,
            });
        }
        let position = self
            .trees
            .position(id.slot)
            .ok_or(EcsError::StaleHierarchy { hierarchy: id })?;
        Ok((position, self.trees.bounds_at(position)))
    }

    fn locate_node(
        &self,
        id: HierarchyId,
        index: usize,
    ) -> Result<(usize, Range<usize>), EcsError> {
        let (position, span) = self.locate(id)?;
        if index >= span.len() {
            return Err(EcsError::NodeOutOfBounds {
                hierarchy: id,
                index,
                len: span.len(),
            });
        }
        Ok((position, span))
    }

    // -- queries ------------------------------------------------------------

    /// Number of nodes in a hierarchy.
    pub fn len(&self, id: HierarchyId) -> Result<usize, EcsError> {
        Ok(self.locate(id)?.1.len())
    }

    /// Owning entities of a hierarchy's nodes, in pre-order.
    pub fn entities(&self, id: HierarchyId) -> Result<&[EntityId], EcsError> {
        let (_, span) = self.locate(id)?;
        Ok(&self.ent[span])
    }

    /// Owning entity of a node.
    pub fn entity(&self, id: HierarchyId, index: usize) -> Result<EntityId, EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        Ok(self.ent[span.start + index])
    }

    /// Parent of a node, `None` for the root.
    pub fn parent(&self, id: HierarchyId, index: usize) -> Result<Option<usize>, EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        let parent = self.parent[span.start + index];
        Ok((parent != NO_PARENT).then_some(parent as usize))
    }

    /// Number of direct children of a node.
    pub fn child_count(&self, id: HierarchyId, index: usize) -> Result<usize, EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        Ok(self.child_count[span.start + index] as usize)
    }

    /// Local span covered by a node and all of its descendants.
    pub fn subtree(&self, id: HierarchyId, index: usize) -> Result<Range<usize>, EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        Ok(index..index + self.descendants[span.start + index] as usize + 1)
    }

    /// Direct children of a node.
    pub fn children(&self, id: HierarchyId, index: usize) -> Result<Children<'_>, EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        Ok(Children {
            remaining: self.child_count[span.start + index] as usize,
            descendants: &self.descendants[span],
            next: index + 1,
        })
    }

    /// Local index of `entity`'s node, if it belongs to this hierarchy.
    pub fn find(&self, id: HierarchyId, entity: EntityId) -> Result<Option<usize>, EcsError> {
        let (_, span) = self.locate(id)?;
        Ok(self.ent[span].iter().position(|&e| e == entity))
    }

    /// Payload bytes of a node.
    pub fn payload(&self, id: HierarchyId, payload: usize, index: usize) -> Result<&[u8], EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        let array = self.payload.get(payload).ok_or_else(|| EcsError::UnknownPayload {
            hierarchy: self.name.clone(),
            payload,
        })?;
        Ok(array.element(span.start + index))
    }

    /// Payload bytes of a node, mutably.
    pub fn payload_mut(
        &mut self,
        id: HierarchyId,
        payload: usize,
        index: usize,
    ) -> Result<&mut [u8], EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        let name = &self.name;
        let array = self
            .payload
            .get_mut(payload)
            .ok_or_else(|| EcsError::UnknownPayload {
                hierarchy: name.clone(),
                payload,
            })?;
        Ok(array.element_mut(span.start + index))
    }

    // -- mutation -----------------------------------------------------------

    /// Start a new hierarchy whose root node is owned by `root`.
    pub fn new_hierarchy(&mut self, root: EntityId) -> Result<HierarchyId, EcsError> {
        let slot = self.trees.allocate().ok_or(EcsError::IdsExhausted {
            what: "hierarchy",
        })?;
        let position = self.trees.len() - 1;
        self.push_node(root, NO_PARENT);
        self.trees.shift_ends(position, 1);
        let id = self.id(slot);
        debug!(hierarchy = ?id, kind = %self.name, ?root, "hierarchy created");
        Ok(id)
    }

    /// Add `entity` as the last child of `parent`, returning its local index.
    pub fn insert(
        &mut self,
        id: HierarchyId,
        parent: usize,
        entity: EntityId,
    ) -> Result<usize, EcsError> {
        let (position, span) = self.locate_node(id, parent)?;
        let start = span.start;
        let local = parent + self.descendants[start + parent] as usize + 1;

        let tail = self.push_node(entity, parent as u32);
        self.rotate_nodes(start + local, tail, 1);
        for link in &mut self.parent[start + local + 1..span.end + 1] {
            if *link != NO_PARENT && *link as usize >= local {
                *link += 1;
            }
        }
        self.child_count[start + parent] += 1;
        self.adjust_ancestors(start, parent, 1);
        self.trees.shift_ends(position, 1);
        Ok(local)
    }

    /// Remove a node and its whole subtree, returning the removed entities in
    /// pre-order. Removing the root deletes the hierarchy.
    pub fn remove_subtree(
        &mut self,
        id: HierarchyId,
        index: usize,
        queue: &mut DestroyQueue,
    ) -> Result<Vec<EntityId>, EcsError> {
        let (position, span) = self.locate_node(id, index)?;
        if index == 0 {
            return self.delete_hierarchy(id, queue);
        }
        let start = span.start;
        let count = self.descendants[start + index] as usize + 1;
        let parent = self.parent[start + index] as usize;
        self.child_count[start + parent] -= 1;
        self.adjust_ancestors(start, parent, -(count as isize));

        let removed = self.drain_nodes(start + index..start + index + count, queue);
        for link in &mut self.parent[start + index..span.end - count] {
            if *link != NO_PARENT && *link as usize >= index + count {
                *link -= count as u32;
            }
        }
        self.trees.shift_ends(position, -(count as isize));
        Ok(removed)
    }

    /// Remove every node of a hierarchy and retire its id, returning the
    /// removed entities in pre-order.
    pub fn delete_hierarchy(
        &mut self,
        id: HierarchyId,
        queue: &mut DestroyQueue,
    ) -> Result<Vec<EntityId>, EcsError> {
        let (position, span) = self.locate(id)?;
        let count = span.len();
        let removed = self.drain_nodes(span, queue);
        self.trees.shift_ends(position, -(count as isize));
        self.trees.release(id.slot);
        debug!(hierarchy = ?id, nodes = count, "hierarchy deleted");
        Ok(removed)
    }

    /// Move the subtree at `index` under a new parent.
    ///
    /// `target` names the new parent as a hierarchy and local index; the
    /// subtree becomes that node's last child. With `None` the subtree is
    /// split off into a new hierarchy of its own. Returns where the subtree's
    /// root ended up. Moving a root into another hierarchy deletes the now
    /// empty source hierarchy.
    pub fn reparent(
        &mut self,
        id: HierarchyId,
        index: usize,
        target: Option<(HierarchyId, usize)>,
    ) -> Result<(HierarchyId, usize), EcsError> {
        let (_, span) = self.locate_node(id, index)?;
        match target {
            None if index == 0 => Ok((id, 0)),
            None => {
                let slot = self.trees.allocate().ok_or(EcsError::IdsExhausted {
                    what: "hierarchy",
                })?;
                let new_id = self.id(slot);
                self.transplant(id, index, new_id, None)?;
                debug!(from = ?id, to = ?new_id, "subtree split into new hierarchy");
                Ok((new_id, 0))
            }
            Some((dst, parent)) if dst == id => {
                self.locate_node(dst, parent)?;
                let count = self.descendants[span.start + index] as usize + 1;
                if (index..index + count).contains(&parent) {
                    return Err(EcsError::CyclicReparent {
                        hierarchy: id,
                        index,
                        parent,
                    });
                }
                Ok((id, self.move_within(span, index, count, parent)))
            }
            Some((dst, parent)) => {
                self.locate_node(dst, parent)?;
                let local = self.transplant(id, index, dst, Some(parent))?;
                if index == 0 {
                    self.trees.release(id.slot);
                }
                Ok((dst, local))
            }
        }
    }

    /// Check the structural invariants of one hierarchy, describing the first
    /// violation found.
    pub fn validate(&self, id: HierarchyId) -> Result<(), String> {
        let (_, span) = self.locate(id).map_err(|e| e.to_string())?;
        let n = span.len();
        let parent = &self.parent[span.clone()];
        let mut descendants = vec![0u32; n];
        let mut children = vec![0u32; n];
        for j in (0..n).rev() {
            if j == 0 {
                if parent[0] != NO_PARENT {
                    return Err("root has a parent".to_owned());
                }
                continue;
            }
            let p = parent[j] as usize;
            if parent[j] == NO_PARENT || p >= j {
                return Err(format!("node {j} has parent {} after it", parent[j]));
            }
            descendants[p] += descendants[j] + 1;
            children[p] += 1;
        }
        for j in 1..n {
            let p = parent[j] as usize;
            if p + (descendants[p] as usize) < j {
                return Err(format!("node {j} lies outside its parent's span"));
            }
        }
        if descendants[..] != self.descendants[span.clone()] {
            return Err("descendant counts out of date".to_owned());
        }
        if children[..] != self.child_count[span] {
            return Err("child counts out of date".to_owned());
        }
        Ok(())
    }

    /// Destroy every node's payload and forget every hierarchy.
    pub(crate) fn clear(&mut self, queue: &mut DestroyQueue) {
        for (array, desc) in self.payload.iter_mut().zip(&self.payload_desc) {
            array.destroy_elements(desc, 0, array.len(), queue);
            array.clear();
        }
        self.ent.clear();
        self.parent.clear();
        self.child_count.clear();
        self.descendants.clear();
        self.trees = Subpool::new(self.grow);
    }

    // -- internals ----------------------------------------------------------

    fn push_node(&mut self, entity: EntityId, parent: u32) -> usize {
        let index = self.ent.len();
        if index == self.ent.capacity() {
            let additional = round_up(index + 1, self.grow) - index;
            reserve_or_abort(&mut self.ent, additional, "hierarchy entities");
            reserve_or_abort(&mut self.parent, additional, "hierarchy parents");
            reserve_or_abort(&mut self.child_count, additional, "hierarchy child counts");
            reserve_or_abort(&mut self.descendants, additional, "hierarchy descendants");
            for array in &mut self.payload {
                array.reserve(additional);
            }
        }
        self.ent.push(entity);
        self.parent.push(parent);
        self.child_count.push(0);
        self.descendants.push(0);
        for (array, desc) in self.payload.iter_mut().zip(&self.payload_desc) {
            array.resize(index + 1);
            array.create_elements(desc, index, 1);
        }
        index
    }

    fn rotate_nodes(&mut self, dst: usize, src: usize, count: usize) {
        rotate_block(&mut self.ent, dst, src, count);
        rotate_block(&mut self.parent, dst, src, count);
        rotate_block(&mut self.child_count, dst, src, count);
        rotate_block(&mut self.descendants, dst, src, count);
        for array in &mut self.payload {
            array.rotate_elements(dst, src, count);
        }
    }

    fn drain_nodes(&mut self, span: Range<usize>, queue: &mut DestroyQueue) -> Vec<EntityId> {
        let len = self.ent.len();
        for (array, desc) in self.payload.iter_mut().zip(&self.payload_desc) {
            array.destroy_elements(desc, span.start, span.len(), queue);
            array.move_elements(span.start, span.end, len - span.end);
            array.resize(len - span.len());
        }
        self.parent.drain(span.clone());
        self.child_count.drain(span.clone());
        self.descendants.drain(span.clone());
        self.ent.drain(span).collect()
    }

    /// Add `delta` to the descendant count of `node` and all its ancestors.
    fn adjust_ancestors(&mut self, start: usize, mut node: usize, delta: isize) {
        loop {
            let d = &mut self.descendants[start + node];
            *d = (*d as isize + delta) as u32;
            let parent = self.parent[start + node];
            if parent == NO_PARENT {
                break;
            }
            node = parent as usize;
        }
    }

    /// Reparent within one hierarchy: a single rotate over every node array,
    /// then a remap of the parent links.
    fn move_within(
        &mut self,
        span: Range<usize>,
        index: usize,
        count: usize,
        parent: usize,
    ) -> usize {
        let start = span.start;
        let old_parent = self.parent[start + index] as usize;
        self.child_count[start + old_parent] -= 1;
        self.adjust_ancestors(start, old_parent, -(count as isize));

        // Insertion point as if the subtree had already been taken out.
        let parent_without = if parent < index { parent } else { parent - count };
        let dst = parent_without + self.descendants[start + parent] as usize + 1;
        self.rotate_nodes(start + dst, start + index, count);

        for link in &mut self.parent[span] {
            if *link != NO_PARENT {
                *link = rotated_index(*link as usize, dst, index, count) as u32;
            }
        }
        let new_parent = rotated_index(parent, dst, index, count);
        self.parent[start + dst] = new_parent as u32;
        self.child_count[start + new_parent] += 1;
        self.adjust_ancestors(start, new_parent, count as isize);
        dst
    }

    /// Move the subtree at `index` of `src` into `dst`, under `parent` or as
    /// the root of an empty `dst`. Returns the subtree root's new local index.
    fn transplant(
        &mut self,
        src: HierarchyId,
        index: usize,
        dst: HierarchyId,
        parent: Option<usize>,
    ) -> Result<usize, EcsError> {
        let (src_pos, src_span) = self.locate(src)?;
        let (dst_pos, dst_span) = self.locate(dst)?;
        let sa = src_span.start;
        let count = self.descendants[sa + index] as usize + 1;

        // Unlink from the source hierarchy.
        if index != 0 {
            let old_parent = self.parent[sa + index] as usize;
            self.child_count[sa + old_parent] -= 1;
            self.adjust_ancestors(sa, old_parent, -(count as isize));
        }
        for link in &mut self.parent[sa + index + count..src_span.end] {
            if *link != NO_PARENT && *link as usize >= index + count {
                *link -= count as u32;
            }
        }

        // Link into the destination hierarchy.
        let sd = dst_span.start;
        let local = match parent {
            Some(p) => p + self.descendants[sd + p] as usize + 1,
            None => 0,
        };
        for link in &mut self.parent[sd + local..dst_span.end] {
            if *link != NO_PARENT && *link as usize >= local {
                *link += count as u32;
            }
        }
        for link in &mut self.parent[sa + index + 1..sa + index + count] {
            *link = (*link as usize - index + local) as u32;
        }
        self.parent[sa + index] = parent.map_or(NO_PARENT, |p| p as u32);
        if let Some(p) = parent {
            self.child_count[sd + p] += 1;
            self.adjust_ancestors(sd, p, count as isize);
        }

        let from = sa + index;
        let to = sd + local;
        let dst_index = if to > from { to - count } else { to };
        self.rotate_nodes(dst_index, from, count);
        self.trees.shift_ends(src_pos, -(count as isize));
        self.trees.shift_ends(dst_pos, count as isize);
        Ok(local)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
