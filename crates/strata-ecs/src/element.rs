//! Type-erased element storage and the primitive element algorithms.
//!
//! A [`ComponentArray`] is an owned, contiguous run of fixed-size elements
//! stored as raw bytes. Its backing buffer is built from `u64` words so every
//! element of a validated [`ComponentDescriptor`] (alignment at most 8, size a
//! multiple of the alignment) starts on a correctly aligned address, which
//! lets the typed accessors hand out `&T` through `bytemuck` without any
//! unsafe code.
//!
//! The algorithms here trust their arguments. Index and count validation is
//! done once, at the pool / range / hierarchy boundary.

use crate::component::{ComponentDescriptor, DestroyQueue};

// ---------------------------------------------------------------------------
// rotate_block -- the block relocation primitive
// ---------------------------------------------------------------------------

/// Move the `count`-element block at `src` so that it starts at `dst`,
/// shifting the elements between the two positions (the "bridge") to close
/// the gap the block leaves and open the one it needs.
///
/// Only the span covering both the block and the bridge is touched, and only
/// the smaller of the two is staged through a scratch buffer.
pub fn rotate_block<T: Copy>(slice: &mut [T], dst: usize, src: usize, count: usize) {
    if dst == src || count == 0 {
        return;
    }
    debug_assert!(src + count <= slice.len() && dst + count <= slice.len());

    if dst < src {
        // Block moves left; bridge [dst, src) moves right by `count`.
        let bridge = src - dst;
        if count <= bridge {
            let block = slice[src..src + count].to_vec();
            slice.copy_within(dst..src, dst + count);
            slice[dst..dst + count].copy_from_slice(&block);
        } else {
            let saved = slice[dst..src].to_vec();
            slice.copy_within(src..src + count, dst);
            slice[dst + count..src + count].copy_from_slice(&saved);
        }
    } else {
        // Block moves right; bridge [src + count, dst + count) moves left.
        let bridge = dst - src;
        if count <= bridge {
            let block = slice[src..src + count].to_vec();
            slice.copy_within(src + count..dst + count, src);
            slice[dst..dst + count].copy_from_slice(&block);
        } else {
            // dst lands inside the block: only the short bridge is staged.
            let saved = slice[src + count..dst + count].to_vec();
            slice.copy_within(src..src + count, dst);
            slice[src..dst].copy_from_slice(&saved);
        }
    }
}

/// Where the element that sat at `index` ends up after
/// `rotate_block(_, dst, src, count)`.
pub fn rotated_index(index: usize, dst: usize, src: usize, count: usize) -> usize {
    if index >= src && index < src + count {
        index - src + dst
    } else if dst < src && index >= dst && index < src {
        index + count
    } else if dst > src && index >= src + count && index < dst + count {
        index - count
    } else {
        index
    }
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Reserve room for exactly `additional` more items, terminating the process
/// if the allocation cannot be satisfied.
pub(crate) fn reserve_or_abort<T>(vec: &mut Vec<T>, additional: usize, what: &str) {
    if let Err(err) = vec.try_reserve_exact(additional) {
        tracing::error!(%err, what, len = vec.len(), additional, "allocation failed");
        std::process::abort();
    }
}

// ---------------------------------------------------------------------------
// ComponentArray
// ---------------------------------------------------------------------------

/// An owned, 8-byte aligned array of `len` elements of `size` bytes each.
#[derive(Clone)]
pub struct ComponentArray {
    words: Vec<u64>,
    len: usize,
    size: usize,
}

impl ComponentArray {
    /// Create an empty array of `size`-byte elements.
    pub fn new(size: usize) -> Self {
        Self {
            words: Vec::new(),
            len: 0,
            size,
        }
    }

    /// Create an empty array laid out for `desc`.
    pub fn for_descriptor(desc: &ComponentDescriptor) -> Self {
        Self::new(desc.size)
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of one element in bytes.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.size
    }

    /// Number of elements the current allocation can hold.
    pub fn capacity(&self) -> usize {
        if self.size == 0 {
            usize::MAX
        } else {
            self.words.capacity() * 8 / self.size
        }
    }

    #[inline]
    fn words_for(&self, count: usize) -> usize {
        (count * self.size).div_ceil(8)
    }

    fn reserve_words(&mut self, total_words: usize) {
        let additional = total_words.saturating_sub(self.words.len());
        reserve_or_abort(&mut self.words, additional, "component array");
    }

    /// Make room for `additional` more elements without changing `len`.
    ///
    /// Allocation failure terminates the process.
    pub fn reserve(&mut self, additional: usize) {
        let total = self.words_for(self.len + additional);
        if total > self.words.capacity() {
            self.reserve_words(total);
        }
    }

    /// Resize to exactly `new_len` elements.
    ///
    /// The bytes of the first `min(len, new_len)` elements are preserved and
    /// any new elements are zero-filled. Allocation failure terminates the
    /// process.
    pub fn resize(&mut self, new_len: usize) {
        let old_len = self.len;
        let total = self.words_for(new_len);
        if total > self.words.capacity() {
            self.reserve_words(total);
        }
        self.words.resize(total, 0);
        self.len = new_len;
        if new_len > old_len {
            // The last word of a shrunk array may still hold stale bytes.
            let start = old_len * self.size;
            self.bytes_mut()[start..].fill(0);
        }
    }

    /// Drop every element's bytes and release the allocation.
    pub fn clear(&mut self) {
        self.words = Vec::new();
        self.len = 0;
    }

    /// All element bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len * self.size]
    }

    /// All element bytes, mutably.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let end = self.len * self.size;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..end]
    }

    /// The bytes of `count` elements starting at `index`.
    #[inline]
    pub fn elements(&self, index: usize, count: usize) -> &[u8] {
        let start = index * self.size;
        &self.bytes()[start..start + count * self.size]
    }

    /// The bytes of `count` elements starting at `index`, mutably.
    #[inline]
    pub fn elements_mut(&mut self, index: usize, count: usize) -> &mut [u8] {
        let start = index * self.size;
        let size = self.size;
        &mut self.bytes_mut()[start..start + count * size]
    }

    /// The bytes of the element at `index`.
    #[inline]
    pub fn element(&self, index: usize) -> &[u8] {
        self.elements(index, 1)
    }

    /// The bytes of the element at `index`, mutably.
    #[inline]
    pub fn element_mut(&mut self, index: usize) -> &mut [u8] {
        self.elements_mut(index, 1)
    }

    // -- element algorithms -------------------------------------------------

    /// Copy `count` elements from `src` (a run of elements of this array's
    /// size, e.g. another array's [`bytes`](Self::bytes)) starting at element
    /// `src_index` into this array at `dst_index`.
    pub fn copy_elements(&mut self, dst_index: usize, src: &[u8], src_index: usize, count: usize) {
        let size = self.size;
        let from = &src[src_index * size..(src_index + count) * size];
        self.elements_mut(dst_index, count).copy_from_slice(from);
    }

    /// Move `count` elements from `src_index` to `dst_index` within this
    /// array. The ranges may overlap.
    pub fn move_elements(&mut self, dst_index: usize, src_index: usize, count: usize) {
        if count == 0 || dst_index == src_index {
            return;
        }
        let size = self.size;
        self.bytes_mut().copy_within(
            src_index * size..(src_index + count) * size,
            dst_index * size,
        );
    }

    /// Relocate the `count`-element block at `src_index` to `dst_index`,
    /// shifting the elements in between. See [`rotate_block`].
    pub fn rotate_elements(&mut self, dst_index: usize, src_index: usize, count: usize) {
        let size = self.size;
        rotate_block(self.bytes_mut(), dst_index * size, src_index * size, count * size);
    }

    /// Exchange the elements at `a` and `b`.
    pub fn swap_elements(&mut self, a: usize, b: usize) {
        if a == b || self.size == 0 {
            return;
        }
        let size = self.size;
        let (lo, hi) = (a.min(b), a.max(b));
        let (left, right) = self.bytes_mut().split_at_mut(hi * size);
        left[lo * size..(lo + 1) * size].swap_with_slice(&mut right[..size]);
    }

    /// Initialise `count` elements starting at `index`: zero-fill them, then
    /// run the descriptor's constructor on each. Returns `index`.
    pub fn create_elements(
        &mut self,
        desc: &ComponentDescriptor,
        index: usize,
        count: usize,
    ) -> usize {
        debug_assert_eq!(desc.size, self.size);
        self.elements_mut(index, count).fill(0);
        if let Some(construct) = desc.construct {
            for i in index..index + count {
                construct(self.element_mut(i));
            }
        }
        index
    }

    /// Run the descriptor's destructor on `count` elements starting at
    /// `index`. A descriptor without a destructor makes this a no-op.
    pub fn destroy_elements(
        &mut self,
        desc: &ComponentDescriptor,
        index: usize,
        count: usize,
        queue: &mut DestroyQueue,
    ) {
        debug_assert_eq!(desc.size, self.size);
        if let Some(destruct) = desc.destruct {
            for i in index..index + count {
                destruct(self.element_mut(i), queue);
            }
        }
    }
}

impl std::fmt::Debug for ComponentArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentArray")
            .field("len", &self.len)
            .field("capacity", &self.words.capacity())
            .field("element_size", &self.size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    fn u32_array(values: &[u32]) -> ComponentArray {
        let mut array = ComponentArray::new(4);
        array.resize(values.len());
        array.copy_elements(0, bytemuck::cast_slice(values), 0, values.len());
        array
    }

    fn contents(array: &ComponentArray) -> Vec<u32> {
        array
            .bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    // -- rotate -------------------------------------------------------------

    #[test]
    fn rotate_left_short_block() {
        let mut v = [0, 1, 2, 3, 4, 5, 6, 7];
        rotate_block(&mut v, 1, 5, 2);
        assert_eq!(v, [0, 5, 6, 1, 2, 3, 4, 7]);
    }

    #[test]
    fn rotate_left_long_block() {
        let mut v = [0, 1, 2, 3, 4, 5, 6, 7];
        rotate_block(&mut v, 1, 2, 5);
        assert_eq!(v, [0, 2, 3, 4, 5, 6, 1, 7]);
    }

    #[test]
    fn rotate_right_into_own_block() {
        let mut v = [0, 1, 2, 3, 4, 5, 6, 7];
        rotate_block(&mut v, 2, 1, 4);
        assert_eq!(v, [0, 5, 1, 2, 3, 4, 6, 7]);
    }

    #[test]
    fn rotate_right_past_block() {
        let mut v = [0, 1, 2, 3, 4, 5, 6, 7];
        rotate_block(&mut v, 5, 0, 2);
        assert_eq!(v, [2, 3, 4, 5, 6, 0, 1, 7]);
    }

    #[test]
    fn rotate_same_position_is_noop() {
        let mut v = [3, 1, 4, 1, 5];
        rotate_block(&mut v, 2, 2, 3);
        assert_eq!(v, [3, 1, 4, 1, 5]);
    }

    #[test]
    fn rotated_index_matches_rotate_block() {
        for (dst, src, count) in [(1, 5, 2), (1, 2, 5), (2, 1, 4), (5, 0, 2), (0, 6, 2)] {
            let mut v: Vec<usize> = (0..8).collect();
            rotate_block(&mut v, dst, src, count);
            for (new_pos, &old_pos) in v.iter().enumerate() {
                assert_eq!(rotated_index(old_pos, dst, src, count), new_pos);
            }
        }
    }

    #[test]
    fn rotate_elements_moves_whole_elements() {
        let mut array = u32_array(&[10, 11, 12, 13, 14]);
        array.rotate_elements(0, 3, 2);
        assert_eq!(contents(&array), vec![13, 14, 10, 11, 12]);
    }

    #[test]
    fn rotate_works_for_entity_ids() {
        let mut ids: Vec<EntityId> = (0..4).map(|i| EntityId::new(i, 0)).collect();
        rotate_block(&mut ids, 3, 0, 1);
        let idx: Vec<u32> = ids.iter().map(|e| e.index()).collect();
        assert_eq!(idx, vec![1, 2, 3, 0]);
    }

    // -- storage ------------------------------------------------------------

    #[test]
    fn resize_preserves_prefix_and_zero_fills() {
        let mut array = u32_array(&[1, 2, 3]);
        array.resize(1);
        array.resize(4);
        assert_eq!(contents(&array), vec![1, 0, 0, 0]);
    }

    #[test]
    fn move_elements_handles_overlap() {
        let mut array = u32_array(&[1, 2, 3, 4, 5]);
        array.move_elements(1, 0, 4);
        assert_eq!(contents(&array), vec![1, 1, 2, 3, 4]);
    }

    #[test]
    fn swap_elements_exchanges_pair() {
        let mut array = u32_array(&[1, 2, 3]);
        array.swap_elements(2, 0);
        assert_eq!(contents(&array), vec![3, 2, 1]);
    }

    #[test]
    fn create_runs_constructor_after_zeroing() {
        fn fill(element: &mut [u8]) {
            element.copy_from_slice(&7u32.to_le_bytes());
        }
        let desc = ComponentDescriptor::of::<u32>("seven").with_construct(fill);
        let mut array = u32_array(&[1, 2, 3]);
        array.create_elements(&desc, 1, 2);
        assert_eq!(contents(&array), vec![1, 7, 7]);
    }

    #[test]
    fn destroy_runs_destructor_per_element() {
        fn queue_owner(element: &mut [u8], queue: &mut DestroyQueue) {
            let index = u32::from_le_bytes([element[0], element[1], element[2], element[3]]);
            queue.destroy_entity(EntityId::new(index, 0));
        }
        let desc = ComponentDescriptor::of::<u32>("owner").with_destruct(queue_owner);
        let mut array = u32_array(&[4, 5, 6]);
        let mut queue = DestroyQueue::new();
        array.destroy_elements(&desc, 0, 3, &mut queue);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(EntityId::new(4, 0)));
    }

    #[test]
    fn zero_sized_elements() {
        let mut array = ComponentArray::new(0);
        array.resize(10);
        assert_eq!(array.len(), 10);
        assert!(array.bytes().is_empty());
        array.rotate_elements(0, 5, 3);
        array.swap_elements(1, 2);
        assert_eq!(array.capacity(), usize::MAX);
    }
}
