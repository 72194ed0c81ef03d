//! Skip list that keeps duplicate keys
//!
//! Elements with equal keys sit next to each other, the most recent insert
//! leftmost. Elements with different keys are sorted ascending. Lookup by
//! key is not offered: callers keep the [`Handle`] returned by `insert` and
//! remove through it in O(1), or consume the list from the front.
//!
//! Nodes live in a slot arena and link to each other by index. Every level a
//! node takes part in stores both a forward and a backward link, so removal
//! never has to search.

use std::fmt;

use crate::height::HeightGenerator;

/// Smallest accepted `max_height`
pub const MIN_HEIGHT: usize = 2;

/// `max_height` must stay below this bound
pub const HEIGHT_LIMIT: usize = 64;

/// Stable reference to an element of a [`DupList`]
///
/// A handle goes stale once its element is removed. Stale handles are
/// ignored by every operation, even after the slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u64,
}

struct Node<K, V> {
    key: K,
    value: V,
    next: Vec<Option<usize>>,
    prev: Vec<Option<usize>>,
}

struct Slot<K, V> {
    generation: u64,
    node: Option<Node<K, V>>,
}

/// Ordered skip list allowing duplicate keys
pub struct DupList<K, V> {
    slots: Vec<Slot<K, V>>,
    free_list: Vec<usize>,
    front: Vec<Option<usize>>,
    len: usize,
    heights: HeightGenerator,
}

/// Height to use for a list expected to hold about `expected_len` elements
///
/// `floor(log2(expected_len / 2))`, clamped to the accepted range.
pub fn max_height_for(expected_len: u64) -> usize {
    let h = (expected_len / 2).max(1).ilog2() as usize;
    h.clamp(MIN_HEIGHT, HEIGHT_LIMIT - 1)
}

impl<K: Ord, V> DupList<K, V> {
    /// Create an empty list with heights drawn from OS entropy
    ///
    /// # Panics
    /// If `max_height` is not in `2..64`.
    pub fn new(max_height: usize) -> Self {
        Self::check_height(max_height);
        Self::with_generator(HeightGenerator::new(max_height))
    }

    /// Create an empty list whose heights come from a seeded generator
    ///
    /// # Panics
    /// If `max_height` is not in `2..64`.
    pub fn with_seed(max_height: usize, seed: u64) -> Self {
        Self::check_height(max_height);
        Self::with_generator(HeightGenerator::with_seed(max_height, seed))
    }

    /// Create an empty list using the given generator
    ///
    /// # Panics
    /// If the generator's max height is not in `2..64`.
    pub fn with_generator(heights: HeightGenerator) -> Self {
        let max_height = heights.max_height();
        Self::check_height(max_height);

        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            front: vec![None; max_height],
            len: 0,
            heights,
        }
    }

    fn check_height(max_height: usize) {
        assert!(
            (MIN_HEIGHT..HEIGHT_LIMIT).contains(&max_height),
            "max_height must be between 2 and 63, got {}",
            max_height
        );
    }

    /// Insert an element and return its handle
    ///
    /// The element lands before every element with a greater key and before
    /// every element with an equal key.
    pub fn insert(&mut self, key: K, value: V) -> Handle {
        let height = self.heights.height();
        let left = self.search(&key);

        let idx = self.alloc(Node {
            key,
            value,
            next: vec![None; height],
            prev: vec![None; height],
        });

        for level in 0..height {
            let succ = match left[level] {
                Some(l) => self.node(l).next[level],
                None => self.front[level],
            };

            let node = self.node_mut(idx);
            node.next[level] = succ;
            node.prev[level] = left[level];

            if let Some(s) = succ {
                self.node_mut(s).prev[level] = Some(idx);
            }

            match left[level] {
                Some(l) => self.node_mut(l).next[level] = Some(idx),
                None => self.front[level] = Some(idx),
            }
        }

        self.len += 1;
        self.handle_of(idx)
    }

    // Last node per level whose key is strictly less than `key`
    fn search(&self, key: &K) -> Vec<Option<usize>> {
        let mut left = vec![None; self.front.len()];
        let mut cur: Option<usize> = None;

        for level in (0..self.front.len()).rev() {
            let mut next = match cur {
                Some(c) => self.node(c).next[level],
                None => self.front[level],
            };

            while let Some(n) = next {
                let node = self.node(n);
                if node.key < *key {
                    cur = Some(n);
                    next = node.next[level];
                } else {
                    break;
                }
            }

            left[level] = cur;
        }

        left
    }
}

impl<K, V> DupList<K, V> {
    /// Handle of the minimum element
    pub fn first(&self) -> Option<Handle> {
        self.front[0].map(|idx| self.handle_of(idx))
    }

    /// Key and value of the minimum element
    pub fn peek_first(&self) -> Option<(&K, &V)> {
        self.front[0].map(|idx| {
            let node = self.node(idx);
            (&node.key, &node.value)
        })
    }

    /// Handle of the element following `handle` on the bottom level
    pub fn next(&self, handle: Handle) -> Option<Handle> {
        let node = self.get_node(handle)?;
        node.next[0].map(|idx| self.handle_of(idx))
    }

    /// Key of the element behind `handle`
    pub fn key(&self, handle: Handle) -> Option<&K> {
        self.get_node(handle).map(|node| &node.key)
    }

    /// Value of the element behind `handle`
    pub fn value(&self, handle: Handle) -> Option<&V> {
        self.get_node(handle).map(|node| &node.value)
    }

    /// Key and value of the element behind `handle`
    pub fn get(&self, handle: Handle) -> Option<(&K, &V)> {
        self.get_node(handle).map(|node| (&node.key, &node.value))
    }

    /// Check whether `handle` still refers to an element of this list
    pub fn contains(&self, handle: Handle) -> bool {
        self.get_node(handle).is_some()
    }

    /// Remove the element behind `handle`
    ///
    /// Relinks each level through the element's own neighbours. Returns
    /// `None` without touching the list when the handle is stale.
    pub fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        if !self.contains(handle) {
            return None;
        }

        let idx = handle.index;
        let node = self.slots[idx].node.take()?;

        for level in 0..node.next.len() {
            let prev = node.prev[level];
            let next = node.next[level];

            match prev {
                Some(p) => self.node_mut(p).next[level] = next,
                None => self.front[level] = next,
            }

            if let Some(n) = next {
                self.node_mut(n).prev[level] = prev;
            }
        }

        self.free(idx);
        Some((node.key, node.value))
    }

    /// Remove the minimum element
    pub fn remove_first(&mut self) -> Option<(K, V)> {
        let first = self.first()?;
        self.remove(first)
    }

    /// Iterate from the minimum element
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            list: self,
            cur: self.front[0],
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels
    pub fn max_height(&self) -> usize {
        self.front.len()
    }

    /// Remove every element; outstanding handles go stale
    pub fn clear(&mut self) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.take().is_some() {
                slot.generation += 1;
                self.free_list.push(idx);
            }
        }
        self.front.iter_mut().for_each(|f| *f = None);
        self.len = 0;
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx].node = Some(node);
            idx
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            self.slots.len() - 1
        }
    }

    fn free(&mut self, idx: usize) {
        self.slots[idx].generation += 1;
        self.free_list.push(idx);
        self.len -= 1;
    }

    fn handle_of(&self, idx: usize) -> Handle {
        Handle {
            index: idx,
            generation: self.slots[idx].generation,
        }
    }

    fn get_node(&self, handle: Handle) -> Option<&Node<K, V>> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        self.slots[idx]
            .node
            .as_ref()
            .expect("skip list link points at a free slot")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        self.slots[idx]
            .node
            .as_mut()
            .expect("skip list link points at a free slot")
    }
}

#[cfg(any(test, debug_assertions))]
impl<K: Ord, V> DupList<K, V> {
    /// Walk every level and assert the structural invariants
    pub fn debug_validate_invariants(&self) {
        let mut bottom = 0;
        let mut cur = self.front[0];
        while let Some(idx) = cur {
            bottom += 1;
            cur = self.node(idx).next[0];
        }
        assert_eq!(bottom, self.len, "bottom level length");

        for level in 0..self.front.len() {
            let mut prev: Option<usize> = None;
            let mut cur = self.front[level];

            while let Some(idx) = cur {
                let node = self.node(idx);
                assert!(node.next.len() > level, "node linked above its height");
                assert_eq!(node.prev[level], prev, "back link at level {}", level);

                if let Some(p) = prev {
                    assert!(self.node(p).key <= node.key, "order at level {}", level);
                }

                prev = Some(idx);
                cur = node.next[level];
            }
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for DupList<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(_, k, v)| (k, v)))
            .finish()
    }
}

/// Front-to-back iterator over a [`DupList`]
pub struct Iter<'a, K, V> {
    list: &'a DupList<K, V>,
    cur: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = self.list.node(idx);
        self.cur = node.next[0];
        Some((self.list.handle_of(idx), &node.key, &node.value))
    }
}
