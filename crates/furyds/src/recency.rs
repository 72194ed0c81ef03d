//! Recency list: keys ordered by the instant they were last touched
//!
//! Append-only at the back, O(1) removal by handle. Re-touching a key means
//! removing its old entry and appending a fresh one, so the list stays
//! sorted by touch instant front to back.

use std::time::Instant;

/// Stable reference to an entry of a [`RecencyList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecencyHandle {
    index: usize,
    generation: u64,
}

/// A touched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecencyEntry {
    /// When the key was touched
    pub touched: Instant,
    /// The key itself
    pub key: String,
}

struct Node {
    entry: RecencyEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Slot {
    generation: u64,
    node: Option<Node>,
}

/// Doubly linked list of touched keys, oldest at the front
#[derive(Default)]
pub struct RecencyList {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl RecencyList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Append `key` stamped with the current instant
    pub fn push_back(&mut self, key: impl Into<String>) -> RecencyHandle {
        self.push_back_at(key, Instant::now())
    }

    /// Append `key` stamped with `touched`
    pub fn push_back_at(&mut self, key: impl Into<String>, touched: Instant) -> RecencyHandle {
        let node = Node {
            entry: RecencyEntry {
                touched,
                key: key.into(),
            },
            prev: self.tail,
            next: None,
        };
        let idx = self.alloc(node);

        match self.tail {
            Some(tail_idx) => {
                if let Some(tail) = &mut self.slots[tail_idx].node {
                    tail.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;

        self.handle_of(idx)
    }

    /// Remove the entry behind `handle`; stale handles are ignored
    pub fn remove(&mut self, handle: RecencyHandle) -> Option<RecencyEntry> {
        if !self.contains(handle) {
            return None;
        }
        self.unlink(handle.index);
        let node = self.slots[handle.index].node.take()?;
        self.free(handle.index);
        Some(node.entry)
    }

    /// Oldest entry
    pub fn front(&self) -> Option<(RecencyHandle, &RecencyEntry)> {
        self.head.and_then(|idx| {
            self.slots[idx]
                .node
                .as_ref()
                .map(|node| (self.handle_of(idx), &node.entry))
        })
    }

    /// Newest entry
    pub fn back(&self) -> Option<(RecencyHandle, &RecencyEntry)> {
        self.tail.and_then(|idx| {
            self.slots[idx]
                .node
                .as_ref()
                .map(|node| (self.handle_of(idx), &node.entry))
        })
    }

    /// Remove and return the oldest entry
    pub fn pop_front(&mut self) -> Option<RecencyEntry> {
        let (handle, _) = self.front()?;
        self.remove(handle)
    }

    /// Entry behind `handle`
    pub fn get(&self, handle: RecencyHandle) -> Option<&RecencyEntry> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref().map(|node| &node.entry)
    }

    /// Check whether `handle` still refers to an entry
    pub fn contains(&self, handle: RecencyHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.head,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every entry; outstanding handles go stale
    pub fn clear(&mut self) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.take().is_some() {
                slot.generation += 1;
                self.free_list.push(idx);
            }
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.slots[idx].node {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.slots[prev_idx].node {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.slots[next_idx].node {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
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

    fn handle_of(&self, idx: usize) -> RecencyHandle {
        RecencyHandle {
            index: idx,
            generation: self.slots[idx].generation,
        }
    }
}

/// Oldest-to-newest iterator over a [`RecencyList`]
pub struct Iter<'a> {
    list: &'a RecencyList,
    cur: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (RecencyHandle, &'a RecencyEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = self.list.slots[idx].node.as_ref()?;
        self.cur = node.next;
        Some((self.list.handle_of(idx), &node.entry))
    }
}
