//! Single LRU shard: hash index over a slab-backed doubly linked list

use crate::key::{NodeKey, KEY_LEN};
use bytes::Bytes;
use std::collections::HashMap;
use std::mem::size_of;
use xxhash_rust::xxh3::Xxh3Builder;

const NIL: u32 = u32::MAX;

struct Node {
    key: NodeKey,
    value: Bytes,
    /// Towards the most recently used end
    prev: u32,
    /// Towards the least recently used end
    next: u32,
}

/// Bytes charged per entry on top of its value: key, slab node and index slot
pub const ENTRY_OVERHEAD: u64 = (size_of::<Node>() + size_of::<(NodeKey, u32)>() + KEY_LEN) as u64;

#[inline]
pub fn entry_cost(value_len: usize) -> u64 {
    ENTRY_OVERHEAD + value_len as u64
}

/// Recency-ordered store guarded by one shard lock.
///
/// Slots freed by eviction are reused through a free list, so steady-state
/// churn does not grow the slab.
pub struct LruShard {
    index: HashMap<NodeKey, u32, Xxh3Builder>,
    nodes: Vec<Node>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    bytes: u64,
    max_bytes: u64,
    max_items: u64,
}

impl LruShard {
    pub fn new(max_bytes: u64, max_items: u64) -> Self {
        Self {
            index: HashMap::with_hasher(Xxh3Builder::new()),
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            bytes: 0,
            max_bytes,
            max_items,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently charged against the budget
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Look up a key and mark it most recently used
    pub fn get(&mut self, key: &NodeKey) -> Option<Bytes> {
        let slot = *self.index.get(key)?;
        self.move_to_front(slot);
        Some(self.nodes[slot as usize].value.clone())
    }

    /// Insert or replace, then evict from the cold end until within budget.
    ///
    /// Returns the number of entries evicted. An entry larger than the whole
    /// shard budget is not stored, and any older value for its key is dropped
    /// so it cannot be served in place of the newer one.
    pub fn insert(&mut self, key: NodeKey, value: Bytes) -> u64 {
        let cost = entry_cost(value.len());
        if cost > self.max_bytes {
            tracing::trace!(key = %key, len = value.len(), "Value exceeds shard budget, not cached");
            return u64::from(self.remove(&key));
        }

        if let Some(&slot) = self.index.get(&key) {
            let node = &mut self.nodes[slot as usize];
            if node.value != value {
                self.bytes = self.bytes - entry_cost(node.value.len()) + cost;
                node.value = value;
            }
            self.move_to_front(slot);
        } else {
            let node = Node {
                key,
                value,
                prev: NIL,
                next: NIL,
            };
            let slot = match self.free.pop() {
                Some(slot) => {
                    self.nodes[slot as usize] = node;
                    slot
                }
                None => {
                    self.nodes.push(node);
                    (self.nodes.len() - 1) as u32
                }
            };
            self.index.insert(key, slot);
            self.push_front(slot);
            self.bytes += cost;
        }

        self.evict_to_budget()
    }

    /// Drop the entry for `key`. Returns whether one was present.
    pub fn remove(&mut self, key: &NodeKey) -> bool {
        match self.index.get(key) {
            Some(&slot) => {
                self.remove_slot(slot);
                true
            }
            None => false,
        }
    }

    fn over_budget(&self) -> bool {
        self.bytes > self.max_bytes || self.index.len() as u64 > self.max_items
    }

    fn evict_to_budget(&mut self) -> u64 {
        let mut evicted = 0;
        // The head is the entry just written and always fits on its own
        while self.over_budget() && self.tail != self.head {
            self.remove_slot(self.tail);
            evicted += 1;
        }
        evicted
    }

    fn remove_slot(&mut self, slot: u32) {
        self.unlink(slot);
        let node = &mut self.nodes[slot as usize];
        self.index.remove(&node.key);
        self.bytes -= entry_cost(node.value.len());
        node.value = Bytes::new();
        self.free.push(slot);
    }

    fn unlink(&mut self, slot: u32) {
        let (prev, next) = {
            let node = &self.nodes[slot as usize];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }
        let node = &mut self.nodes[slot as usize];
        node.prev = NIL;
        node.next = NIL;
    }

    fn push_front(&mut self, slot: u32) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[slot as usize];
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head as usize].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn move_to_front(&mut self, slot: u32) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    /// Visit entries from least to most recently used
    pub fn for_each_oldest_first(&self, mut f: impl FnMut(&NodeKey, &Bytes)) {
        let mut slot = self.tail;
        while slot != NIL {
            let node = &self.nodes[slot as usize];
            f(&node.key, &node.value);
            slot = node.prev;
        }
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<NodeKey> {
        let mut keys = Vec::with_capacity(self.len());
        let mut slot = self.head;
        while slot != NIL {
            let node = &self.nodes[slot as usize];
            keys.push(node.key);
            slot = node.next;
        }
        keys
    }

    /// Drop every entry and give the slab memory back
    pub fn clear(&mut self) {
        self.index = HashMap::with_hasher(Xxh3Builder::new());
        self.nodes = Vec::new();
        self.free = Vec::new();
        self.head = NIL;
        self.tail = NIL;
        self.bytes = 0;
    }
}
