//! Fixed-size ring arena with an open-addressed offset index
//!
//! Arena layout, repeated until the write position wraps:
//!
//! ```text
//! | key (32) | value_len (u32 LE) | flags (u32 LE) | value ... | next entry ...
//! ```
//!
//! Positions are absolute byte counts since the shard was created; the arena
//! offset is `pos % capacity`. An entry never straddles the end of the arena:
//! the remainder of the lap is skipped and, when large enough, marked with a
//! padding header. A `tail` cursor trails the write position and walks over
//! every entry about to be overwritten, unindexing the ones still live, so the
//! index never points at reclaimed bytes.

use crate::key::{NodeKey, KEY_LEN};
use crate::shard::ShardRouter;

pub const ENTRY_HEADER_LEN: usize = KEY_LEN + 4 + 4;

/// Index slots probed before giving up on a lookup or evicting on insert
pub const MAX_PROBE: usize = 16;

const FLAG_LIVE: u32 = 1;
const FLAG_PADDING: u32 = 2;

const EMPTY: u64 = u64::MAX;
const TOMBSTONE: u64 = u64::MAX - 1;

#[derive(Clone, Copy)]
struct IndexSlot {
    hash: u64,
    pos: u64,
}

impl IndexSlot {
    const VACANT: IndexSlot = IndexSlot { hash: 0, pos: EMPTY };

    #[inline]
    fn is_occupied(&self) -> bool {
        self.pos < TOMBSTONE
    }
}

/// Bytes used by one index slot
pub const INDEX_SLOT_LEN: usize = std::mem::size_of::<IndexSlot>();

struct EntryHeader {
    key: [u8; KEY_LEN],
    len: usize,
    flags: u32,
}

/// Result of writing into a [`RingShard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Value written; this many other live entries were evicted
    Stored(u64),
    /// A live entry for the key already existed and was left in place
    Present,
    /// Value cannot be held by this shard. `dropped_stale` is set when an
    /// older value for the same key had to be removed.
    Rejected { dropped_stale: bool },
}

/// One shard of the fast byte cache
pub struct RingShard {
    arena: Box<[u8]>,
    slots: Box<[IndexSlot]>,
    write_pos: u64,
    tail: u64,
    live: u64,
}

impl RingShard {
    /// `slot_count` must be non-zero
    pub fn new(arena_len: usize, slot_count: usize) -> Self {
        debug_assert!(slot_count > 0);
        Self {
            arena: vec![0u8; arena_len].into_boxed_slice(),
            slots: vec![IndexSlot::VACANT; slot_count.max(1)].into_boxed_slice(),
            write_pos: 0,
            tail: 0,
            live: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> u64 {
        self.arena.len() as u64
    }

    /// Live entries reachable through the index
    pub fn len(&self) -> u64 {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Fixed memory held by this shard
    pub fn resident_bytes(&self) -> u64 {
        (self.arena.len() + self.slots.len() * INDEX_SLOT_LEN) as u64
    }

    /// Largest value this shard can hold
    pub fn max_value_len(&self) -> usize {
        self.arena.len().saturating_sub(ENTRY_HEADER_LEN)
    }

    #[inline]
    fn probe(&self, hash: u64, step: usize) -> usize {
        (hash as usize).wrapping_add(step) % self.slots.len()
    }

    /// Index slots in this shard
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn offset(&self, pos: u64) -> usize {
        (pos % self.capacity()) as usize
    }

    fn read_header(&self, offset: usize) -> EntryHeader {
        let raw = &self.arena[offset..offset + ENTRY_HEADER_LEN];
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&raw[..KEY_LEN]);
        let mut word = [0u8; 4];
        word.copy_from_slice(&raw[KEY_LEN..KEY_LEN + 4]);
        let len = u32::from_le_bytes(word) as usize;
        word.copy_from_slice(&raw[KEY_LEN + 4..]);
        let flags = u32::from_le_bytes(word);
        EntryHeader { key, len, flags }
    }

    fn write_header(&mut self, offset: usize, key: &[u8; KEY_LEN], len: usize, flags: u32) {
        let raw = &mut self.arena[offset..offset + ENTRY_HEADER_LEN];
        raw[..KEY_LEN].copy_from_slice(key);
        raw[KEY_LEN..KEY_LEN + 4].copy_from_slice(&(len as u32).to_le_bytes());
        raw[KEY_LEN + 4..].copy_from_slice(&flags.to_le_bytes());
    }

    fn set_flags(&mut self, offset: usize, flags: u32) {
        let at = offset + KEY_LEN + 4;
        self.arena[at..at + 4].copy_from_slice(&flags.to_le_bytes());
    }

    /// Validate that `pos` still holds the live entry for `key`: the write
    /// position must not have lapped it, and the stored key must match.
    fn entry_at(&self, pos: u64, key: &NodeKey) -> Option<(usize, usize)> {
        if pos + self.capacity() < self.write_pos || pos >= self.write_pos {
            return None;
        }
        let offset = self.offset(pos);
        if offset + ENTRY_HEADER_LEN > self.arena.len() {
            return None;
        }
        let header = self.read_header(offset);
        let start = offset + ENTRY_HEADER_LEN;
        if header.flags != FLAG_LIVE
            || &header.key != key.as_bytes()
            || start + header.len > self.arena.len()
        {
            return None;
        }
        Some((start, header.len))
    }

    fn find(&self, hash: u64, key: &NodeKey) -> Option<(usize, u64)> {
        if self.arena.is_empty() {
            return None;
        }
        for i in 0..MAX_PROBE.min(self.slots.len()) {
            let idx = self.probe(hash, i);
            let slot = self.slots[idx];
            if slot.pos == EMPTY {
                return None;
            }
            if slot.is_occupied() && slot.hash == hash && self.entry_at(slot.pos, key).is_some() {
                return Some((idx, slot.pos));
            }
        }
        None
    }

    /// Borrow the stored value for `key`
    pub fn value(&self, hash: u64, key: &NodeKey) -> Option<&[u8]> {
        let (_, pos) = self.find(hash, key)?;
        let (start, len) = self.entry_at(pos, key)?;
        Some(&self.arena[start..start + len])
    }

    /// Insert unless a live entry for `key` is already indexed
    pub fn insert_if_absent(&mut self, hash: u64, key: &NodeKey, value: &[u8]) -> InsertOutcome {
        if self.find(hash, key).is_some() {
            return InsertOutcome::Present;
        }
        self.insert(hash, key, value)
    }

    /// Insert or replace. A value too large for the shard is not stored and
    /// the previous value for `key`, if any, is removed.
    pub fn insert(&mut self, hash: u64, key: &NodeKey, value: &[u8]) -> InsertOutcome {
        let entry_len = ENTRY_HEADER_LEN + value.len();
        if self.arena.is_empty() || entry_len > self.arena.len() || value.len() > u32::MAX as usize
        {
            return InsertOutcome::Rejected {
                dropped_stale: self.remove(hash, key),
            };
        }

        if self.value(hash, key) == Some(value) {
            return InsertOutcome::Stored(0);
        }

        let mut evicted = 0;
        let offset = self.offset(self.write_pos);
        if offset + entry_len > self.arena.len() {
            let pad = self.arena.len() - offset;
            evicted += self.reclaim(self.write_pos + pad as u64);
            if pad >= ENTRY_HEADER_LEN {
                self.write_header(offset, &[0u8; KEY_LEN], pad, FLAG_PADDING);
            }
            self.write_pos += pad as u64;
        }
        evicted += self.reclaim(self.write_pos + entry_len as u64);

        let idx = match self.find(hash, key) {
            Some((idx, old_pos)) => {
                let old_offset = self.offset(old_pos);
                self.set_flags(old_offset, 0);
                self.live -= 1;
                idx
            }
            None => match self.vacant_slot(hash) {
                Some(idx) => idx,
                None => {
                    // Probe window full of live entries: drop the first one
                    let idx = self.probe(hash, 0);
                    let victim = self.offset(self.slots[idx].pos);
                    self.set_flags(victim, 0);
                    self.live -= 1;
                    evicted += 1;
                    idx
                }
            },
        };

        let offset = self.offset(self.write_pos);
        self.write_header(offset, key.as_bytes(), value.len(), FLAG_LIVE);
        let start = offset + ENTRY_HEADER_LEN;
        self.arena[start..start + value.len()].copy_from_slice(value);

        self.slots[idx] = IndexSlot {
            hash,
            pos: self.write_pos,
        };
        self.write_pos += entry_len as u64;
        self.live += 1;

        InsertOutcome::Stored(evicted)
    }

    /// Drop the live entry for `key`. Returns whether one was present.
    pub fn remove(&mut self, hash: u64, key: &NodeKey) -> bool {
        match self.find(hash, key) {
            Some((idx, pos)) => {
                let offset = self.offset(pos);
                self.set_flags(offset, 0);
                self.vacate(idx);
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    fn vacant_slot(&self, hash: u64) -> Option<usize> {
        (0..MAX_PROBE.min(self.slots.len()))
            .map(|i| self.probe(hash, i))
            .find(|&idx| !self.slots[idx].is_occupied())
    }

    /// Advance the tail until the region up to `end` may be overwritten.
    /// Returns the number of live entries dropped.
    fn reclaim(&mut self, end: u64) -> u64 {
        let cap = self.capacity();
        let mut evicted = 0;

        while self.tail < self.write_pos && self.tail + cap < end {
            let offset = self.offset(self.tail);
            let remaining = self.arena.len() - offset;
            if remaining < ENTRY_HEADER_LEN {
                self.tail += remaining as u64;
                continue;
            }

            let header = self.read_header(offset);
            if header.flags == FLAG_PADDING {
                self.tail += header.len as u64;
                continue;
            }

            let total = ENTRY_HEADER_LEN + header.len;
            debug_assert!(total <= remaining);
            if header.flags == FLAG_LIVE {
                self.unindex(&NodeKey::new(header.key), self.tail);
                self.set_flags(offset, 0);
                self.live -= 1;
                evicted += 1;
            }
            self.tail += total as u64;
        }

        evicted
    }

    /// Remove the index slot pointing at `pos`
    fn unindex(&mut self, key: &NodeKey, pos: u64) {
        let hash = ShardRouter::hash(key);
        for i in 0..MAX_PROBE.min(self.slots.len()) {
            let idx = self.probe(hash, i);
            let slot = self.slots[idx];
            if slot.pos == EMPTY {
                return;
            }
            if slot.pos == pos {
                self.vacate(idx);
                return;
            }
        }
    }

    /// A slot may become empty only if its successor is empty; otherwise it
    /// turns into a tombstone so later probe chains stay intact.
    fn vacate(&mut self, idx: usize) {
        let len = self.slots.len();
        let next = (idx + 1) % len;
        if self.slots[next].pos != EMPTY {
            self.slots[idx] = IndexSlot {
                hash: 0,
                pos: TOMBSTONE,
            };
            return;
        }

        self.slots[idx] = IndexSlot::VACANT;
        let mut prev = (idx + len - 1) % len;
        while prev != idx && self.slots[prev].pos == TOMBSTONE {
            self.slots[prev] = IndexSlot::VACANT;
            prev = (prev + len - 1) % len;
        }
    }

    /// Visit live entries from oldest to newest
    pub fn for_each_live(&self, mut f: impl FnMut(&NodeKey, &[u8])) {
        if self.arena.is_empty() {
            return;
        }
        let mut pos = self.tail;
        while pos < self.write_pos {
            let offset = self.offset(pos);
            let remaining = self.arena.len() - offset;
            if remaining < ENTRY_HEADER_LEN {
                pos += remaining as u64;
                continue;
            }
            let header = self.read_header(offset);
            if header.flags == FLAG_PADDING {
                pos += header.len as u64;
                continue;
            }
            if header.flags == FLAG_LIVE {
                let start = offset + ENTRY_HEADER_LEN;
                f(
                    &NodeKey::new(header.key),
                    &self.arena[start..start + header.len],
                );
            }
            pos += (ENTRY_HEADER_LEN + header.len) as u64;
        }
    }

    /// Free the arena and index; the shard then misses on every lookup and
    /// ignores inserts.
    pub fn release(&mut self) {
        self.arena = Box::default();
        self.slots = vec![IndexSlot::VACANT; 1].into_boxed_slice();
        self.write_pos = 0;
        self.tail = 0;
        self.live = 0;
    }
}
