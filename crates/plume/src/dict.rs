//! Insertion-ordered dictionary and set storage for script containers.
//!
//! Keys are object handles whose hashes are computed up front (hashing and
//! equality run through the interpreter's dunder protocol, which this
//! module must not re-enter). Lookup is therefore two-phase: callers fetch
//! the candidate slots for a hash, run `__eq__` on each candidate outside
//! any borrow of the storage, then commit the mutation by slot index.
//!
//! Deletion tombstones the slot rather than compacting, so iterators that
//! hold a slot cursor can always revalidate to the next live slot; they may
//! observe or miss entries inserted during iteration, but never dangle.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::heap::ObjId;

#[derive(Debug, Clone, Copy)]
pub(crate) struct DictEntry {
    pub hash: u64,
    pub key: ObjId,
    pub value: ObjId,
}

#[derive(Debug, Default)]
pub(crate) struct Dict {
    slots: Vec<Option<DictEntry>>,
    index: AHashMap<u64, SmallVec<[u32; 1]>>,
    len: usize,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots whose stored hash equals `hash`, for the caller to equality-
    /// check against a probe key.
    pub fn candidates(&self, hash: u64) -> SmallVec<[(u32, ObjId); 1]> {
        let Some(bucket) = self.index.get(&hash) else {
            return SmallVec::new();
        };
        bucket
            .iter()
            .filter_map(|&slot| {
                self.slots[slot as usize]
                    .as_ref()
                    .map(|entry| (slot, entry.key))
            })
            .collect()
    }

    pub fn entry(&self, slot: u32) -> Option<DictEntry> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// Appends a new entry. The caller has already established that no live
    /// slot holds an equal key.
    pub fn insert_new(&mut self, hash: u64, key: ObjId, value: ObjId) -> u32 {
        let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Some(DictEntry { hash, key, value }));
        self.index.entry(hash).or_default().push(slot);
        self.len += 1;
        slot
    }

    pub fn replace(&mut self, slot: u32, value: ObjId) {
        if let Some(Some(entry)) = self.slots.get_mut(slot as usize) {
            entry.value = value;
        }
    }

    /// Tombstones a slot; storage does not shrink until the next rebuild.
    pub fn remove(&mut self, slot: u32) -> Option<DictEntry> {
        let entry = self.slots.get_mut(slot as usize)?.take()?;
        if let Some(bucket) = self.index.get_mut(&entry.hash) {
            bucket.retain(|&mut s| s != slot);
        }
        self.len -= 1;
        Some(entry)
    }

    /// Removes and returns the most recently inserted live entry.
    pub fn pop_last(&mut self) -> Option<DictEntry> {
        let slot = self
            .slots
            .iter()
            .rposition(Option::is_some)
            .map(|i| u32::try_from(i).unwrap_or(u32::MAX))?;
        self.remove(slot)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.len = 0;
    }

    /// The first live slot at or after `cursor`, with its entry.
    ///
    /// This is the iterator protocol: holders of a cursor call this after
    /// arbitrary interleaved mutation and either get the next live entry or
    /// learn that iteration is done.
    pub fn next_slot(&self, cursor: u32) -> Option<(u32, DictEntry)> {
        let mut i = cursor as usize;
        while i < self.slots.len() {
            if let Some(entry) = self.slots[i] {
                return Some((u32::try_from(i).unwrap_or(u32::MAX), entry));
            }
            i += 1;
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = DictEntry> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }
}

/// Set storage: the dictionary with each key bound to itself. Insertion
/// order is preserved incidentally; the set contract does not require it.
#[derive(Debug, Default)]
pub(crate) struct Set(Dict);

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn candidates(&self, hash: u64) -> SmallVec<[(u32, ObjId); 1]> {
        self.0.candidates(hash)
    }

    pub fn insert_new(&mut self, hash: u64, key: ObjId) -> u32 {
        self.0.insert_new(hash, key, key)
    }

    pub fn remove(&mut self, slot: u32) -> Option<ObjId> {
        self.0.remove(slot).map(|entry| entry.key)
    }

    pub fn pop_last(&mut self) -> Option<ObjId> {
        self.0.pop_last().map(|entry| entry.key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn next_slot(&self, cursor: u32) -> Option<(u32, ObjId)> {
        self.0.next_slot(cursor).map(|(slot, entry)| (slot, entry.key))
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.0.iter().map(|entry| entry.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> ObjId {
        ObjId::from_index(n)
    }

    #[test]
    fn preserves_insertion_order() {
        let mut d = Dict::new();
        d.insert_new(3, id(30), id(300));
        d.insert_new(1, id(10), id(100));
        d.insert_new(2, id(20), id(200));
        let keys: Vec<ObjId> = d.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![id(30), id(10), id(20)]);
    }

    #[test]
    fn removal_tombstones_without_shrinking() {
        let mut d = Dict::new();
        let a = d.insert_new(1, id(1), id(11));
        d.insert_new(2, id(2), id(22));
        assert_eq!(d.len(), 2);
        d.remove(a);
        assert_eq!(d.len(), 1);
        // Storage keeps the dead slot; the index no longer reports it.
        assert!(d.candidates(1).is_empty());
        assert_eq!(d.iter().count(), 1);
    }

    #[test]
    fn cursor_skips_tombstones_after_mutation() {
        let mut d = Dict::new();
        let a = d.insert_new(1, id(1), id(11));
        d.insert_new(2, id(2), id(22));
        d.insert_new(3, id(3), id(33));

        let (slot, entry) = d.next_slot(0).expect("first entry");
        assert_eq!(entry.key, id(1));
        d.remove(a);
        d.remove(slot + 1);
        // Cursor held at the first entry advances past both tombstones.
        let (_, entry) = d.next_slot(slot + 1).expect("remaining entry");
        assert_eq!(entry.key, id(3));
    }

    #[test]
    fn cursor_sees_entries_inserted_during_iteration() {
        let mut d = Dict::new();
        d.insert_new(1, id(1), id(1));
        let (slot, _) = d.next_slot(0).expect("first");
        d.insert_new(2, id(2), id(2));
        let (_, entry) = d.next_slot(slot + 1).expect("inserted entry");
        assert_eq!(entry.key, id(2));
    }

    #[test]
    fn colliding_hashes_share_a_bucket() {
        let mut d = Dict::new();
        d.insert_new(7, id(1), id(10));
        d.insert_new(7, id(2), id(20));
        let candidates = d.candidates(7);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn pop_last_returns_newest_live_entry() {
        let mut d = Dict::new();
        d.insert_new(1, id(1), id(10));
        let b = d.insert_new(2, id(2), id(20));
        d.remove(b);
        let popped = d.pop_last().expect("entry");
        assert_eq!(popped.key, id(1));
        assert!(d.is_empty());
    }
}
