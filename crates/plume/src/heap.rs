//! Object arena: stable ids, slot reuse, and heap statistics.

use std::collections::BTreeMap;

use crate::object::Obj;

/// Handle to an object in a context's heap. Stable for the object's
/// lifetime; never dereference a handle across a collection that freed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(u32);

impl ObjId {
    /// Sentinel for registry fields that are not populated yet during
    /// context bootstrap.
    pub(crate) const INVALID: Self = Self(u32::MAX);

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    pub(crate) fn valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Snapshot of heap occupancy, mostly for tests and leak checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live objects.
    pub live_objects: usize,
    /// Recycled slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Live objects per type tag.
    pub objects_by_type: BTreeMap<String, usize>,
}

#[derive(Default)]
pub(crate) struct Heap {
    slots: Vec<Option<Box<Obj>>>,
    free: Vec<usize>,
    live: usize,
}

impl Heap {
    pub fn insert(&mut self, obj: Obj) -> ObjId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(Box::new(obj));
            ObjId::from_index(index)
        } else {
            self.slots.push(Some(Box::new(obj)));
            ObjId::from_index(self.slots.len() - 1)
        }
    }

    #[inline]
    pub fn get(&self, id: ObjId) -> &Obj {
        self.slots[id.index()]
            .as_deref()
            .expect("dangling object handle")
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjId) -> &mut Obj {
        self.slots[id.index()]
            .as_deref_mut()
            .expect("dangling object handle")
    }

    pub fn contains(&self, id: ObjId) -> bool {
        id.valid() && id.index() < self.slots.len() && self.slots[id.index()].is_some()
    }

    pub fn remove(&mut self, id: ObjId) -> Option<Box<Obj>> {
        let slot = self.slots.get_mut(id.index())?;
        let obj = slot.take()?;
        self.free.push(id.index());
        self.live -= 1;
        Some(obj)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterates over live object ids.
    pub fn ids(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| ObjId::from_index(i)))
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        for slot in self.slots.iter().flatten() {
            *objects_by_type
                .entry(slot.type_name.to_string())
                .or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.live,
            free_slots: self.free.len(),
            total_slots: self.slots.len(),
            objects_by_type,
        }
    }
}
