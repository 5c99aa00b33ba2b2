//! Attribute tables: shared, copy-on-write name maps with a parent chain.
//!
//! A table is a reference-counted storage block holding local entries plus
//! an ordered list of parent storages. `copy()` produces a logical alias
//! marked not-owned; the first mutation on an alias clones the storage.
//! Parents are shared by reference, which is what makes a method added to a
//! class visible through instances created earlier.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::heap::ObjId;

#[derive(Debug, Default)]
struct TableData {
    entries: AHashMap<Rc<str>, ObjId>,
    parents: Vec<Rc<RefCell<TableData>>>,
}

impl TableData {
    fn get(&self, name: &str) -> Option<ObjId> {
        if let Some(&value) = self.entries.get(name) {
            return Some(value);
        }
        for parent in &self.parents {
            if let Some(value) = parent.borrow().get(name) {
                return Some(value);
            }
        }
        None
    }

    fn for_each(&self, f: &mut impl FnMut(ObjId)) {
        for &value in self.entries.values() {
            f(value);
        }
        for parent in &self.parents {
            parent.borrow().for_each(f);
        }
    }
}

#[derive(Debug)]
pub(crate) struct AttrTable {
    table: Rc<RefCell<TableData>>,
    owned: bool,
}

impl Default for AttrTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AttrTable {
    pub fn new() -> Self {
        Self {
            table: Rc::new(RefCell::new(TableData::default())),
            owned: true,
        }
    }

    /// Looks up `name` in the local entries, then left-to-right through the
    /// parent chain.
    pub fn get(&self, name: &str) -> Option<ObjId> {
        self.table.borrow().get(name)
    }

    /// Looks up `name` in the parents only, skipping the most-derived
    /// entries.
    pub fn get_from_base(&self, name: &str) -> Option<ObjId> {
        let table = self.table.borrow();
        for parent in &table.parents {
            if let Some(value) = parent.borrow().get(name) {
                return Some(value);
            }
        }
        None
    }

    pub fn set(&mut self, name: Rc<str>, value: ObjId) {
        self.mutate();
        self.table.borrow_mut().entries.insert(name, value);
    }

    pub fn add_parent(&mut self, parent: &Self) {
        self.table
            .borrow_mut()
            .parents
            .push(Rc::clone(&parent.table));
    }

    /// A logical alias of this table. Cheap; storage is cloned only when
    /// the alias is first mutated.
    pub fn copy(&self) -> Self {
        Self {
            table: Rc::clone(&self.table),
            owned: false,
        }
    }

    /// Visits every entry, including entries reachable through parents.
    pub fn for_each(&self, mut f: impl FnMut(ObjId)) {
        self.table.borrow().for_each(&mut f);
    }

    fn mutate(&mut self) {
        if !self.owned {
            let cloned = {
                let table = self.table.borrow();
                TableData {
                    entries: table.entries.clone(),
                    parents: table.parents.clone(),
                }
            };
            self.table = Rc::new(RefCell::new(cloned));
            self.owned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ObjId {
        // Test-only handle fabrication; the table never dereferences ids.
        ObjId::from_index(n as usize)
    }

    #[test]
    fn copy_is_isolated_after_write() {
        let mut original = AttrTable::new();
        original.set(Rc::from("a"), id(1));

        let mut alias = original.copy();
        assert_eq!(alias.get("a"), Some(id(1)));

        alias.set(Rc::from("a"), id(2));
        assert_eq!(alias.get("a"), Some(id(2)));
        assert_eq!(original.get("a"), Some(id(1)));
    }

    #[test]
    fn unmutated_alias_sees_later_writes() {
        let mut original = AttrTable::new();
        let alias = original.copy();
        original.set(Rc::from("m"), id(7));
        assert_eq!(alias.get("m"), Some(id(7)));
    }

    #[test]
    fn parent_lookup_is_left_to_right() {
        let mut left = AttrTable::new();
        left.set(Rc::from("x"), id(1));
        let mut right = AttrTable::new();
        right.set(Rc::from("x"), id(2));
        right.set(Rc::from("y"), id(3));

        let mut child = AttrTable::new();
        child.add_parent(&left);
        child.add_parent(&right);
        assert_eq!(child.get("x"), Some(id(1)));
        assert_eq!(child.get("y"), Some(id(3)));
    }

    #[test]
    fn local_entries_shadow_parents() {
        let mut parent = AttrTable::new();
        parent.set(Rc::from("x"), id(1));
        let mut child = AttrTable::new();
        child.add_parent(&parent);
        child.set(Rc::from("x"), id(9));
        assert_eq!(child.get("x"), Some(id(9)));
        assert_eq!(child.get_from_base("x"), Some(id(1)));
    }

    #[test]
    fn parent_additions_are_visible_through_aliases() {
        let mut class_table = AttrTable::new();
        let instance_table = class_table.copy();
        class_table.set(Rc::from("method"), id(4));
        assert_eq!(instance_table.get("method"), Some(id(4)));
    }
}
