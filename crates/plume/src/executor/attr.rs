//! Attribute protocol: lookup with transient method binding, writes with
//! copy-on-write isolation, base-skipping lookup, and isinstance.

use std::{collections::VecDeque, rc::Rc};

use ahash::AHashSet;

use crate::{
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
    object::ObjPayload,
};

impl Context {
    /// `obj.attr`: first match in the object's table, then left-to-right
    /// through parents. Raises `AttributeError` when absent.
    pub fn get_attribute(&mut self, obj: ObjId, name: &str) -> RunResult<ObjId> {
        match self.attr_lookup(obj, name) {
            Some(value) => Ok(value),
            None => {
                let type_name = self.heap.get(obj).type_display();
                Err(self.raise_kind(
                    ExcKind::AttributeError,
                    &format!("'{type_name}' object has no attribute '{name}'"),
                ))
            }
        }
    }

    /// Like [`Context::get_attribute`] but silent on absence.
    pub fn has_attribute(&mut self, obj: ObjId, name: &str) -> Option<ObjId> {
        self.attr_lookup(obj, name)
    }

    fn attr_lookup(&mut self, obj: ObjId, name: &str) -> Option<ObjId> {
        let found = self.heap.get(obj).attrs.get(name)?;
        self.bind_method_self(found, obj);
        Some(found)
    }

    /// `obj.attr = value`, writing the object's own entries. Copy-on-write
    /// clones shared storage on the first such write.
    pub fn set_attribute(&mut self, obj: ObjId, name: &str, value: ObjId) {
        self.heap.get_mut(obj).attrs.set(Rc::from(name), value);
    }

    /// Looks `name` up while skipping the most-derived definition: either
    /// through the object's parent tables only, or in a specific base
    /// class's table.
    pub fn get_attribute_from_base(
        &mut self,
        obj: ObjId,
        name: &str,
        base: Option<ObjId>,
    ) -> Option<ObjId> {
        let found = match base {
            None => self.heap.get(obj).attrs.get_from_base(name),
            Some(base) => self.heap.get(base).as_class()?.instance_attrs.get(name),
        }?;
        self.bind_method_self(found, obj);
        Some(found)
    }

    /// Reading a method off an instance transiently binds the receiver.
    fn bind_method_self(&mut self, attr: ObjId, receiver: ObjId) {
        if let Some(func) = self.heap.get_mut(attr).as_func_mut() {
            if func.is_method {
                func.self_obj = Some(receiver);
            }
        }
    }

    /// Returns the first of `classes` that `instance` is an instance of,
    /// walking `__class__` and then breadth-first through `__bases__`.
    #[must_use]
    pub fn isinstance_of(&self, instance: ObjId, classes: &[ObjId]) -> Option<ObjId> {
        let klass = self.heap.get(instance).attrs.get("__class__")?;

        let mut queue = VecDeque::new();
        let mut seen = AHashSet::new();
        queue.push_back(klass);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if classes.contains(&current) {
                return Some(current);
            }
            if let Some(bases) = self.heap.get(current).attrs.get("__bases__") {
                if let ObjPayload::Tuple(items) = &self.heap.get(bases).payload {
                    queue.extend(items.iter().copied());
                }
            }
        }
        None
    }
}
