//! Operator dispatch through the dunder protocol, the iteration protocol,
//! and the hash/equality plumbing behind dict and set containers.

use crate::{
    context::Context,
    dict::DictEntry,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
    object::ObjPayload,
};

/// Unary operation tags for the embedder API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Pos,
    Neg,
    BitNot,
    Bool,
    Int,
    Float,
    Str,
    Repr,
    Hash,
    Len,
    Index,
}

/// Binary operation tags for the embedder API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

impl BinOp {
    fn dunder(self) -> Option<&'static str> {
        Some(match self {
            Self::Add => "__add__",
            Self::Sub => "__sub__",
            Self::Mul => "__mul__",
            Self::Div => "__truediv__",
            Self::FloorDiv => "__floordiv__",
            Self::Mod => "__mod__",
            Self::Pow => "__pow__",
            Self::BitAnd => "__and__",
            Self::BitOr => "__or__",
            Self::BitXor => "__xor__",
            Self::Shl => "__lshift__",
            Self::Shr => "__rshift__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
            Self::In => "__contains__",
            Self::NotIn | Self::And | Self::Or => return None,
        })
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::In
        )
    }
}

impl Context {
    /// Applies a unary operation through the dunder protocol.
    pub fn unary_op(&mut self, op: UnOp, value: ObjId) -> RunResult<ObjId> {
        match op {
            UnOp::Pos => self.call_method(value, "__pos__", &[], None),
            UnOp::Neg => self.call_method(value, "__neg__", &[], None),
            UnOp::BitNot => self.call_method(value, "__invert__", &[], None),
            UnOp::Bool => {
                let truthy = self.unary_bool(value)?;
                Ok(self.new_bool(truthy))
            }
            UnOp::Int => {
                if self.heap.get(value).is_int() {
                    return Ok(value);
                }
                let result = self.call_method(value, "__int__", &[], None)?;
                if !self.heap.get(result).is_int() {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__int__() returned a non int type",
                    ));
                }
                Ok(result)
            }
            UnOp::Float => {
                if self.heap.get(value).is_number() {
                    return Ok(value);
                }
                let result = self.call_method(value, "__float__", &[], None)?;
                if !self.heap.get(result).is_number() {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__float__() returned a non float type",
                    ));
                }
                Ok(result)
            }
            UnOp::Str => {
                if self.heap.get(value).is_str() {
                    return Ok(value);
                }
                let result = self.call_method(value, "__str__", &[], None)?;
                if !self.heap.get(result).is_str() {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__str__() returned a non string type",
                    ));
                }
                Ok(result)
            }
            UnOp::Repr => {
                let result = self.call_method(value, "__repr__", &[], None)?;
                if !self.heap.get(result).is_str() {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__repr__() returned a non string type",
                    ));
                }
                Ok(result)
            }
            UnOp::Hash => {
                let result = self.call_method(value, "__hash__", &[], None)?;
                if !self.heap.get(result).is_int() {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__hash__() returned a non integer type",
                    ));
                }
                Ok(result)
            }
            UnOp::Len => {
                let result = self.call_method(value, "__len__", &[], None)?;
                let Some(length) = self.heap.get(result).as_int() else {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__len__() returned a non integer type",
                    ));
                };
                if length < 0 {
                    return Err(self.raise_kind(
                        ExcKind::ValueError,
                        "__len__() returned a negative value",
                    ));
                }
                Ok(result)
            }
            UnOp::Index => {
                let result = self.call_method(value, "__index__", &[], None)?;
                if !self.heap.get(result).is_int() {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "__index__() returned a non integer type",
                    ));
                }
                Ok(result)
            }
        }
    }

    /// Applies a binary operation through the dunder protocol.
    ///
    /// Comparisons must produce booleans; membership dispatches on the
    /// container (right operand); `and`/`or` here are the eager embedder
    /// variants (short-circuiting belongs to compiled code).
    pub fn binary_op(&mut self, op: BinOp, lhs: ObjId, rhs: ObjId) -> RunResult<ObjId> {
        match op {
            BinOp::NotIn => {
                let contained = self.binary_op(BinOp::In, lhs, rhs)?;
                let truthy = self.unary_bool(contained)?;
                Ok(self.new_bool(!truthy))
            }
            BinOp::And => {
                let lhs_truthy = self.unary_bool(lhs)?;
                if !lhs_truthy {
                    return Ok(self.new_bool(false));
                }
                let rhs_truthy = self.unary_bool(rhs)?;
                Ok(self.new_bool(rhs_truthy))
            }
            BinOp::Or => {
                let lhs_truthy = self.unary_bool(lhs)?;
                if lhs_truthy {
                    return Ok(self.new_bool(true));
                }
                let rhs_truthy = self.unary_bool(rhs)?;
                Ok(self.new_bool(rhs_truthy))
            }
            _ => {
                // Membership tests the right operand for the left.
                let (receiver, argument) = if op == BinOp::In { (rhs, lhs) } else { (lhs, rhs) };
                let dunder = op.dunder().unwrap_or("__add__");
                let result = self.call_method(receiver, dunder, &[argument], None)?;
                if op.is_comparison() && !self.is_bool(result) {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        &format!("{dunder}() returned a non bool type"),
                    ));
                }
                Ok(result)
            }
        }
    }

    /// Truthiness through `__nonzero__`, with booleans passed through.
    pub(crate) fn unary_bool(&mut self, value: ObjId) -> RunResult<bool> {
        if let Some(b) = self.heap.get(value).as_bool() {
            return Ok(b);
        }
        let result = self.call_method(value, "__nonzero__", &[], None)?;
        match self.heap.get(result).as_bool() {
            Some(b) => Ok(b),
            None => Err(self.raise_kind(
                ExcKind::TypeError,
                "__nonzero__() returned a non bool type",
            )),
        }
    }

    /// Equality through `__eq__`, coerced to a host bool.
    pub(crate) fn obj_eq(&mut self, lhs: ObjId, rhs: ObjId) -> RunResult<bool> {
        if lhs == rhs {
            return Ok(true);
        }
        let result = self.binary_op(BinOp::Eq, lhs, rhs)?;
        Ok(self.heap.get(result).as_bool().unwrap_or(false))
    }

    /// The container hash of a key, via `__hash__`.
    pub(crate) fn hash_key(&mut self, key: ObjId) -> RunResult<u64> {
        let result = self.unary_op(UnOp::Hash, key)?;
        let hash = self.heap.get(result).as_int().unwrap_or(0);
        Ok(hash as u64)
    }

    /// String conversion convenience.
    pub(crate) fn str_of(&mut self, value: ObjId) -> RunResult<String> {
        let result = self.unary_op(UnOp::Str, value)?;
        Ok(self
            .heap
            .get(result)
            .as_str()
            .map(str::to_string)
            .unwrap_or_default())
    }

    /// Repr conversion convenience.
    pub(crate) fn repr_of(&mut self, value: ObjId) -> RunResult<String> {
        let result = self.unary_op(UnOp::Repr, value)?;
        Ok(self
            .heap
            .get(result)
            .as_str()
            .map(str::to_string)
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Iteration protocol
    // ------------------------------------------------------------------

    /// Visits every element of an iterable: `iter(obj)` then `__next__`
    /// until `StopIteration`. The callback returns `false` to stop early.
    pub fn iterate(
        &mut self,
        obj: ObjId,
        f: &mut dyn FnMut(&mut Self, ObjId) -> RunResult<bool>,
    ) -> RunResult<()> {
        let protect_base = self.protected.len();
        self.protected.push(obj);

        let result = (|| {
            let iter = self.call_method(obj, "__iter__", &[], None)?;
            self.protected.push(iter);
            loop {
                match self.call_method(iter, "__next__", &[], None) {
                    Ok(value) => {
                        self.protected.push(value);
                        let keep_going = f(self, value);
                        self.protected.pop();
                        if !keep_going? {
                            break;
                        }
                    }
                    Err(raised) => {
                        let stop = self.builtins.stop_iteration;
                        let ended = self.current_exception_obj.is_some_and(|exc| {
                            stop.valid() && self.isinstance_of(exc, &[stop]).is_some()
                        });
                        if ended {
                            self.clear_exception();
                            break;
                        }
                        return Err(raised);
                    }
                }
            }
            Ok(())
        })();

        self.protected.truncate(protect_base);
        result
    }

    /// Unpacks an iterable into exactly `count` values, raising
    /// `ValueError` on a length mismatch.
    pub fn unpack(&mut self, obj: ObjId, count: usize) -> RunResult<Vec<ObjId>> {
        let protect_base = self.protected.len();
        let mut out = Vec::with_capacity(count);
        let result = self.iterate(obj, &mut |ctx, value| {
            if out.len() >= count {
                return Err(ctx.raise_kind(ExcKind::ValueError, "Too many values to unpack"));
            }
            ctx.protected.push(value);
            out.push(value);
            Ok(true)
        });
        self.protected.truncate(protect_base);
        result?;

        if out.len() < count {
            return Err(self.raise_kind(ExcKind::ValueError, "Not enough values to unpack"));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Dict and set plumbing
    //
    // Hashing and key equality run through script-visible dunders, so
    // every operation is two-phase: probe candidates by stored hash, test
    // equality with the interpreter, then commit by slot index.
    // ------------------------------------------------------------------

    fn expect_dict(&mut self, obj: ObjId) -> RunResult<()> {
        if matches!(self.heap.get(obj).payload, ObjPayload::Dict(_)) {
            Ok(())
        } else {
            Err(self.raise_kind(ExcKind::TypeError, "Expected a dict"))
        }
    }

    fn expect_set(&mut self, obj: ObjId) -> RunResult<()> {
        if matches!(self.heap.get(obj).payload, ObjPayload::Set(_)) {
            Ok(())
        } else {
            Err(self.raise_kind(ExcKind::TypeError, "Expected a set"))
        }
    }

    fn dict_find_slot(&mut self, dict_obj: ObjId, key: ObjId, hash: u64) -> RunResult<Option<u32>> {
        let candidates = match &self.heap.get(dict_obj).payload {
            ObjPayload::Dict(dict) => dict.candidates(hash),
            _ => return Ok(None),
        };
        for (slot, existing) in candidates {
            if existing == key || self.obj_eq(key, existing)? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn set_find_slot(&mut self, set_obj: ObjId, key: ObjId, hash: u64) -> RunResult<Option<u32>> {
        let candidates = match &self.heap.get(set_obj).payload {
            ObjPayload::Set(set) => set.candidates(hash),
            _ => return Ok(None),
        };
        for (slot, existing) in candidates {
            if existing == key || self.obj_eq(key, existing)? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// `dict[key] = value`, inserting or replacing.
    pub fn dict_set(&mut self, dict_obj: ObjId, key: ObjId, value: ObjId) -> RunResult<()> {
        self.expect_dict(dict_obj)?;
        let hash = self.hash_key(key)?;
        let slot = self.dict_find_slot(dict_obj, key, hash)?;
        if let ObjPayload::Dict(dict) = &mut self.heap.get_mut(dict_obj).payload {
            match slot {
                Some(slot) => dict.replace(slot, value),
                None => {
                    dict.insert_new(hash, key, value);
                }
            }
        }
        Ok(())
    }

    /// Dictionary lookup; `Ok(None)` when the key is absent.
    pub fn dict_get(&mut self, dict_obj: ObjId, key: ObjId) -> RunResult<Option<ObjId>> {
        self.expect_dict(dict_obj)?;
        let hash = self.hash_key(key)?;
        let slot = self.dict_find_slot(dict_obj, key, hash)?;
        Ok(slot.and_then(|slot| match &self.heap.get(dict_obj).payload {
            ObjPayload::Dict(dict) => dict.entry(slot).map(|entry| entry.value),
            _ => None,
        }))
    }

    /// Removes a key, returning its value when present.
    pub fn dict_remove(&mut self, dict_obj: ObjId, key: ObjId) -> RunResult<Option<ObjId>> {
        self.expect_dict(dict_obj)?;
        let hash = self.hash_key(key)?;
        let slot = self.dict_find_slot(dict_obj, key, hash)?;
        if let Some(slot) = slot {
            if let ObjPayload::Dict(dict) = &mut self.heap.get_mut(dict_obj).payload {
                return Ok(dict.remove(slot).map(|entry| entry.value));
            }
        }
        Ok(None)
    }

    pub(crate) fn dict_contains(&mut self, dict_obj: ObjId, key: ObjId) -> RunResult<bool> {
        self.expect_dict(dict_obj)?;
        let hash = self.hash_key(key)?;
        Ok(self.dict_find_slot(dict_obj, key, hash)?.is_some())
    }

    pub(crate) fn dict_entries(&self, dict_obj: ObjId) -> Vec<DictEntry> {
        match &self.heap.get(dict_obj).payload {
            ObjPayload::Dict(dict) => dict.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Adds a key to a set (no-op when already present).
    pub fn set_add(&mut self, set_obj: ObjId, key: ObjId) -> RunResult<()> {
        self.expect_set(set_obj)?;
        let hash = self.hash_key(key)?;
        if self.set_find_slot(set_obj, key, hash)?.is_none() {
            if let ObjPayload::Set(set) = &mut self.heap.get_mut(set_obj).payload {
                set.insert_new(hash, key);
            }
        }
        Ok(())
    }

    pub(crate) fn set_contains(&mut self, set_obj: ObjId, key: ObjId) -> RunResult<bool> {
        self.expect_set(set_obj)?;
        let hash = self.hash_key(key)?;
        Ok(self.set_find_slot(set_obj, key, hash)?.is_some())
    }

    /// Removes a key from a set; returns whether it was present.
    pub(crate) fn set_discard(&mut self, set_obj: ObjId, key: ObjId) -> RunResult<bool> {
        self.expect_set(set_obj)?;
        let hash = self.hash_key(key)?;
        let slot = self.set_find_slot(set_obj, key, hash)?;
        if let Some(slot) = slot {
            if let ObjPayload::Set(set) = &mut self.heap.get_mut(set_obj).payload {
                set.remove(slot);
            }
            return Ok(true);
        }
        Ok(false)
    }
}
