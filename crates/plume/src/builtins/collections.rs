//! Container builtin classes: tuple, list, dict, set.
//!
//! Container reprs guard against cycles with the context's repr stack.
//! Mutable containers define `__hash__` to raise, so they cannot be used
//! as dict or set keys.

use crate::{
    builtins::{
        abs_index, arg_type_error, expect_count, expect_count_between, int_arg, is_slice,
        iterate_range, kwarg_get, register_method, resolve_slice,
    },
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
    object::ObjPayload,
};

pub(super) fn install(ctx: &mut Context) -> RunResult<()> {
    let list_class = ctx.new_class("list", &[])?;
    ctx.builtins.list_class = list_class;
    ctx.set_global("list", list_class);
    register_method(ctx, list_class, "__init__", list_init)?;
    register_method(ctx, list_class, "__nonzero__", list_nonzero)?;
    register_method(ctx, list_class, "__str__", list_str)?;
    register_method(ctx, list_class, "__len__", list_len)?;
    register_method(ctx, list_class, "__getitem__", list_getitem)?;
    register_method(ctx, list_class, "__setitem__", list_setitem)?;
    register_method(ctx, list_class, "__contains__", list_contains)?;
    register_method(ctx, list_class, "__add__", list_add)?;
    register_method(ctx, list_class, "__eq__", list_eq)?;
    register_method(ctx, list_class, "__lt__", list_lt)?;
    register_method(ctx, list_class, "__mul__", list_mul)?;
    register_method(ctx, list_class, "__hash__", unhashable_list)?;
    register_method(ctx, list_class, "count", list_count)?;
    register_method(ctx, list_class, "index", list_index)?;
    register_method(ctx, list_class, "append", list_append)?;
    register_method(ctx, list_class, "clear", list_clear)?;
    register_method(ctx, list_class, "copy", list_copy)?;
    register_method(ctx, list_class, "extend", list_extend)?;
    register_method(ctx, list_class, "insert", list_insert)?;
    register_method(ctx, list_class, "pop", list_pop)?;
    register_method(ctx, list_class, "remove", list_remove)?;
    register_method(ctx, list_class, "reverse", list_reverse)?;
    register_method(ctx, list_class, "sort", list_sort)?;

    let dict_class = ctx.new_class("dict", &[])?;
    ctx.builtins.dict_class = dict_class;
    ctx.set_global("dict", dict_class);
    register_method(ctx, dict_class, "__init__", map_init)?;
    register_method(ctx, dict_class, "__nonzero__", map_nonzero)?;
    register_method(ctx, dict_class, "__str__", map_str)?;
    register_method(ctx, dict_class, "__contains__", map_contains)?;
    register_method(ctx, dict_class, "__getitem__", map_getitem)?;
    register_method(ctx, dict_class, "__setitem__", map_setitem)?;
    register_method(ctx, dict_class, "__iter__", map_keys)?;
    register_method(ctx, dict_class, "__len__", map_len)?;
    register_method(ctx, dict_class, "__eq__", map_eq)?;
    register_method(ctx, dict_class, "__hash__", unhashable_dict)?;
    register_method(ctx, dict_class, "clear", map_clear)?;
    register_method(ctx, dict_class, "copy", map_copy)?;
    register_method(ctx, dict_class, "get", map_get)?;
    register_method(ctx, dict_class, "keys", map_keys)?;
    register_method(ctx, dict_class, "values", map_values)?;
    register_method(ctx, dict_class, "items", map_items)?;
    register_method(ctx, dict_class, "pop", map_pop)?;
    register_method(ctx, dict_class, "popitem", map_popitem)?;
    register_method(ctx, dict_class, "setdefault", map_setdefault)?;
    register_method(ctx, dict_class, "update", map_update)?;

    let set_class = ctx.new_class("set", &[])?;
    ctx.builtins.set_class = set_class;
    ctx.set_global("set", set_class);
    register_method(ctx, set_class, "__init__", set_init)?;
    register_method(ctx, set_class, "__nonzero__", set_nonzero)?;
    register_method(ctx, set_class, "__str__", set_str)?;
    register_method(ctx, set_class, "__contains__", set_contains_method)?;
    register_method(ctx, set_class, "__iter__", set_iter_method)?;
    register_method(ctx, set_class, "__len__", set_len)?;
    register_method(ctx, set_class, "__eq__", set_eq)?;
    register_method(ctx, set_class, "__hash__", unhashable_set)?;
    register_method(ctx, set_class, "add", set_add_method)?;
    register_method(ctx, set_class, "clear", set_clear)?;
    register_method(ctx, set_class, "copy", set_copy)?;
    register_method(ctx, set_class, "difference", set_difference)?;
    register_method(ctx, set_class, "discard", set_discard_method)?;
    register_method(ctx, set_class, "intersection", set_intersection)?;
    register_method(ctx, set_class, "isdisjoint", set_isdisjoint)?;
    register_method(ctx, set_class, "issubset", set_issubset)?;
    register_method(ctx, set_class, "issuperset", set_issuperset)?;
    register_method(ctx, set_class, "pop", set_pop)?;
    register_method(ctx, set_class, "remove", set_remove)?;
    register_method(ctx, set_class, "symmetric_difference", set_symmetric_difference)?;
    register_method(ctx, set_class, "union", set_union)?;
    register_method(ctx, set_class, "update", set_update)?;

    Ok(())
}

// ----------------------------------------------------------------------
// Shared sequence behavior (tuple and list)
// ----------------------------------------------------------------------

fn seq_items(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<Vec<ObjId>> {
    match &ctx.heap.get(argv[index]).payload {
        ObjPayload::Tuple(items) | ObjPayload::List(items) => Ok(items.clone()),
        _ => Err(arg_type_error(ctx, index, "tuple or list")),
    }
}

fn seq_repr(ctx: &mut Context, argv: &[ObjId], open: char, close: char) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    if ctx.repr_stack.contains(&argv[0]) {
        let text = format!("{open}...{close}");
        return ctx.new_str(&text);
    }

    ctx.repr_stack.push(argv[0]);
    let result = (|| {
        let items = seq_items(ctx, argv, 0)?;
        let mut parts = Vec::with_capacity(items.len());
        for &item in &items {
            parts.push(ctx.repr_of(item)?);
        }
        let mut text = String::new();
        text.push(open);
        text.push_str(&parts.join(", "));
        if open == '(' && items.len() == 1 {
            text.push(',');
        }
        text.push(close);
        ctx.new_str(&text)
    })();
    ctx.repr_stack.pop();
    result
}

fn seq_getitem(ctx: &mut Context, argv: &[ObjId], as_tuple: bool) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let items = seq_items(ctx, argv, 0)?;
    let length = items.len() as i64;

    if is_slice(ctx, argv[1]) {
        let (start, stop, step) = resolve_slice(ctx, length, argv[1])?;
        let mut sliced = Vec::new();
        iterate_range(start, stop, step, |i| {
            if i >= 0 && i < length {
                sliced.push(items[i as usize]);
            }
        });
        return if as_tuple {
            ctx.new_tuple(&sliced)
        } else {
            ctx.new_list(&sliced)
        };
    }

    let index = abs_index(ctx, length, argv[1])?;
    if index < 0 || index >= length {
        return Err(ctx.raise_kind(ExcKind::IndexError, "index out of range"));
    }
    Ok(items[index as usize])
}

fn seq_contains(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let items = seq_items(ctx, argv, 0)?;
    for item in items {
        if ctx.obj_eq(item, argv[1])? {
            return Ok(ctx.new_bool(true));
        }
    }
    Ok(ctx.new_bool(false))
}

fn seq_eq(ctx: &mut Context, argv: &[ObjId], same_kind: fn(&ObjPayload) -> bool) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = seq_items(ctx, argv, 0)?;
    if !same_kind(&ctx.heap.get(argv[1]).payload) {
        return Ok(ctx.new_bool(false));
    }
    let rhs = seq_items(ctx, argv, 1)?;
    if lhs.len() != rhs.len() {
        return Ok(ctx.new_bool(false));
    }
    for (&a, &b) in lhs.iter().zip(&rhs) {
        if !ctx.obj_eq(a, b)? {
            return Ok(ctx.new_bool(false));
        }
    }
    Ok(ctx.new_bool(true))
}

fn seq_lt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = seq_items(ctx, argv, 0)?;
    let rhs = seq_items(ctx, argv, 1)?;
    for (&a, &b) in lhs.iter().zip(&rhs) {
        if !ctx.obj_eq(a, b)? {
            let lt = ctx.binary_op(crate::executor::BinOp::Lt, a, b)?;
            return Ok(lt);
        }
    }
    Ok(ctx.new_bool(lhs.len() < rhs.len()))
}

fn seq_count(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let items = seq_items(ctx, argv, 0)?;
    let mut count = 0;
    for item in items {
        if ctx.obj_eq(argv[1], item)? {
            count += 1;
        }
    }
    ctx.new_int(count)
}

fn seq_index(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let items = seq_items(ctx, argv, 0)?;
    for (i, item) in items.into_iter().enumerate() {
        if ctx.obj_eq(argv[1], item)? {
            return ctx.new_int(i as i64);
        }
    }
    Err(ctx.raise_kind(ExcKind::ValueError, "Value was not found"))
}

fn seq_mul(ctx: &mut Context, argv: &[ObjId], as_tuple: bool) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let items = seq_items(ctx, argv, 0)?;
    let count = usize::try_from(int_arg(ctx, argv, 1)?).unwrap_or(0);
    let mut repeated = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        repeated.extend(items.iter().copied());
    }
    if as_tuple {
        ctx.new_tuple(&repeated)
    } else {
        ctx.new_list(&repeated)
    }
}

// ----------------------------------------------------------------------
// tuple
// ----------------------------------------------------------------------

pub(super) fn tuple_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_repr(ctx, argv, '(', ')')
}

pub(super) fn tuple_getitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_getitem(ctx, argv, true)
}

pub(super) fn tuple_len(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let items = seq_items(ctx, argv, 0)?;
    ctx.new_int(items.len() as i64)
}

pub(super) fn tuple_contains(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_contains(ctx, argv)
}

pub(super) fn tuple_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_eq(ctx, argv, |payload| matches!(payload, ObjPayload::Tuple(_)))
}

pub(super) fn tuple_lt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_lt(ctx, argv)
}

pub(super) fn tuple_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let items = seq_items(ctx, argv, 0)?;
    Ok(ctx.new_bool(!items.is_empty()))
}

pub(super) fn tuple_count(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_count(ctx, argv)
}

pub(super) fn tuple_index(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_index(ctx, argv)
}

pub(super) fn tuple_mul(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_mul(ctx, argv, true)
}

/// Tuples hash by combining their elements' hashes, so equal tuples of
/// hashable values collide as dict keys. Unhashable elements propagate
/// their own `TypeError`.
pub(super) fn tuple_hash(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let items = seq_items(ctx, argv, 0)?;
    let mut hash: u64 = 0x345678;
    for item in items {
        let item_hash = ctx.hash_key(item)?;
        hash = hash.rotate_left(5) ^ item_hash.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    }
    ctx.new_int(hash as i64)
}

// ----------------------------------------------------------------------
// list
// ----------------------------------------------------------------------

fn list_items_mut<'a>(ctx: &'a mut Context, id: ObjId) -> Option<&'a mut Vec<ObjId>> {
    match &mut ctx.heap.get_mut(id).payload {
        ObjPayload::List(items) => Some(items),
        _ => None,
    }
}

fn expect_list(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<()> {
    if matches!(ctx.heap.get(argv[index]).payload, ObjPayload::List(_)) {
        Ok(())
    } else {
        Err(arg_type_error(ctx, index, "list"))
    }
}

fn list_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;

    let mut items = Vec::new();
    if argv.len() == 2 {
        let protect_base = ctx.protected.len();
        let result = ctx.iterate(argv[1], &mut |ctx, value| {
            ctx.protected.push(value);
            items.push(value);
            Ok(true)
        });
        ctx.protected.truncate(protect_base);
        result?;
    }

    let attrs = ctx.class_instance_attrs(ctx.builtins.list_class);
    let obj = ctx.heap.get_mut(argv[0]);
    obj.attrs = attrs;
    obj.payload = ObjPayload::List(items);
    obj.type_name = ctx.tags.list.clone();
    Ok(ctx.none())
}

fn list_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_list(ctx, argv, 0)?;
    let items = seq_items(ctx, argv, 0)?;
    Ok(ctx.new_bool(!items.is_empty()))
}

fn list_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_repr(ctx, argv, '[', ']')
}

fn list_len(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_list(ctx, argv, 0)?;
    let items = seq_items(ctx, argv, 0)?;
    ctx.new_int(items.len() as i64)
}

fn list_getitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_getitem(ctx, argv, false)
}

fn list_setitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 3)?;
    expect_list(ctx, argv, 0)?;
    let length = seq_items(ctx, argv, 0)?.len() as i64;
    let index = abs_index(ctx, length, argv[1])?;
    if index < 0 || index >= length {
        return Err(ctx.raise_kind(ExcKind::IndexError, "index out of range"));
    }
    if let Some(items) = list_items_mut(ctx, argv[0]) {
        items[index as usize] = argv[2];
    }
    Ok(ctx.none())
}

fn list_contains(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_contains(ctx, argv)
}

fn list_add(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_list(ctx, argv, 0)?;
    expect_list(ctx, argv, 1)?;
    let mut items = seq_items(ctx, argv, 0)?;
    items.extend(seq_items(ctx, argv, 1)?);
    ctx.new_list(&items)
}

fn list_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_eq(ctx, argv, |payload| matches!(payload, ObjPayload::List(_)))
}

fn list_lt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_lt(ctx, argv)
}

fn list_mul(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_mul(ctx, argv, false)
}

fn list_count(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_count(ctx, argv)
}

fn list_index(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    seq_index(ctx, argv)
}

fn list_append(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_list(ctx, argv, 0)?;
    if let Some(items) = list_items_mut(ctx, argv[0]) {
        items.push(argv[1]);
    }
    Ok(ctx.none())
}

fn list_clear(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_list(ctx, argv, 0)?;
    if let Some(items) = list_items_mut(ctx, argv[0]) {
        items.clear();
    }
    Ok(ctx.none())
}

fn list_copy(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_list(ctx, argv, 0)?;
    let items = seq_items(ctx, argv, 0)?;
    ctx.new_list(&items)
}

fn list_extend(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_list(ctx, argv, 0)?;

    if argv[0] == argv[1] {
        // Self-extension doubles in place rather than iterating forever.
        if let Some(items) = list_items_mut(ctx, argv[0]) {
            let copy = items.clone();
            items.extend(copy);
        }
        return Ok(ctx.none());
    }

    let target = argv[0];
    ctx.iterate(argv[1], &mut |ctx, value| {
        if let Some(items) = list_items_mut(ctx, target) {
            items.push(value);
        }
        Ok(true)
    })?;
    Ok(ctx.none())
}

fn list_insert(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 3)?;
    expect_list(ctx, argv, 0)?;
    let length = seq_items(ctx, argv, 0)?.len() as i64;
    let index = abs_index(ctx, length, argv[1])?.clamp(0, length);
    if let Some(items) = list_items_mut(ctx, argv[0]) {
        items.insert(index as usize, argv[2]);
    }
    Ok(ctx.none())
}

fn list_pop(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    expect_list(ctx, argv, 0)?;
    let length = seq_items(ctx, argv, 0)?.len() as i64;
    let index = if argv.len() == 2 {
        abs_index(ctx, length, argv[1])?
    } else {
        length - 1
    };
    if index < 0 || index >= length {
        return Err(ctx.raise_kind(ExcKind::IndexError, "index out of range"));
    }
    let popped = list_items_mut(ctx, argv[0])
        .map(|items| items.remove(index as usize));
    Ok(popped.unwrap_or(ctx.none()))
}

fn list_remove(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_list(ctx, argv, 0)?;
    let items = seq_items(ctx, argv, 0)?;
    for (i, item) in items.into_iter().enumerate() {
        if ctx.obj_eq(argv[1], item)? {
            if let Some(items) = list_items_mut(ctx, argv[0]) {
                if i < items.len() {
                    items.remove(i);
                }
            }
            return Ok(ctx.none());
        }
    }
    Err(ctx.raise_kind(ExcKind::ValueError, "Value was not found"))
}

fn list_reverse(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_list(ctx, argv, 0)?;
    if let Some(items) = list_items_mut(ctx, argv[0]) {
        items.reverse();
    }
    Ok(ctx.none())
}

/// Stable merge sort driven by `__lt__`/`__le__` through the interpreter,
/// honoring `key=` and `reverse=` keywords.
fn list_sort(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_list(ctx, argv, 0)?;

    let key = kwarg_get(ctx, "key")?.filter(|&k| !ctx.is_none(k));
    let reverse = match kwarg_get(ctx, "reverse")? {
        Some(flag) => ctx.unary_bool(flag)?,
        None => false,
    };

    let mut items = seq_items(ctx, argv, 0)?;
    let protect_base = ctx.protected.len();
    ctx.protected.extend(items.iter().copied());

    let result = merge_sort(ctx, &mut items, key);
    ctx.protected.truncate(protect_base);
    result?;

    if reverse {
        items.reverse();
    }
    if let Some(buf) = list_items_mut(ctx, argv[0]) {
        *buf = items;
    }
    Ok(ctx.none())
}

fn merge_sort(ctx: &mut Context, data: &mut [ObjId], key: Option<ObjId>) -> RunResult<()> {
    if data.len() <= 1 {
        return Ok(());
    }
    let mid = data.len() / 2;
    let (left, right) = data.split_at_mut(mid);
    merge_sort(ctx, left, key)?;
    merge_sort(ctx, right, key)?;

    let left: Vec<ObjId> = left.to_vec();
    let right: Vec<ObjId> = right.to_vec();
    let mut merged = Vec::with_capacity(data.len());
    let mut a = 0;
    let mut b = 0;
    while merged.len() < left.len() + right.len() {
        if a == left.len() {
            merged.push(right[b]);
            b += 1;
        } else if b == right.len() {
            merged.push(left[a]);
            a += 1;
        } else {
            let lhs = sort_key(ctx, left[a], key)?;
            let rhs = sort_key(ctx, right[b], key)?;
            let le = ctx.binary_op(crate::executor::BinOp::Le, rhs, lhs)?;
            if ctx.get_bool(le).unwrap_or(false) {
                // right < left: take right to keep the merge stable.
                merged.push(right[b]);
                b += 1;
            } else {
                merged.push(left[a]);
                a += 1;
            }
        }
    }
    data.copy_from_slice(&merged);
    Ok(())
}

fn sort_key(ctx: &mut Context, value: ObjId, key: Option<ObjId>) -> RunResult<ObjId> {
    match key {
        Some(key) => ctx.call(key, &[value], None),
        None => Ok(value),
    }
}

fn unhashable_list(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Err(ctx.raise_kind(ExcKind::TypeError, "unhashable type: 'list'"))
}

fn unhashable_dict(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Err(ctx.raise_kind(ExcKind::TypeError, "unhashable type: 'dict'"))
}

fn unhashable_set(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Err(ctx.raise_kind(ExcKind::TypeError, "unhashable type: 'set'"))
}

// ----------------------------------------------------------------------
// dict
// ----------------------------------------------------------------------

fn expect_dict_arg(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<()> {
    if matches!(ctx.heap.get(argv[index]).payload, ObjPayload::Dict(_)) {
        Ok(())
    } else {
        Err(arg_type_error(ctx, index, "dict"))
    }
}

fn map_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;

    let attrs = ctx.class_instance_attrs(ctx.builtins.dict_class);
    {
        let obj = ctx.heap.get_mut(argv[0]);
        obj.attrs = attrs;
        obj.payload = ObjPayload::Dict(Box::new(crate::dict::Dict::new()));
        obj.type_name = ctx.tags.map.clone();
    }

    if argv.len() == 2 {
        let source = if matches!(ctx.heap.get(argv[1]).payload, ObjPayload::Dict(_)) {
            ctx.call_method(argv[1], "items", &[], None)?
        } else {
            argv[1]
        };
        let target = argv[0];
        ctx.iterate(source, &mut |ctx, pair| {
            let kv = ctx.unpack(pair, 2)?;
            ctx.dict_set(target, kv[0], kv[1])?;
            Ok(true)
        })?;
    }

    if let Some(kwargs) = ctx.kwargs() {
        let entries = ctx.dict_entries(kwargs);
        for entry in entries {
            ctx.dict_set(argv[0], entry.key, entry.value)?;
        }
    }

    Ok(ctx.none())
}

fn map_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    let empty = ctx.dict_entries(argv[0]).is_empty();
    Ok(ctx.new_bool(!empty))
}

fn map_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    if ctx.repr_stack.contains(&argv[0]) {
        return ctx.new_str("{...}");
    }

    ctx.repr_stack.push(argv[0]);
    let result = (|| {
        let entries = ctx.dict_entries(argv[0]);
        let mut parts = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = ctx.repr_of(entry.key)?;
            let value = ctx.repr_of(entry.value)?;
            parts.push(format!("{key}: {value}"));
        }
        let text = format!("{{{}}}", parts.join(", "));
        ctx.new_str(&text)
    })();
    ctx.repr_stack.pop();
    result
}

/// Dicts are equal when they hold equal values under equal keys,
/// regardless of insertion order.
fn map_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_dict_arg(ctx, argv, 0)?;
    if !matches!(ctx.heap.get(argv[1]).payload, ObjPayload::Dict(_)) {
        return Ok(ctx.new_bool(false));
    }
    let lhs = ctx.dict_entries(argv[0]);
    let rhs_len = ctx.dict_entries(argv[1]).len();
    if lhs.len() != rhs_len {
        return Ok(ctx.new_bool(false));
    }
    for entry in lhs {
        match ctx.dict_get(argv[1], entry.key)? {
            Some(value) if ctx.obj_eq(entry.value, value)? => {}
            _ => return Ok(ctx.new_bool(false)),
        }
    }
    Ok(ctx.new_bool(true))
}

fn map_contains(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_dict_arg(ctx, argv, 0)?;
    let contained = ctx.dict_contains(argv[0], argv[1])?;
    Ok(ctx.new_bool(contained))
}

fn map_getitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_dict_arg(ctx, argv, 0)?;
    match ctx.dict_get(argv[0], argv[1])? {
        Some(value) => Ok(value),
        None => {
            let key_repr = ctx.repr_of(argv[1])?;
            Err(ctx.raise_kind(ExcKind::KeyError, &key_repr))
        }
    }
}

fn map_setitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 3)?;
    expect_dict_arg(ctx, argv, 0)?;
    ctx.dict_set(argv[0], argv[1], argv[2])?;
    Ok(ctx.none())
}

fn map_len(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    let len = ctx.dict_entries(argv[0]).len() as i64;
    ctx.new_int(len)
}

fn map_clear(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    if let ObjPayload::Dict(dict) = &mut ctx.heap.get_mut(argv[0]).payload {
        dict.clear();
    }
    Ok(ctx.none())
}

fn map_copy(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    let entries = ctx.dict_entries(argv[0]);
    let copy = ctx.new_dict()?;
    // Hashes are already computed; copy slots without re-entering __hash__.
    if let ObjPayload::Dict(dict) = &mut ctx.heap.get_mut(copy).payload {
        for entry in entries {
            dict.insert_new(entry.hash, entry.key, entry.value);
        }
    }
    Ok(copy)
}

fn map_get(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 2, 3)?;
    expect_dict_arg(ctx, argv, 0)?;
    match ctx.dict_get(argv[0], argv[1])? {
        Some(value) => Ok(value),
        None if argv.len() == 3 => Ok(argv[2]),
        None => Ok(ctx.none()),
    }
}

fn container_iter(ctx: &mut Context, class_name: &str, target: ObjId) -> RunResult<ObjId> {
    let Some(class) = ctx.builtin_global(class_name) else {
        return Err(ctx.raise_kind(ExcKind::TypeError, "container is not iterable"));
    };
    ctx.call(class, &[target], None)
}

fn map_keys(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    container_iter(ctx, "__DictKeysIter", argv[0])
}

fn map_values(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    container_iter(ctx, "__DictValuesIter", argv[0])
}

fn map_items(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    container_iter(ctx, "__DictItemsIter", argv[0])
}

fn map_pop(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 2, 3)?;
    expect_dict_arg(ctx, argv, 0)?;
    match ctx.dict_remove(argv[0], argv[1])? {
        Some(value) => Ok(value),
        None if argv.len() == 3 => Ok(argv[2]),
        None => {
            let key_repr = ctx.repr_of(argv[1])?;
            Err(ctx.raise_kind(ExcKind::KeyError, &key_repr))
        }
    }
}

fn map_popitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_dict_arg(ctx, argv, 0)?;
    let popped = match &mut ctx.heap.get_mut(argv[0]).payload {
        ObjPayload::Dict(dict) => dict.pop_last(),
        _ => None,
    };
    match popped {
        Some(entry) => ctx.new_tuple(&[entry.key, entry.value]),
        None => Err(ctx.raise_kind(ExcKind::KeyError, "popitem(): dictionary is empty")),
    }
}

fn map_setdefault(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 2, 3)?;
    expect_dict_arg(ctx, argv, 0)?;
    if let Some(value) = ctx.dict_get(argv[0], argv[1])? {
        return Ok(value);
    }
    let default = if argv.len() == 3 { argv[2] } else { ctx.none() };
    ctx.dict_set(argv[0], argv[1], default)?;
    Ok(default)
}

fn map_update(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_dict_arg(ctx, argv, 0)?;
    expect_dict_arg(ctx, argv, 1)?;
    let entries = ctx.dict_entries(argv[1]);
    for entry in entries {
        ctx.dict_set(argv[0], entry.key, entry.value)?;
    }
    Ok(ctx.none())
}

// ----------------------------------------------------------------------
// set
// ----------------------------------------------------------------------

fn expect_set_arg(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<()> {
    if matches!(ctx.heap.get(argv[index]).payload, ObjPayload::Set(_)) {
        Ok(())
    } else {
        Err(arg_type_error(ctx, index, "set"))
    }
}

fn set_keys(ctx: &Context, id: ObjId) -> Vec<ObjId> {
    match &ctx.heap.get(id).payload {
        ObjPayload::Set(set) => set.iter().collect(),
        _ => Vec::new(),
    }
}

fn set_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;

    let attrs = ctx.class_instance_attrs(ctx.builtins.set_class);
    {
        let obj = ctx.heap.get_mut(argv[0]);
        obj.attrs = attrs;
        obj.payload = ObjPayload::Set(Box::new(crate::dict::Set::new()));
        obj.type_name = ctx.tags.set.clone();
    }

    if argv.len() == 2 {
        let target = argv[0];
        ctx.iterate(argv[1], &mut |ctx, value| {
            ctx.set_add(target, value)?;
            Ok(true)
        })?;
    }
    Ok(ctx.none())
}

fn set_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    let empty = set_keys(ctx, argv[0]).is_empty();
    Ok(ctx.new_bool(!empty))
}

fn set_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    if ctx.repr_stack.contains(&argv[0]) {
        return ctx.new_str("{...}");
    }

    let keys = set_keys(ctx, argv[0]);
    if keys.is_empty() {
        return ctx.new_str("set()");
    }

    ctx.repr_stack.push(argv[0]);
    let result = (|| {
        let mut parts = Vec::with_capacity(keys.len());
        for key in keys {
            parts.push(ctx.repr_of(key)?);
        }
        let text = format!("{{{}}}", parts.join(", "));
        ctx.new_str(&text)
    })();
    ctx.repr_stack.pop();
    result
}

/// Sets are equal when they contain each other, regardless of order.
fn set_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    if !matches!(ctx.heap.get(argv[1]).payload, ObjPayload::Set(_)) {
        return Ok(ctx.new_bool(false));
    }
    if set_keys(ctx, argv[0]).len() != set_keys(ctx, argv[1]).len() {
        return Ok(ctx.new_bool(false));
    }
    for key in set_keys(ctx, argv[0]) {
        if !ctx.set_contains(argv[1], key)? {
            return Ok(ctx.new_bool(false));
        }
    }
    Ok(ctx.new_bool(true))
}

fn set_contains_method(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    let contained = ctx.set_contains(argv[0], argv[1])?;
    Ok(ctx.new_bool(contained))
}

fn set_iter_method(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    container_iter(ctx, "__SetIter", argv[0])
}

fn set_len(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    let len = set_keys(ctx, argv[0]).len() as i64;
    ctx.new_int(len)
}

fn set_add_method(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    ctx.set_add(argv[0], argv[1])?;
    Ok(ctx.none())
}

fn set_clear(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    if let ObjPayload::Set(set) = &mut ctx.heap.get_mut(argv[0]).payload {
        set.clear();
    }
    Ok(ctx.none())
}

fn new_set_from(ctx: &mut Context, keys: &[ObjId]) -> RunResult<ObjId> {
    let set = ctx.new_set()?;
    ctx.protected.push(set);
    for &key in keys {
        if let Err(raised) = ctx.set_add(set, key) {
            ctx.protected.pop();
            return Err(raised);
        }
    }
    ctx.protected.pop();
    Ok(set)
}

fn set_copy(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    let keys = set_keys(ctx, argv[0]);
    new_set_from(ctx, &keys)
}

fn set_difference(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    let mut remaining = Vec::new();
    for key in set_keys(ctx, argv[0]) {
        if !ctx.set_contains(argv[1], key)? {
            remaining.push(key);
        }
    }
    new_set_from(ctx, &remaining)
}

fn set_discard_method(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    ctx.set_discard(argv[0], argv[1])?;
    Ok(ctx.none())
}

fn set_intersection(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    let mut common = Vec::new();
    for key in set_keys(ctx, argv[0]) {
        if ctx.set_contains(argv[1], key)? {
            common.push(key);
        }
    }
    new_set_from(ctx, &common)
}

fn set_isdisjoint(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    for key in set_keys(ctx, argv[0]) {
        if ctx.set_contains(argv[1], key)? {
            return Ok(ctx.new_bool(false));
        }
    }
    Ok(ctx.new_bool(true))
}

fn set_issubset(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    for key in set_keys(ctx, argv[0]) {
        if !ctx.set_contains(argv[1], key)? {
            return Ok(ctx.new_bool(false));
        }
    }
    Ok(ctx.new_bool(true))
}

fn set_issuperset(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    for key in set_keys(ctx, argv[1]) {
        if !ctx.set_contains(argv[0], key)? {
            return Ok(ctx.new_bool(false));
        }
    }
    Ok(ctx.new_bool(true))
}

fn set_pop(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    expect_set_arg(ctx, argv, 0)?;
    let popped = match &mut ctx.heap.get_mut(argv[0]).payload {
        ObjPayload::Set(set) => set.pop_last(),
        _ => None,
    };
    match popped {
        Some(key) => Ok(key),
        None => Err(ctx.raise_kind(ExcKind::KeyError, "pop from an empty set")),
    }
}

fn set_remove(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    if ctx.set_discard(argv[0], argv[1])? {
        Ok(ctx.none())
    } else {
        let key_repr = ctx.repr_of(argv[1])?;
        Err(ctx.raise_kind(ExcKind::KeyError, &key_repr))
    }
}

fn set_symmetric_difference(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    let mut keys = Vec::new();
    for key in set_keys(ctx, argv[0]) {
        if !ctx.set_contains(argv[1], key)? {
            keys.push(key);
        }
    }
    for key in set_keys(ctx, argv[1]) {
        if !ctx.set_contains(argv[0], key)? {
            keys.push(key);
        }
    }
    new_set_from(ctx, &keys)
}

fn set_union(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    expect_set_arg(ctx, argv, 1)?;
    let mut keys = set_keys(ctx, argv[0]);
    keys.extend(set_keys(ctx, argv[1]));
    new_set_from(ctx, &keys)
}

fn set_update(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    expect_set_arg(ctx, argv, 0)?;
    let target = argv[0];
    ctx.iterate(argv[1], &mut |ctx, value| {
        ctx.set_add(target, value)?;
        Ok(true)
    })?;
    Ok(ctx.none())
}
