//! Builtin types, functions, and the interpreted prelude.
//!
//! Bootstrap order matters: `object` and `function` are created raw (every
//! later function object aliases the function class's table), then `tuple`
//! and the `None` singleton, then the remaining builtin classes, native
//! free functions, and finally the prelude source executed under the
//! `__builtins__` module.

mod collections;
mod number;
mod string;

use std::{cell::RefCell, io::BufRead as _, rc::Rc};

use crate::{
    attr_table::AttrTable,
    context::Context,
    exceptions::{ExcKind, Raised, RunResult},
    heap::ObjId,
    object::{ClassData, NativeFn, ObjPayload},
};

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

pub(crate) fn arg_count_error(ctx: &mut Context, given: usize, expected: Option<usize>) -> Raised {
    let message = match expected {
        Some(expected) => format!(
            "Function takes {expected} argument(s) but {given} {} given",
            if given == 1 { "was" } else { "were" }
        ),
        None => format!("function does not take {given} argument(s)"),
    };
    ctx.raise_kind(ExcKind::TypeError, &message)
}

pub(crate) fn arg_type_error(ctx: &mut Context, index: usize, expected: &str) -> Raised {
    let message = format!("Argument {} Expected type {expected}", index + 1);
    ctx.raise_kind(ExcKind::TypeError, &message)
}

pub(crate) fn expect_count(ctx: &mut Context, argv: &[ObjId], n: usize) -> RunResult<()> {
    if argv.len() == n {
        Ok(())
    } else {
        Err(arg_count_error(ctx, argv.len(), Some(n)))
    }
}

pub(crate) fn expect_count_between(
    ctx: &mut Context,
    argv: &[ObjId],
    min: usize,
    max: usize,
) -> RunResult<()> {
    if argv.len() >= min && argv.len() <= max {
        Ok(())
    } else {
        Err(arg_count_error(ctx, argv.len(), None))
    }
}

pub(crate) fn int_arg(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<i64> {
    match ctx.heap.get(argv[index]).as_int() {
        Some(value) => Ok(value),
        None => Err(arg_type_error(ctx, index, "int")),
    }
}

pub(crate) fn float_arg(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<f64> {
    match ctx.heap.get(argv[index]).as_float() {
        Some(value) => Ok(value),
        None => Err(arg_type_error(ctx, index, "int or float")),
    }
}

pub(crate) fn str_arg(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<String> {
    match ctx.heap.get(argv[index]).as_str() {
        Some(value) => Ok(value.to_string()),
        None => Err(arg_type_error(ctx, index, "str")),
    }
}

/// Reads one keyword argument of the innermost call by name.
pub(crate) fn kwarg_get(ctx: &mut Context, name: &str) -> RunResult<Option<ObjId>> {
    let Some(kwargs) = ctx.kwargs() else {
        return Ok(None);
    };
    let key = ctx.new_str(name)?;
    ctx.dict_get(kwargs, key)
}

// ----------------------------------------------------------------------
// Index and slice helpers
// ----------------------------------------------------------------------

/// Normalizes a possibly negative index against a length. Bounds are not
/// checked here.
pub(crate) fn abs_index(ctx: &mut Context, length: i64, index: ObjId) -> RunResult<i64> {
    let Some(i) = ctx.heap.get(index).as_int() else {
        return Err(ctx.raise_kind(ExcKind::TypeError, "index must be an integer"));
    };
    Ok(if i < 0 { length + i } else { i })
}

/// Resolves a slice object's `start`/`stop`/`step` against a length,
/// defaulting omitted bounds by the step's direction.
pub(crate) fn resolve_slice(
    ctx: &mut Context,
    length: i64,
    slice: ObjId,
) -> RunResult<(i64, i64, i64)> {
    let step_attr = ctx.get_attribute(slice, "step")?;
    let step = if ctx.is_none(step_attr) {
        1
    } else {
        let Some(step) = ctx.heap.get(step_attr).as_int() else {
            return Err(ctx.raise_kind(
                ExcKind::TypeError,
                "slice step attribute must be an integer",
            ));
        };
        if step == 0 {
            return Err(ctx.raise_kind(ExcKind::ValueError, "slice step cannot be 0"));
        }
        step
    };

    let start_attr = ctx.get_attribute(slice, "start")?;
    let start = if ctx.is_none(start_attr) {
        if step < 0 {
            length - 1
        } else {
            0
        }
    } else {
        abs_index(ctx, length, start_attr)?
    };

    let stop_attr = ctx.get_attribute(slice, "stop")?;
    let stop = if ctx.is_none(stop_attr) {
        if step < 0 {
            -1
        } else {
            length
        }
    } else {
        abs_index(ctx, length, stop_attr)?
    };

    Ok((start, stop, step))
}

/// Visits `start`, `start+step`, … up to (exclusive) `stop`.
pub(crate) fn iterate_range(start: i64, stop: i64, step: i64, mut f: impl FnMut(i64)) {
    debug_assert!(step != 0);
    if step > 0 {
        let mut i = start;
        while i < stop {
            f(i);
            i += step;
        }
    } else {
        let mut i = start;
        while i > stop {
            f(i);
            i += step;
        }
    }
}

/// Whether an object is an instance of the builtin `slice` class.
pub(crate) fn is_slice(ctx: &Context, id: ObjId) -> bool {
    ctx.isinstance_of(id, &[ctx.builtins.slice_class]).is_some()
}

// ----------------------------------------------------------------------
// Registration helpers
// ----------------------------------------------------------------------

pub(crate) fn register_method(
    ctx: &mut Context,
    class_id: ObjId,
    name: &str,
    f: NativeFn,
) -> RunResult<()> {
    let func = ctx.new_native_function(f, name, None, true)?;
    let is_class = ctx.heap.get(class_id).is_class();
    if is_class {
        if let Some(class) = ctx.heap.get_mut(class_id).as_class_mut() {
            class.instance_attrs.set(Rc::from(name), func);
        }
    } else {
        ctx.heap.get_mut(class_id).attrs.set(Rc::from(name), func);
    }
    Ok(())
}

pub(crate) fn register_function(ctx: &mut Context, name: &str, f: NativeFn) -> RunResult<ObjId> {
    let func = ctx.new_function(f, name)?;
    ctx.set_global(name, func);
    Ok(func)
}

// ----------------------------------------------------------------------
// object methods
// ----------------------------------------------------------------------

fn object_self(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    Ok(argv[0])
}

fn object_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let obj = ctx.heap.get(argv[0]);
    let text = if let Some(class) = obj.as_class() {
        format!("<class '{}'>", class.name)
    } else {
        format!(
            "<{} object at 0x{:x}>",
            obj.type_display(),
            argv[0].index()
        )
    };
    ctx.new_str(&text)
}

fn object_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    Ok(ctx.new_bool(true))
}

fn object_repr(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    ctx.unary_op(crate::executor::UnOp::Str, argv[0])
}

fn object_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    Ok(ctx.new_bool(argv[0] == argv[1]))
}

fn object_ne(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let eq = ctx.binary_op(crate::executor::BinOp::Eq, argv[0], argv[1])?;
    let truthy = ctx.get_bool(eq).unwrap_or(false);
    Ok(ctx.new_bool(!truthy))
}

fn object_le(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lt = ctx.binary_op(crate::executor::BinOp::Lt, argv[0], argv[1])?;
    if ctx.get_bool(lt).unwrap_or(false) {
        return Ok(ctx.new_bool(true));
    }
    ctx.binary_op(crate::executor::BinOp::Eq, argv[0], argv[1])
}

fn object_ge(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lt = ctx.binary_op(crate::executor::BinOp::Lt, argv[0], argv[1])?;
    let truthy = ctx.get_bool(lt).unwrap_or(false);
    Ok(ctx.new_bool(!truthy))
}

fn object_gt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lt = ctx.binary_op(crate::executor::BinOp::Lt, argv[0], argv[1])?;
    if ctx.get_bool(lt).unwrap_or(false) {
        return Ok(ctx.new_bool(false));
    }
    let eq = ctx.binary_op(crate::executor::BinOp::Eq, argv[0], argv[1])?;
    let truthy = ctx.get_bool(eq).unwrap_or(false);
    Ok(ctx.new_bool(!truthy))
}

fn object_hash(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    // Identity hash: stable for the object's lifetime.
    let value = argv[0].index() as i64;
    ctx.new_int(value)
}

fn object_iter(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let Some(iter_class) = ctx.builtin_global("__DefaultIter") else {
        return Err(ctx.raise_kind(ExcKind::TypeError, "object is not iterable"));
    };
    ctx.call(iter_class, argv, None)
}

fn object_reversed(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let Some(iter_class) = ctx.builtin_global("__DefaultReverseIter") else {
        return Err(ctx.raise_kind(ExcKind::TypeError, "object is not reversible"));
    };
    ctx.call(iter_class, argv, None)
}

macro_rules! forward_inplace {
    ($name:ident, $dunder:literal) => {
        fn $name(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
            expect_count(ctx, argv, 2)?;
            ctx.call_method(argv[0], $dunder, &[argv[1]], None)
        }
    };
}

forward_inplace!(object_iadd, "__add__");
forward_inplace!(object_isub, "__sub__");
forward_inplace!(object_imul, "__mul__");
forward_inplace!(object_itruediv, "__truediv__");
forward_inplace!(object_ifloordiv, "__floordiv__");
forward_inplace!(object_imod, "__mod__");
forward_inplace!(object_ipow, "__pow__");
forward_inplace!(object_iand, "__and__");
forward_inplace!(object_ior, "__or__");
forward_inplace!(object_ixor, "__xor__");
forward_inplace!(object_ilshift, "__lshift__");
forward_inplace!(object_irshift, "__rshift__");

fn null_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    Ok(ctx.new_bool(false))
}

fn null_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    ctx.new_str("None")
}

// ----------------------------------------------------------------------
// Native constructors
// ----------------------------------------------------------------------

fn object_ctor(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 0)?;
    let attrs = ctx.class_instance_attrs(ctx.builtins.object);
    ctx.alloc(ctx.tags.object.clone(), ObjPayload::Instance, attrs)
}

fn none_ctor(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Ok(ctx.none())
}

fn bool_ctor(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 0, 1)?;
    if argv.is_empty() {
        return Ok(ctx.new_bool(false));
    }
    let truthy = ctx.unary_bool(argv[0])?;
    Ok(ctx.new_bool(truthy))
}

fn tuple_ctor(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 0, 1)?;
    let mut items = Vec::new();
    if let Some(&iterable) = argv.first() {
        let protect_base = ctx.protected.len();
        let result = ctx.iterate(iterable, &mut |ctx, value| {
            ctx.protected.push(value);
            items.push(value);
            Ok(true)
        });
        ctx.protected.truncate(protect_base);
        result?;
    }
    ctx.new_tuple(&items)
}

fn function_ctor(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Err(ctx.raise_kind(
        ExcKind::TypeError,
        "A function cannot be created directly",
    ))
}

/// Default `__init__` bound by `new_class`: forwards to the first base's
/// `__init__` so construction chains through the hierarchy.
pub(crate) fn class_default_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    if argv.is_empty() {
        return Err(arg_count_error(ctx, 0, None));
    }
    let Some(class_id) = ctx.fn_userdata() else {
        return Ok(ctx.none());
    };
    let first_base = ctx
        .heap
        .get(class_id)
        .as_class()
        .and_then(|class| class.bases.first().copied());
    let Some(base) = first_base else {
        return Ok(ctx.none());
    };

    if let Some(base_init) = ctx.get_attribute_from_base(argv[0], "__init__", Some(base)) {
        let kwargs = ctx.kwargs();
        let ret = ctx.call(base_init, &argv[1..], kwargs)?;
        if !ctx.is_none(ret) {
            return Err(ctx.raise_kind(
                ExcKind::TypeError,
                "__init__() returned a non NoneType type",
            ));
        }
    }
    Ok(ctx.none())
}

// ----------------------------------------------------------------------
// Dict and set iterator classes
//
// Iterators hold a slot cursor into the tombstoned storage, so they stay
// valid across interleaved insertions and deletions.
// ----------------------------------------------------------------------

fn container_iter_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let zero = ctx.new_int(0)?;
    ctx.set_attribute(argv[0], "_target", argv[1]);
    ctx.set_attribute(argv[0], "_slot", zero);
    Ok(ctx.none())
}

enum DictYield {
    Keys,
    Values,
    Items,
}

fn dict_iter_advance(ctx: &mut Context, argv: &[ObjId], yield_kind: &DictYield) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let target = ctx.get_attribute(argv[0], "_target")?;
    let slot_obj = ctx.get_attribute(argv[0], "_slot")?;
    let cursor = ctx.heap.get(slot_obj).as_int().unwrap_or(0).max(0) as u32;

    let next = match &ctx.heap.get(target).payload {
        ObjPayload::Dict(dict) => dict.next_slot(cursor),
        _ => return Err(arg_type_error(ctx, 0, "dict")),
    };
    let Some((slot, entry)) = next else {
        return Err(ctx.raise_kind(ExcKind::StopIteration, ""));
    };

    let next_cursor = ctx.new_int(i64::from(slot) + 1)?;
    ctx.set_attribute(argv[0], "_slot", next_cursor);
    match yield_kind {
        DictYield::Keys => Ok(entry.key),
        DictYield::Values => Ok(entry.value),
        DictYield::Items => ctx.new_tuple(&[entry.key, entry.value]),
    }
}

fn dict_keys_iter_next(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    dict_iter_advance(ctx, argv, &DictYield::Keys)
}

fn dict_values_iter_next(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    dict_iter_advance(ctx, argv, &DictYield::Values)
}

fn dict_items_iter_next(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    dict_iter_advance(ctx, argv, &DictYield::Items)
}

fn set_iter_next(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let target = ctx.get_attribute(argv[0], "_target")?;
    let slot_obj = ctx.get_attribute(argv[0], "_slot")?;
    let cursor = ctx.heap.get(slot_obj).as_int().unwrap_or(0).max(0) as u32;

    let next = match &ctx.heap.get(target).payload {
        ObjPayload::Set(set) => set.next_slot(cursor),
        _ => return Err(arg_type_error(ctx, 0, "set")),
    };
    let Some((slot, key)) = next else {
        return Err(ctx.raise_kind(ExcKind::StopIteration, ""));
    };
    let next_cursor = ctx.new_int(i64::from(slot) + 1)?;
    ctx.set_attribute(argv[0], "_slot", next_cursor);
    Ok(key)
}

// ----------------------------------------------------------------------
// File objects (gated by enable_os_access)
// ----------------------------------------------------------------------

enum FileHandle {
    Read(std::io::BufReader<std::fs::File>),
    Write(std::fs::File),
}

type FileSlot = RefCell<Option<FileHandle>>;

fn file_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 2, 3)?;
    if !ctx.config.enable_os_access {
        return Err(ctx.raise_kind(ExcKind::OSError, "OS access is disabled"));
    }
    let path = str_arg(ctx, argv, 1)?;
    let mode = if argv.len() == 3 {
        str_arg(ctx, argv, 2)?
    } else {
        "r".to_string()
    };

    if std::fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false) {
        return Err(ctx.raise_kind(ExcKind::IsADirectoryError, &path));
    }

    let handle = if mode.contains('w') || mode.contains('a') {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true);
        if mode.contains('a') {
            options.append(true);
        } else {
            options.truncate(true);
        }
        match options.open(&path) {
            Ok(file) => FileHandle::Write(file),
            Err(e) => return Err(ctx.raise_kind(ExcKind::OSError, &e.to_string())),
        }
    } else {
        match std::fs::File::open(&path) {
            Ok(file) => FileHandle::Read(std::io::BufReader::new(file)),
            Err(e) => return Err(ctx.raise_kind(ExcKind::OSError, &e.to_string())),
        }
    };

    ctx.set_userdata(argv[0], Box::new(RefCell::new(Some(handle)) as FileSlot));
    Ok(ctx.none())
}

/// Runs `f` against the object's file slot; `None` when the object does
/// not carry one. Keeps the heap borrow scoped to the callback.
fn with_file_slot<T>(
    ctx: &Context,
    id: ObjId,
    f: impl FnOnce(&FileSlot) -> T,
) -> Option<T> {
    ctx.heap
        .get(id)
        .userdata
        .as_ref()?
        .downcast_ref::<FileSlot>()
        .map(f)
}

fn file_read(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let text = with_file_slot(ctx, argv[0], |slot| {
        let mut guard = slot.borrow_mut();
        match guard.as_mut() {
            Some(FileHandle::Read(reader)) => {
                use std::io::Read as _;
                let mut text = String::new();
                reader.read_to_string(&mut text).ok();
                Some(text)
            }
            _ => None,
        }
    });
    match text {
        None => Err(arg_type_error(ctx, 0, "file")),
        Some(None) => Err(ctx.raise_kind(ExcKind::OSError, "File is not open for reading")),
        Some(Some(text)) => ctx.new_str(&text),
    }
}

fn file_readline(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let line = with_file_slot(ctx, argv[0], |slot| {
        let mut guard = slot.borrow_mut();
        match guard.as_mut() {
            Some(FileHandle::Read(reader)) => {
                let mut line = String::new();
                reader.read_line(&mut line).ok();
                Some(line)
            }
            _ => None,
        }
    });
    match line {
        None => Err(arg_type_error(ctx, 0, "file")),
        Some(None) => Err(ctx.raise_kind(ExcKind::OSError, "File is not open for reading")),
        Some(Some(line)) => ctx.new_str(&line),
    }
}

fn file_write(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let text = str_arg(ctx, argv, 1)?;
    let written = with_file_slot(ctx, argv[0], |slot| {
        let mut guard = slot.borrow_mut();
        match guard.as_mut() {
            Some(FileHandle::Write(file)) => {
                use std::io::Write as _;
                file.write_all(text.as_bytes()).is_ok()
            }
            _ => false,
        }
    });
    match written {
        None => Err(arg_type_error(ctx, 0, "file")),
        Some(false) => Err(ctx.raise_kind(ExcKind::OSError, "File is not open for writing")),
        Some(true) => ctx.new_int(text.len() as i64),
    }
}

fn file_close(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let closed = with_file_slot(ctx, argv[0], |slot| {
        slot.borrow_mut().take();
    });
    if closed.is_none() {
        return Err(arg_type_error(ctx, 0, "file"));
    }
    Ok(ctx.none())
}

fn file_exit(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 4)?;
    file_close(ctx, &argv[..1])
}

fn file_iter(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let Some(iter_class) = ctx.builtin_global("__ReadLineIter") else {
        return Err(ctx.raise_kind(ExcKind::TypeError, "file is not iterable"));
    };
    ctx.call(iter_class, argv, None)
}

// ----------------------------------------------------------------------
// Free functions
// ----------------------------------------------------------------------

fn lib_print(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    let sep = match kwarg_get(ctx, "sep")? {
        Some(v) if !ctx.is_none(v) => ctx.str_of(v)?,
        _ => " ".to_string(),
    };
    let end = match kwarg_get(ctx, "end")? {
        Some(v) if !ctx.is_none(v) => ctx.str_of(v)?,
        _ => "\n".to_string(),
    };

    let mut text = String::new();
    for (i, &arg) in argv.iter().enumerate() {
        text.push_str(&ctx.str_of(arg)?);
        if i < argv.len() - 1 {
            text.push_str(&sep);
        }
    }
    text.push_str(&end);
    ctx.print(&text);
    Ok(ctx.none())
}

fn lib_isinstance(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let classes: Vec<ObjId> = match &ctx.heap.get(argv[1]).payload {
        ObjPayload::Tuple(items) => items.clone(),
        _ => vec![argv[1]],
    };
    for &class in &classes {
        if !ctx.heap.get(class).is_class() {
            return Err(ctx.raise_kind(
                ExcKind::TypeError,
                "isinstance() arg 2 must be a class or tuple of classes",
            ));
        }
    }
    let result = ctx.isinstance_of(argv[0], &classes).is_some();
    Ok(ctx.new_bool(result))
}

fn lib_getattr(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let name = str_arg(ctx, argv, 1)?;
    ctx.get_attribute(argv[0], &name)
}

fn lib_setattr(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 3)?;
    let name = str_arg(ctx, argv, 1)?;
    ctx.set_attribute(argv[0], &name, argv[2]);
    Ok(ctx.none())
}

fn lib_id(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    ctx.new_int(argv[0].index() as i64)
}

fn lib_callable(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let obj = ctx.heap.get(argv[0]);
    let callable =
        obj.is_func() || obj.is_class() || ctx.heap.get(argv[0]).attrs.get("__call__").is_some();
    Ok(ctx.new_bool(callable))
}

fn lib_chr(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let code = int_arg(ctx, argv, 0)?;
    let c = u32::try_from(code).ok().and_then(char::from_u32);
    match c {
        Some(c) => ctx.new_str(&c.to_string()),
        None => Err(ctx.raise_kind(ExcKind::ValueError, "chr() arg not in range")),
    }
}

fn lib_ord(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => ctx.new_int(i64::from(u32::from(c))),
        (None, _) => Err(ctx.raise_kind(ExcKind::ValueError, "ord() arg is an empty string")),
        _ => Err(ctx.raise_kind(
            ExcKind::ValueError,
            "ord() arg is not a single character",
        )),
    }
}

fn format_in_base(value: i64, base: u32) -> String {
    let negative = value < 0;
    let magnitude = value.unsigned_abs();
    let digits = match base {
        2 => format!("0b{magnitude:b}"),
        8 => format!("0o{magnitude:o}"),
        _ => format!("0x{magnitude:x}"),
    };
    if negative {
        format!("-{digits}")
    } else {
        digits
    }
}

fn lib_bin(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    let text = format_in_base(value, 2);
    ctx.new_str(&text)
}

fn lib_oct(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    let text = format_in_base(value, 8);
    ctx.new_str(&text)
}

fn lib_hex(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    let text = format_in_base(value, 16);
    ctx.new_str(&text)
}

/// `round(x[, ndigits])`, rounding half away from zero.
fn lib_round(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let value = float_arg(ctx, argv, 0)?;

    let mut scale = 1.0;
    let mut digits_given = false;
    if argv.len() == 2 && !ctx.is_none(argv[1]) {
        let digits = int_arg(ctx, argv, 1)?;
        scale = 10f64.powi(digits as i32);
        digits_given = true;
    }

    let rounded = (value * scale).round() / scale;
    if !digits_given || ctx.heap.get(argv[0]).is_int() {
        ctx.new_int(rounded as i64)
    } else {
        ctx.new_float(rounded)
    }
}

fn lib_input(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 0, 1)?;
    if let Some(&prompt) = argv.first() {
        let text = ctx.str_of(prompt)?;
        ctx.print(&text);
    }
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok();
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    ctx.new_str(&line)
}

fn lib_eval(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let code = str_arg(ctx, argv, 0)?;
    let module = ctx.current_module();
    let function = ctx.compile_in_module(&code, &module, "<eval>", true)?;
    ctx.call(function, &[], None)
}

fn lib_exec(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let code = str_arg(ctx, argv, 0)?;
    let module = ctx.current_module();
    let function = ctx.compile_in_module(&code, &module, "<exec>", false)?;
    ctx.call(function, &[], None)?;
    Ok(ctx.none())
}

fn lib_exit(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Err(ctx.raise_kind(ExcKind::SystemExit, ""))
}

// ----------------------------------------------------------------------
// Bootstrap
// ----------------------------------------------------------------------

/// Creates a class object directly, without the `new_class` conveniences.
/// Used only for the handful of types that exist before `new_class` can.
fn raw_class(
    ctx: &mut Context,
    name: &str,
    native_ctor: NativeFn,
    with_class_entry: bool,
) -> RunResult<ObjId> {
    let module = ctx.current_module();
    let class_id = ctx.alloc(
        ctx.tags.class.clone(),
        ObjPayload::Class(Box::new(ClassData {
            name: Rc::from(name),
            module,
            bases: Vec::new(),
            instance_attrs: AttrTable::new(),
            native_ctor: Some(native_ctor),
        })),
        AttrTable::new(),
    )?;
    if with_class_entry {
        if let Some(class) = ctx.heap.get_mut(class_id).as_class_mut() {
            class.instance_attrs.set(Rc::from("__class__"), class_id);
        }
    }
    Ok(class_id)
}

fn chain_to_object(ctx: &mut Context, class_id: ObjId) {
    let object_table = ctx
        .heap
        .get(ctx.builtins.object)
        .as_class()
        .map(|c| c.instance_attrs.copy());
    let Some(object_table) = object_table else {
        return;
    };
    let obj = ctx.heap.get_mut(class_id);
    if let Some(class) = obj.as_class_mut() {
        class.instance_attrs.add_parent(&object_table);
    }
    obj.attrs.add_parent(&object_table);
}

/// Loader for the `__builtins__` module: builds the type system, registers
/// the native functions, runs the prelude, and fills the builtin registry.
pub(crate) fn import_builtins(ctx: &mut Context) -> RunResult<()> {
    // The object class is self-parenting: its own class-object attributes
    // resolve through its instance table.
    let object = raw_class(ctx, "object", object_ctor, true)?;
    ctx.builtins.object = object;
    let object_table = ctx
        .heap
        .get(object)
        .as_class()
        .map(|c| c.instance_attrs.copy());
    if let Some(table) = &object_table {
        ctx.heap.get_mut(object).attrs.add_parent(table);
    }
    ctx.set_global("object", object);

    let func_class = raw_class(ctx, "function", function_ctor, true)?;
    ctx.builtins.func_class = func_class;
    chain_to_object(ctx, func_class);

    let tuple_class = raw_class(ctx, "tuple", tuple_ctor, true)?;
    ctx.builtins.tuple_class = tuple_class;
    chain_to_object(ctx, tuple_class);
    ctx.set_global("tuple", tuple_class);

    let none_type = raw_class(ctx, "NoneType", none_ctor, false)?;
    ctx.builtins.none_type = none_type;
    chain_to_object(ctx, none_type);

    // The None singleton is its own __class__; it carries its methods on
    // its own attribute table.
    let none = ctx.alloc(ctx.tags.null.clone(), ObjPayload::Null, AttrTable::new())?;
    ctx.builtins.none = none;
    ctx.set_attribute(none, "__class__", none);
    if let Some(table) = &object_table {
        ctx.heap.get_mut(none).attrs.add_parent(table);
    }
    register_method(ctx, none, "__nonzero__", null_nonzero)?;
    register_method(ctx, none, "__str__", null_str)?;

    let empty_tuple = ctx.new_tuple(&[])?;
    ctx.set_attribute(object, "__bases__", empty_tuple);
    let object_tuple = ctx.new_tuple(&[object])?;
    ctx.set_attribute(none, "__bases__", object_tuple);
    ctx.set_attribute(func_class, "__bases__", object_tuple);
    ctx.set_attribute(tuple_class, "__bases__", object_tuple);

    register_method(ctx, object, "__pos__", object_self)?;
    register_method(ctx, object, "__str__", object_str)?;
    register_method(ctx, object, "__nonzero__", object_nonzero)?;
    register_method(ctx, object, "__repr__", object_repr)?;
    register_method(ctx, object, "__eq__", object_eq)?;
    register_method(ctx, object, "__ne__", object_ne)?;
    register_method(ctx, object, "__le__", object_le)?;
    register_method(ctx, object, "__gt__", object_gt)?;
    register_method(ctx, object, "__ge__", object_ge)?;
    register_method(ctx, object, "__iadd__", object_iadd)?;
    register_method(ctx, object, "__isub__", object_isub)?;
    register_method(ctx, object, "__imul__", object_imul)?;
    register_method(ctx, object, "__itruediv__", object_itruediv)?;
    register_method(ctx, object, "__ifloordiv__", object_ifloordiv)?;
    register_method(ctx, object, "__imod__", object_imod)?;
    register_method(ctx, object, "__ipow__", object_ipow)?;
    register_method(ctx, object, "__iand__", object_iand)?;
    register_method(ctx, object, "__ior__", object_ior)?;
    register_method(ctx, object, "__ixor__", object_ixor)?;
    register_method(ctx, object, "__ilshift__", object_ilshift)?;
    register_method(ctx, object, "__irshift__", object_irshift)?;
    register_method(ctx, object, "__hash__", object_hash)?;
    register_method(ctx, object, "__iter__", object_iter)?;
    register_method(ctx, object, "__reversed__", object_reversed)?;

    number::install(ctx)?;
    string::install(ctx)?;
    collections::install(ctx)?;

    // Tuple methods come after the collections so they can share natives.
    register_method(ctx, tuple_class, "__mul__", collections::tuple_mul)?;
    register_method(ctx, tuple_class, "__iter__", object_iter)?;
    register_method(ctx, tuple_class, "__str__", collections::tuple_str)?;
    register_method(ctx, tuple_class, "__getitem__", collections::tuple_getitem)?;
    register_method(ctx, tuple_class, "__len__", collections::tuple_len)?;
    register_method(ctx, tuple_class, "__contains__", collections::tuple_contains)?;
    register_method(ctx, tuple_class, "__eq__", collections::tuple_eq)?;
    register_method(ctx, tuple_class, "__lt__", collections::tuple_lt)?;
    register_method(ctx, tuple_class, "__nonzero__", collections::tuple_nonzero)?;
    register_method(ctx, tuple_class, "__hash__", collections::tuple_hash)?;
    register_method(ctx, tuple_class, "count", collections::tuple_count)?;
    register_method(ctx, tuple_class, "index", collections::tuple_index)?;

    // Iterator classes over dict and set storage.
    let dict_keys_iter = ctx.new_class("__DictKeysIter", &[])?;
    register_method(ctx, dict_keys_iter, "__init__", container_iter_init)?;
    register_method(ctx, dict_keys_iter, "__next__", dict_keys_iter_next)?;
    register_method(ctx, dict_keys_iter, "__iter__", object_self)?;
    ctx.set_global("__DictKeysIter", dict_keys_iter);

    let dict_values_iter = ctx.new_class("__DictValuesIter", &[])?;
    register_method(ctx, dict_values_iter, "__init__", container_iter_init)?;
    register_method(ctx, dict_values_iter, "__next__", dict_values_iter_next)?;
    register_method(ctx, dict_values_iter, "__iter__", object_self)?;
    ctx.set_global("__DictValuesIter", dict_values_iter);

    let dict_items_iter = ctx.new_class("__DictItemsIter", &[])?;
    register_method(ctx, dict_items_iter, "__init__", container_iter_init)?;
    register_method(ctx, dict_items_iter, "__next__", dict_items_iter_next)?;
    register_method(ctx, dict_items_iter, "__iter__", object_self)?;
    ctx.set_global("__DictItemsIter", dict_items_iter);

    let set_iter = ctx.new_class("__SetIter", &[])?;
    register_method(ctx, set_iter, "__init__", container_iter_init)?;
    register_method(ctx, set_iter, "__next__", set_iter_next)?;
    register_method(ctx, set_iter, "__iter__", object_self)?;
    ctx.set_global("__SetIter", set_iter);

    let file_class = ctx.new_class("__File", &[])?;
    ctx.builtins.file_class = file_class;
    register_method(ctx, file_class, "__init__", file_init)?;
    register_method(ctx, file_class, "__iter__", file_iter)?;
    register_method(ctx, file_class, "__enter__", object_self)?;
    register_method(ctx, file_class, "__exit__", file_exit)?;
    register_method(ctx, file_class, "read", file_read)?;
    register_method(ctx, file_class, "readline", file_readline)?;
    register_method(ctx, file_class, "write", file_write)?;
    register_method(ctx, file_class, "close", file_close)?;
    if ctx.config.enable_os_access {
        ctx.set_global("open", file_class);
    }

    ctx.builtins.isinstance = register_function(ctx, "isinstance", lib_isinstance)?;
    register_function(ctx, "print", lib_print)?;
    register_function(ctx, "getattr", lib_getattr)?;
    register_function(ctx, "setattr", lib_setattr)?;
    register_function(ctx, "id", lib_id)?;
    register_function(ctx, "callable", lib_callable)?;
    register_function(ctx, "chr", lib_chr)?;
    register_function(ctx, "ord", lib_ord)?;
    register_function(ctx, "bin", lib_bin)?;
    register_function(ctx, "oct", lib_oct)?;
    register_function(ctx, "hex", lib_hex)?;
    register_function(ctx, "round", lib_round)?;
    register_function(ctx, "input", lib_input)?;
    register_function(ctx, "eval", lib_eval)?;
    register_function(ctx, "exec", lib_exec)?;
    register_function(ctx, "exit", lib_exit)?;
    register_function(ctx, "quit", lib_exit)?;

    // The rest of the builtins are ordinary interpreted code.
    let prelude = ctx.compile_in_module(PRELUDE, "__builtins__", "__builtins__", false)?;
    ctx.call(prelude, &[], None)?;

    let fetch = |ctx: &Context, name: &str| ctx.builtin_global(name).unwrap_or(ObjId::INVALID);
    ctx.builtins.len = fetch(ctx, "len");
    ctx.builtins.repr = fetch(ctx, "repr");
    ctx.builtins.hash = fetch(ctx, "hash");
    ctx.builtins.slice_class = fetch(ctx, "slice");
    ctx.builtins.base_exception = fetch(ctx, "BaseException");
    ctx.builtins.stop_iteration = fetch(ctx, "StopIteration");
    ctx.builtins.system_exit = fetch(ctx, "SystemExit");

    ctx.builtins.module_class = ctx.new_class("ModuleObject", &[])?;

    let memory_error = fetch(ctx, "MemoryError");
    ctx.builtins.memory_error_instance = ctx.call(memory_error, &[], None)?;
    let recursion_error = fetch(ctx, "RecursionError");
    ctx.builtins.recursion_error_instance = ctx.call(recursion_error, &[], None)?;

    Ok(())
}

/// Builtins that are most naturally written in the language itself. Runs
/// under the `__builtins__` module at context creation.
const PRELUDE: &str = r#"
class __DefaultIter:
    def __init__(self, iterable):
        self.iterable = iterable
        self.i = 0
    def __next__(self):
        try:
            val = self.iterable[self.i]
        except IndexError:
            raise StopIteration
        self.i += 1
        return val
    def __iter__(self):
        return self

class __DefaultReverseIter:
    def __init__(self, iterable):
        self.iterable = iterable
        self.i = len(iterable) - 1
    def __next__(self):
        if self.i >= 0:
            val = self.iterable[self.i]
            self.i -= 1
            return val
        raise StopIteration
    def __iter__(self):
        return self

class __RangeIter:
    def __init__(self, start, stop, step):
        self.cur = start
        self.stop = stop
        self.step = step
    def __next__(self):
        cur = self.cur
        if self.step > 0:
            if cur >= self.stop:
                raise StopIteration
        else:
            if cur <= self.stop:
                raise StopIteration
        self.cur = cur + self.step
        return cur
    def __iter__(self):
        return self

class __ReadLineIter:
    def __init__(self, f):
        self.f = f
    def __next__(self):
        line = self.f.readline()
        if line == "":
            raise StopIteration
        return line
    def __iter__(self):
        return self

def abs(x):
    return x.__abs__()

def all(x):
    for v in x:
        if not v:
            return False
    return True

def any(x):
    for v in x:
        if v:
            return True
    return False

def divmod(a, b):
    return (a // b, a % b)

class enumerate:
    def __init__(self, x, start=0):
        self.iter = iter(x)
        self.i = start
    def __iter__(self):
        return self
    def __next__(self):
        i = self.i
        self.i += 1
        return (i, next(self.iter))

class filter:
    def __init__(self, f, iterable):
        self.f = f
        self.iter = iter(iterable)
    def __iter__(self):
        return self
    def __next__(self):
        while True:
            val = next(self.iter)
            if self.f(val):
                return val

def hasattr(obj, name):
    try:
        getattr(obj, name)
        return True
    except AttributeError:
        return False

def hash(x):
    v = x.__hash__()
    if not isinstance(v, int):
        raise TypeError("__hash__() returned a non integer type")
    return v

def iter(x):
    return x.__iter__()

def len(x):
    v = x.__len__()
    if not isinstance(v, int):
        raise TypeError("__len__() returned a non integer type")
    elif v < 0:
        raise ValueError("__len__() returned a negative value")
    return v

class map:
    def __init__(self, f, iterable):
        self.f = f
        self.iter = iter(iterable)
    def __iter__(self):
        return self
    def __next__(self):
        return self.f(next(self.iter))

def max(*args, **kwargs):
    if len(args) == 1:
        args = list(args[0])
    else:
        args = list(args)

    if len(args) == 0:
        if "default" in kwargs:
            return kwargs["default"]
        raise ValueError("max() arg is an empty sequence")

    if "key" in kwargs:
        key = kwargs["key"]
    else:
        key = lambda x: x

    m = args[0]
    for i in range(1, len(args)):
        if key(args[i]) > key(m):
            m = args[i]
    return m

def min(*args, **kwargs):
    if len(args) == 1:
        args = list(args[0])
    else:
        args = list(args)

    if len(args) == 0:
        if "default" in kwargs:
            return kwargs["default"]
        raise ValueError("min() arg is an empty sequence")

    if "key" in kwargs:
        key = kwargs["key"]
    else:
        key = lambda x: x

    m = args[0]
    for i in range(1, len(args)):
        if key(args[i]) < key(m):
            m = args[i]
    return m

def next(x):
    return x.__next__()

def pow(x, y):
    return x ** y

class range:
    def __init__(self, start, stop=None, step=None):
        if stop == None:
            if not isinstance(start, int):
                raise TypeError("stop must be an integer")
            self.start = 0
            self.stop = start
            self.step = 1
        elif step is None:
            if not isinstance(start, int):
                raise TypeError("start must be an integer")
            elif not isinstance(stop, int):
                raise TypeError("stop must be an integer")
            self.start = start
            self.stop = stop
            self.step = 1
        else:
            if not isinstance(start, int):
                raise TypeError("start must be an integer")
            elif not isinstance(stop, int):
                raise TypeError("stop must be an integer")
            elif not isinstance(step, int):
                raise TypeError("step must be an integer")
            elif step == 0:
                raise ValueError("step cannot be 0")
            self.start = start
            self.stop = stop
            self.step = step
    def __iter__(self):
        return __RangeIter(self.start, self.stop, self.step)
    def __reversed__(self):
        return range(self.stop - self.step, self.start - self.step, -self.step)

def repr(x):
    v = x.__repr__()
    if not isinstance(v, str):
        raise TypeError("__repr__() returned a non string type")
    return v

def reversed(x):
    return x.__reversed__()

class slice:
    def __init__(self, start, stop=None, step=None):
        if stop is None and step is None:
            self.start = None
            self.stop = start
            self.step = None
        elif step is None:
            self.start = start
            self.stop = stop
            self.step = None
        else:
            self.start = start
            self.stop = stop
            self.step = step
    def __index__(self):
        return self

def sorted(iterable, key=None, reverse=False):
    li = list(iterable)
    li.sort(key=key, reverse=reverse)
    return li

def sum(iterable, start=0):
    n = start
    for i in iterable:
        n += i
    return n

def type(x):
    return x.__class__

class zip:
    def __init__(self, *iterables):
        self.iters = [iter(i) for i in iterables]
    def __iter__(self):
        return self
    def __next__(self):
        return tuple([next(i) for i in self.iters])

class BaseException:
    def __init__(self, message=""):
        self._message = message
    def __str__(self):
        return self._message

class SystemExit(BaseException):
    pass

class Exception(BaseException):
    pass

class StopIteration(Exception):
    pass

class ArithmeticError(Exception):
    pass

class OverflowError(ArithmeticError):
    pass

class ZeroDivisionError(ArithmeticError):
    pass

class AttributeError(Exception):
    pass

class ImportError(Exception):
    pass

class LookupError(Exception):
    pass

class IndexError(LookupError):
    pass

class KeyError(LookupError):
    pass

class MemoryError(Exception):
    pass

class NameError(Exception):
    pass

class OSError(Exception):
    pass

class IsADirectoryError(OSError):
    pass

class RuntimeError(Exception):
    pass

class NotImplementedError(RuntimeError):
    pass

class RecursionError(RuntimeError):
    pass

class SyntaxError(Exception):
    pass

class TypeError(Exception):
    pass

class ValueError(Exception):
    pass
"#;
