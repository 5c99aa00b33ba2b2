//! Numeric builtin classes: bool, int, float.
//!
//! Division semantics: `/` always yields a float, `//` rounds toward
//! negative infinity, and `%` takes the sign of the divisor, so
//! `a == (a // b) * b + a % b` holds for nonzero divisors.

use crate::{
    builtins::{
        arg_type_error, expect_count, expect_count_between, int_arg, register_method,
    },
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
    object::ObjPayload,
};

pub(super) fn install(ctx: &mut Context) -> RunResult<()> {
    let bool_class = ctx.new_class("bool", &[])?;
    ctx.builtins.bool_class = bool_class;
    if let Some(class) = ctx.heap.get_mut(bool_class).as_class_mut() {
        class.native_ctor = Some(super::bool_ctor);
    }
    ctx.set_global("bool", bool_class);
    register_method(ctx, bool_class, "__nonzero__", super::object_self)?;
    register_method(ctx, bool_class, "__int__", bool_int)?;
    register_method(ctx, bool_class, "__float__", bool_float)?;
    register_method(ctx, bool_class, "__str__", bool_str)?;
    register_method(ctx, bool_class, "__eq__", bool_eq)?;
    register_method(ctx, bool_class, "__hash__", bool_hash)?;
    register_method(ctx, bool_class, "__abs__", bool_abs)?;

    let true_ = ctx.alloc(
        ctx.tags.bool_.clone(),
        ObjPayload::Bool(true),
        ctx.class_instance_attrs(bool_class),
    )?;
    ctx.builtins.true_ = true_;
    let false_ = ctx.alloc(
        ctx.tags.bool_.clone(),
        ObjPayload::Bool(false),
        ctx.class_instance_attrs(bool_class),
    )?;
    ctx.builtins.false_ = false_;

    let int_class = ctx.new_class("int", &[])?;
    ctx.builtins.int_class = int_class;
    ctx.set_global("int", int_class);
    register_method(ctx, int_class, "__init__", int_init)?;
    register_method(ctx, int_class, "__nonzero__", int_nonzero)?;
    register_method(ctx, int_class, "__int__", super::object_self)?;
    register_method(ctx, int_class, "__float__", int_float)?;
    register_method(ctx, int_class, "__str__", int_str)?;
    register_method(ctx, int_class, "__index__", super::object_self)?;
    register_method(ctx, int_class, "__neg__", int_neg)?;
    register_method(ctx, int_class, "__add__", int_add)?;
    register_method(ctx, int_class, "__sub__", int_sub)?;
    register_method(ctx, int_class, "__mul__", int_mul)?;
    register_method(ctx, int_class, "__truediv__", int_truediv)?;
    register_method(ctx, int_class, "__floordiv__", int_floordiv)?;
    register_method(ctx, int_class, "__mod__", int_mod)?;
    register_method(ctx, int_class, "__pow__", int_pow)?;
    register_method(ctx, int_class, "__and__", int_and)?;
    register_method(ctx, int_class, "__or__", int_or)?;
    register_method(ctx, int_class, "__xor__", int_xor)?;
    register_method(ctx, int_class, "__invert__", int_invert)?;
    register_method(ctx, int_class, "__lshift__", int_lshift)?;
    register_method(ctx, int_class, "__rshift__", int_rshift)?;
    register_method(ctx, int_class, "__lt__", int_lt)?;
    register_method(ctx, int_class, "__eq__", int_eq)?;
    register_method(ctx, int_class, "__hash__", int_hash)?;
    register_method(ctx, int_class, "__abs__", int_abs)?;
    register_method(ctx, int_class, "bit_length", int_bit_length)?;
    register_method(ctx, int_class, "bit_count", int_bit_count)?;

    let float_class = ctx.new_class("float", &[])?;
    ctx.builtins.float_class = float_class;
    ctx.set_global("float", float_class);
    register_method(ctx, float_class, "__init__", float_init)?;
    register_method(ctx, float_class, "__nonzero__", float_nonzero)?;
    register_method(ctx, float_class, "__int__", float_int)?;
    register_method(ctx, float_class, "__float__", super::object_self)?;
    register_method(ctx, float_class, "__str__", float_str)?;
    register_method(ctx, float_class, "__neg__", float_neg)?;
    register_method(ctx, float_class, "__add__", float_add)?;
    register_method(ctx, float_class, "__sub__", float_sub)?;
    register_method(ctx, float_class, "__mul__", float_mul)?;
    register_method(ctx, float_class, "__truediv__", float_truediv)?;
    register_method(ctx, float_class, "__floordiv__", float_floordiv)?;
    register_method(ctx, float_class, "__mod__", float_mod)?;
    register_method(ctx, float_class, "__pow__", float_pow)?;
    register_method(ctx, float_class, "__lt__", float_lt)?;
    register_method(ctx, float_class, "__eq__", float_eq)?;
    register_method(ctx, float_class, "__hash__", float_hash)?;
    register_method(ctx, float_class, "__abs__", float_abs)?;
    register_method(ctx, float_class, "is_integer", float_is_integer)?;

    Ok(())
}

// ----------------------------------------------------------------------
// bool
// ----------------------------------------------------------------------

fn bool_value(ctx: &mut Context, argv: &[ObjId], index: usize) -> RunResult<bool> {
    match ctx.heap.get(argv[index]).as_bool() {
        Some(b) => Ok(b),
        None => Err(arg_type_error(ctx, index, "bool")),
    }
}

fn bool_int(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let b = bool_value(ctx, argv, 0)?;
    ctx.new_int(i64::from(b))
}

fn bool_float(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let b = bool_value(ctx, argv, 0)?;
    ctx.new_float(if b { 1.0 } else { 0.0 })
}

fn bool_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let b = bool_value(ctx, argv, 0)?;
    ctx.new_str(if b { "True" } else { "False" })
}

fn bool_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = bool_value(ctx, argv, 0)?;
    let rhs = ctx.heap.get(argv[1]).as_bool();
    Ok(ctx.new_bool(rhs == Some(lhs)))
}

fn bool_hash(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let b = bool_value(ctx, argv, 0)?;
    ctx.new_int(i64::from(b))
}

fn bool_abs(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let b = bool_value(ctx, argv, 0)?;
    ctx.new_int(i64::from(b))
}

// ----------------------------------------------------------------------
// int
// ----------------------------------------------------------------------

fn int_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 3)?;
    let mut value = 0;
    if argv.len() >= 2 {
        let result = ctx.call_method(argv[1], "__int__", &argv[2..], None)?;
        let Some(converted) = ctx.heap.get(result).as_int() else {
            return Err(ctx.raise_kind(ExcKind::TypeError, "__int__() returned a non int type"));
        };
        value = converted;
    }

    let attrs = ctx.class_instance_attrs(ctx.builtins.int_class);
    let obj = ctx.heap.get_mut(argv[0]);
    obj.attrs = attrs;
    obj.payload = ObjPayload::Int(value);
    obj.type_name = ctx.tags.int.clone();
    Ok(ctx.none())
}

fn int_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(value != 0))
}

fn int_float(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_float(value as f64)
}

fn int_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_str(&value.to_string())
}

fn int_neg(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_int(value.wrapping_neg())
}

fn int_abs(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_int(value.wrapping_abs())
}

fn int_add(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    if let Some(rhs) = ctx.heap.get(argv[1]).as_int() {
        return ctx.new_int(lhs.wrapping_add(rhs));
    }
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs as f64 + rhs)
}

fn int_sub(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    if let Some(rhs) = ctx.heap.get(argv[1]).as_int() {
        return ctx.new_int(lhs.wrapping_sub(rhs));
    }
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs as f64 - rhs)
}

fn int_mul(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    if let Some(s) = ctx.heap.get(argv[1]).as_str() {
        let repeated = s.repeat(usize::try_from(lhs).unwrap_or(0));
        return ctx.new_str(&repeated);
    }
    if let Some(rhs) = ctx.heap.get(argv[1]).as_int() {
        return ctx.new_int(lhs.wrapping_mul(rhs));
    }
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs as f64 * rhs)
}

fn int_truediv(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    if rhs == 0.0 {
        return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
    }
    ctx.new_float(lhs as f64 / rhs)
}

/// Floored quotient for i64 operands.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Remainder matching floored division: takes the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

fn int_floordiv(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    if let Some(rhs) = ctx.heap.get(argv[1]).as_int() {
        if rhs == 0 {
            return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
        }
        return ctx.new_int(floor_div(lhs, rhs));
    }
    let rhs = super::float_arg(ctx, argv, 1)?;
    if rhs == 0.0 {
        return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
    }
    ctx.new_float((lhs as f64 / rhs).floor())
}

fn int_mod(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    if let Some(rhs) = ctx.heap.get(argv[1]).as_int() {
        if rhs == 0 {
            return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
        }
        return ctx.new_int(floor_mod(lhs, rhs));
    }
    let rhs = super::float_arg(ctx, argv, 1)?;
    if rhs == 0.0 {
        return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
    }
    ctx.new_float((lhs as f64) % rhs)
}

/// Integer power stays integral for non-negative exponents (wrapping on
/// overflow); a negative exponent produces a float.
fn int_pow(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    if let Some(rhs) = ctx.heap.get(argv[1]).as_int() {
        if rhs >= 0 {
            let exp = u32::try_from(rhs).unwrap_or(u32::MAX);
            return ctx.new_int(lhs.wrapping_pow(exp));
        }
        return ctx.new_float((lhs as f64).powi(rhs as i32));
    }
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float((lhs as f64).powf(rhs))
}

fn int_and(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let rhs = int_arg(ctx, argv, 1)?;
    ctx.new_int(lhs & rhs)
}

fn int_or(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let rhs = int_arg(ctx, argv, 1)?;
    ctx.new_int(lhs | rhs)
}

fn int_xor(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let rhs = int_arg(ctx, argv, 1)?;
    ctx.new_int(lhs ^ rhs)
}

fn int_invert(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_int(!value)
}

fn int_lshift(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let shift = int_arg(ctx, argv, 1)?;
    if shift < 0 {
        return Err(ctx.raise_kind(ExcKind::ValueError, "Shift cannot be negative"));
    }
    let result = u32::try_from(shift)
        .ok()
        .and_then(|s| lhs.checked_shl(s))
        .unwrap_or(0);
    ctx.new_int(result)
}

fn int_rshift(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let shift = int_arg(ctx, argv, 1)?;
    if shift < 0 {
        return Err(ctx.raise_kind(ExcKind::ValueError, "Shift cannot be negative"));
    }
    let shift = shift.min(63) as u32;
    ctx.new_int(lhs >> shift)
}

fn int_lt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    Ok(ctx.new_bool((lhs as f64) < rhs))
}

fn int_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = int_arg(ctx, argv, 0)?;
    let equal = ctx.heap.get(argv[1]).as_int() == Some(lhs);
    Ok(ctx.new_bool(equal))
}

fn int_hash(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_int(value)
}

fn int_bit_length(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    let bits = 64 - value.unsigned_abs().leading_zeros();
    ctx.new_int(i64::from(bits))
}

fn int_bit_count(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = int_arg(ctx, argv, 0)?;
    ctx.new_int(i64::from(value.unsigned_abs().count_ones()))
}

// ----------------------------------------------------------------------
// float
// ----------------------------------------------------------------------

fn float_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let mut value = 0.0;
    if argv.len() == 2 {
        let result = ctx.call_method(argv[1], "__float__", &[], None)?;
        let Some(converted) = ctx.heap.get(result).as_float() else {
            return Err(ctx.raise_kind(
                ExcKind::TypeError,
                "__float__() returned a non float type",
            ));
        };
        value = converted;
    }

    let attrs = ctx.class_instance_attrs(ctx.builtins.float_class);
    let obj = ctx.heap.get_mut(argv[0]);
    obj.attrs = attrs;
    obj.payload = ObjPayload::Float(value);
    obj.type_name = ctx.tags.float.clone();
    Ok(ctx.none())
}

/// Shortest round-trip decimal form, matching `eval(repr(x)) == x`.
pub(super) fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(value).to_string()
}

fn float_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(value != 0.0))
}

fn float_int(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    ctx.new_int(value.trunc() as i64)
}

fn float_str(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    let text = format_float(value);
    ctx.new_str(&text)
}

fn float_neg(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    ctx.new_float(-value)
}

fn float_abs(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    ctx.new_float(value.abs())
}

fn float_add(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs + rhs)
}

fn float_sub(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs - rhs)
}

fn float_mul(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs * rhs)
}

fn float_truediv(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    if rhs == 0.0 {
        return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
    }
    ctx.new_float(lhs / rhs)
}

fn float_floordiv(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    if rhs == 0.0 {
        return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
    }
    ctx.new_float((lhs / rhs).floor())
}

fn float_mod(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    if rhs == 0.0 {
        return Err(ctx.raise_kind(ExcKind::ZeroDivisionError, "division by zero"));
    }
    ctx.new_float(lhs % rhs)
}

fn float_pow(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    ctx.new_float(lhs.powf(rhs))
}

fn float_lt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let rhs = super::float_arg(ctx, argv, 1)?;
    Ok(ctx.new_bool(lhs < rhs))
}

fn float_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = super::float_arg(ctx, argv, 0)?;
    let equal = ctx.heap.get(argv[1]).is_number()
        && ctx.heap.get(argv[1]).as_float() == Some(lhs);
    Ok(ctx.new_bool(equal))
}

fn float_hash(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    ctx.new_int(value.to_bits() as i64)
}

fn float_is_integer(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let value = super::float_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(value.fract() == 0.0))
}
