//! The `math` module: float functions and constants over f64.

use crate::{
    builtins::{expect_count, float_arg},
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
};

use super::{constant_float, function};

macro_rules! float_fn {
    ($name:ident, $method:ident) => {
        fn $name(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
            expect_count(ctx, argv, 1)?;
            let x = float_arg(ctx, argv, 0)?;
            ctx.new_float(x.$method())
        }
    };
}

float_fn!(math_sqrt, sqrt);
float_fn!(math_exp, exp);
float_fn!(math_cos, cos);
float_fn!(math_sin, sin);
float_fn!(math_tan, tan);
float_fn!(math_acos, acos);
float_fn!(math_asin, asin);
float_fn!(math_atan, atan);
float_fn!(math_cosh, cosh);
float_fn!(math_sinh, sinh);
float_fn!(math_tanh, tanh);
float_fn!(math_acosh, acosh);
float_fn!(math_asinh, asinh);
float_fn!(math_atanh, atanh);

fn math_log(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    if argv.is_empty() || argv.len() > 2 {
        return Err(crate::builtins::arg_count_error(ctx, argv.len(), None));
    }
    let x = float_arg(ctx, argv, 0)?;
    if x <= 0.0 {
        return Err(ctx.raise_kind(ExcKind::ValueError, "math domain error"));
    }
    let result = if argv.len() == 2 {
        let base = float_arg(ctx, argv, 1)?;
        x.log(base)
    } else {
        x.ln()
    };
    ctx.new_float(result)
}

fn math_ceil(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    ctx.new_int(x.ceil() as i64)
}

fn math_floor(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    ctx.new_int(x.floor() as i64)
}

fn math_fabs(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    ctx.new_float(x.abs())
}

fn math_atan2(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let y = float_arg(ctx, argv, 0)?;
    let x = float_arg(ctx, argv, 1)?;
    ctx.new_float(y.atan2(x))
}

fn math_hypot(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let x = float_arg(ctx, argv, 0)?;
    let y = float_arg(ctx, argv, 1)?;
    ctx.new_float(x.hypot(y))
}

fn math_degrees(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    ctx.new_float(x.to_degrees())
}

fn math_radians(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    ctx.new_float(x.to_radians())
}

fn math_isnan(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(x.is_nan()))
}

fn math_isinf(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(x.is_infinite()))
}

fn math_isfinite(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(x.is_finite()))
}

fn math_trunc(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let x = float_arg(ctx, argv, 0)?;
    ctx.new_int(x.trunc() as i64)
}

pub(crate) fn import(ctx: &mut Context) -> RunResult<()> {
    function(ctx, "sqrt", math_sqrt)?;
    function(ctx, "exp", math_exp)?;
    function(ctx, "log", math_log)?;
    function(ctx, "cos", math_cos)?;
    function(ctx, "sin", math_sin)?;
    function(ctx, "tan", math_tan)?;
    function(ctx, "acos", math_acos)?;
    function(ctx, "asin", math_asin)?;
    function(ctx, "atan", math_atan)?;
    function(ctx, "atan2", math_atan2)?;
    function(ctx, "cosh", math_cosh)?;
    function(ctx, "sinh", math_sinh)?;
    function(ctx, "tanh", math_tanh)?;
    function(ctx, "acosh", math_acosh)?;
    function(ctx, "asinh", math_asinh)?;
    function(ctx, "atanh", math_atanh)?;
    function(ctx, "ceil", math_ceil)?;
    function(ctx, "floor", math_floor)?;
    function(ctx, "fabs", math_fabs)?;
    function(ctx, "hypot", math_hypot)?;
    function(ctx, "degrees", math_degrees)?;
    function(ctx, "radians", math_radians)?;
    function(ctx, "isnan", math_isnan)?;
    function(ctx, "isinf", math_isinf)?;
    function(ctx, "isfinite", math_isfinite)?;
    function(ctx, "trunc", math_trunc)?;

    constant_float(ctx, "pi", std::f64::consts::PI)?;
    constant_float(ctx, "e", std::f64::consts::E)?;
    constant_float(ctx, "tau", std::f64::consts::TAU)?;
    constant_float(ctx, "inf", f64::INFINITY)?;
    constant_float(ctx, "nan", f64::NAN)?;
    Ok(())
}
