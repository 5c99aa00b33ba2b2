//! Native modules registered at context creation: `math`, `random`,
//! `time`, `sys`, and (behind `enable_os_access`) `os`.

pub(crate) mod math;
pub(crate) mod os;
pub(crate) mod random;
pub(crate) mod sys;
pub(crate) mod time;

use crate::{context::Context, exceptions::RunResult, object::NativeFn};

/// Registers a module-level constant.
pub(super) fn constant_float(ctx: &mut Context, name: &str, value: f64) -> RunResult<()> {
    let obj = ctx.new_float(value)?;
    ctx.set_global(name, obj);
    Ok(())
}

pub(super) fn constant_str(ctx: &mut Context, name: &str, value: &str) -> RunResult<()> {
    let obj = ctx.new_str(value)?;
    ctx.set_global(name, obj);
    Ok(())
}

pub(super) fn function(ctx: &mut Context, name: &str, f: NativeFn) -> RunResult<()> {
    crate::builtins::register_function(ctx, name, f)?;
    Ok(())
}
