//! The `sys` module: script arguments and `exit`.

use crate::{
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
};

use super::function;

fn sys_exit(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
    Err(ctx.raise_kind(ExcKind::SystemExit, ""))
}

pub(crate) fn import(ctx: &mut Context) -> RunResult<()> {
    function(ctx, "exit", sys_exit)?;
    let argv = ctx.argv_obj;
    ctx.set_global("argv", argv);
    Ok(())
}
