//! The `time` module.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    builtins::{expect_count, float_arg},
    context::Context,
    exceptions::RunResult,
    heap::ObjId,
};

use super::function;

fn time_time(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 0)?;
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    ctx.new_float(seconds)
}

fn time_sleep(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let seconds = float_arg(ctx, argv, 0)?;
    if seconds > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(seconds));
    }
    Ok(ctx.none())
}

pub(crate) fn import(ctx: &mut Context) -> RunResult<()> {
    function(ctx, "time", time_time)?;
    function(ctx, "sleep", time_sleep)?;
    Ok(())
}
