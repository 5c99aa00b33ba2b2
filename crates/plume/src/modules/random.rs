//! The `random` module: the context-owned RNG plus interpreted helpers.

use rand::{Rng as _, SeedableRng as _};

use crate::{
    builtins::{expect_count, float_arg, int_arg},
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
    object::ObjPayload,
};

use super::function;

/// Helpers that compose naturally in the language itself.
const RANDOM_CODE: &str = r"
def choice(seq):
    t = tuple(seq)
    return t[randint(0, len(t) - 1)]

def getrandbits(n):
    x = 0
    for i in range(n):
        x <<= 1
        if random() < 0.5:
            x |= 1
    return x

def randrange(*args):
    return choice(range(*args))
";

fn random_seed(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let seed = int_arg(ctx, argv, 0)?;
    ctx.rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
    Ok(ctx.none())
}

fn random_random(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 0)?;
    let value: f64 = ctx.rng.gen();
    ctx.new_float(value)
}

fn random_randint(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lower = int_arg(ctx, argv, 0)?;
    let upper = int_arg(ctx, argv, 1)?;
    if lower > upper {
        return Err(ctx.raise_kind(
            ExcKind::ValueError,
            "Lower bound must be less than or equal to upper bound",
        ));
    }
    let value = ctx.rng.gen_range(lower..=upper);
    ctx.new_int(value)
}

fn random_uniform(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lower = float_arg(ctx, argv, 0)?;
    let upper = float_arg(ctx, argv, 1)?;
    if lower > upper {
        return Err(ctx.raise_kind(
            ExcKind::ValueError,
            "Lower bound must be less than or equal to upper bound",
        ));
    }
    let value = if lower == upper {
        lower
    } else {
        ctx.rng.gen_range(lower..upper)
    };
    ctx.new_float(value)
}

fn random_shuffle(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let length = match &ctx.heap.get(argv[0]).payload {
        ObjPayload::List(items) => items.len(),
        _ => return Err(crate::builtins::arg_type_error(ctx, 0, "list")),
    };
    // Fisher-Yates over the list payload.
    for i in (1..length).rev() {
        let j = ctx.rng.gen_range(0..=i);
        if let ObjPayload::List(items) = &mut ctx.heap.get_mut(argv[0]).payload {
            items.swap(i, j);
        }
    }
    Ok(ctx.none())
}

pub(crate) fn import(ctx: &mut Context) -> RunResult<()> {
    function(ctx, "seed", random_seed)?;
    function(ctx, "shuffle", random_shuffle)?;
    function(ctx, "randint", random_randint)?;
    function(ctx, "random", random_random)?;
    function(ctx, "uniform", random_uniform)?;

    let helpers = ctx.compile_in_module(RANDOM_CODE, "random", "random", false)?;
    ctx.call(helpers, &[], None)?;
    Ok(())
}
