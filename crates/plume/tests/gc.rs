//! Collector behavior: leak freedom, cycle reclamation, finalizers, and
//! external pinning.

use std::cell::Cell;
use std::rc::Rc;

use plume::{BufferPrint, Config, Context};

fn quiet_context() -> Context {
    let mut config = Config::default();
    config.print = Box::new(BufferPrint::new());
    Context::new(config).expect("context creation")
}

#[test]
fn repeated_collection_reaches_a_fixed_point() {
    let mut ctx = quiet_context();
    ctx.execute("x = [1, 2, 3]\ny = {'k': x}", "<test>")
        .expect("script");

    ctx.collect_garbage();
    let first = ctx.heap_stats().live_objects;
    ctx.collect_garbage();
    let second = ctx.heap_stats().live_objects;
    assert_eq!(first, second, "collection must be idempotent on a quiet heap");
}

#[test]
fn temporaries_are_reclaimed() {
    let mut ctx = quiet_context();
    ctx.collect_garbage();
    let baseline = ctx.heap_stats().live_objects;

    ctx.execute(
        "for i in range(100):\n    t = [i, str(i), (i, i)]\nt = None\ni = None",
        "<test>",
    )
    .expect("script");

    ctx.collect_garbage();
    let after = ctx.heap_stats().live_objects;
    // Everything the loop allocated is unreachable again, bar the handful
    // of bindings the desugared loop leaves behind (the exhausted iterator
    // and its bounds).
    assert!(
        after < baseline + 10,
        "loop temporaries leaked: {baseline} -> {after}"
    );
}

#[test]
fn unreferenced_cycles_are_reclaimed() {
    let mut ctx = quiet_context();
    ctx.execute("a = [1]\nb = [a]\na.append(b)", "<test>")
        .expect("script");
    ctx.collect_garbage();
    let with_cycle = ctx.heap_stats().live_objects;

    ctx.execute("a = None\nb = None", "<test>").expect("unroot");
    ctx.collect_garbage();
    let after = ctx.heap_stats().live_objects;
    assert!(
        after < with_cycle,
        "cycle survived collection: {with_cycle} -> {after}"
    );
}

#[test]
fn self_referential_attribute_cycle_is_reclaimed() {
    let mut ctx = quiet_context();
    ctx.execute(
        "class Node:\n    pass\nn = Node()\nn.me = n\nn = None",
        "<test>",
    )
    .expect("script");
    let before = ctx.heap_stats().live_objects;
    ctx.collect_garbage();
    assert!(ctx.heap_stats().live_objects < before);
}

#[test]
fn finalizers_run_exactly_once_before_reclamation() {
    let mut ctx = quiet_context();
    let runs = Rc::new(Cell::new(0u32));

    let obj = ctx.eval_expression("[9]", "<test>").expect("object");
    let runs_handle = runs.clone();
    ctx.register_finalizer(obj, Box::new(move || runs_handle.set(runs_handle.get() + 1)));

    // Unreferenced by anything; the next collection reclaims it.
    ctx.collect_garbage();
    assert_eq!(runs.get(), 1, "finalizer should run once");
    ctx.collect_garbage();
    assert_eq!(runs.get(), 1, "finalizer must not run again");
}

#[test]
fn pinned_objects_survive_collection() {
    let mut ctx = quiet_context();
    let obj = ctx.eval_expression("[1, 2, 3]", "<test>").expect("object");
    ctx.inc_ref(obj);

    ctx.collect_garbage();
    // Still alive and intact.
    assert!(ctx.is_list(obj));

    let flagged = Rc::new(Cell::new(false));
    let flag = flagged.clone();
    ctx.register_finalizer(obj, Box::new(move || flag.set(true)));

    ctx.dec_ref(obj);
    ctx.collect_garbage();
    assert!(flagged.get(), "unpinned object should be reclaimed");
}

#[test]
fn globals_keep_objects_alive() {
    let mut ctx = quiet_context();
    ctx.execute("keep = [1, 2, 3]", "<test>").expect("script");
    ctx.collect_garbage();
    let keep = ctx.get_global("keep").expect("global");
    assert!(ctx.is_list(keep));
}

#[test]
fn all_finalizers_run_at_context_shutdown() {
    let runs = Rc::new(Cell::new(0u32));
    {
        let mut ctx = quiet_context();
        for _ in 0..3 {
            let obj = ctx.eval_expression("[0]", "<test>").expect("object");
            ctx.inc_ref(obj);
            let handle = runs.clone();
            ctx.register_finalizer(obj, Box::new(move || handle.set(handle.get() + 1)));
        }
        // Dropping the context runs a final, root-less collection.
    }
    assert_eq!(runs.get(), 3);
}

#[test]
fn collection_during_execution_spares_live_frame_state() {
    // Small growth factor so collections trigger constantly while the
    // script builds nested temporaries.
    let mut config = Config::default();
    config.gc_run_factor = 1.0;
    config.print = Box::new(BufferPrint::new());
    let mut ctx = Context::new(config).expect("context");

    ctx.execute(
        "
total = 0
for i in range(200):
    chunk = [str(i), [i, i + 1], (i,)]
    total += len(chunk)
print_arg = total
",
        "<test>",
    )
    .expect("script under gc pressure");
    let total = ctx.get_global("total").and_then(|v| ctx.get_int(v));
    assert_eq!(total, Some(600));
}
