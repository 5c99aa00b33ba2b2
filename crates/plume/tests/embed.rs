//! Embedder API: constructors, accessors, calls, base-skipping dispatch,
//! iteration helpers, kwargs from native code, and module registration.

use plume::{
    BinOp, BufferPrint, Config, Context, ExcKind, ObjId, RunResult, UnOp,
};
use pretty_assertions::assert_eq;

fn context_with_output() -> (Context, BufferPrint) {
    let output = BufferPrint::new();
    let mut config = Config::default();
    config.print = Box::new(output.handle());
    let ctx = Context::new(config).expect("context creation");
    (ctx, output)
}

#[test]
fn scalar_constructors_and_accessors() {
    let (mut ctx, _output) = context_with_output();

    let i = ctx.new_int(42).expect("int");
    assert!(ctx.is_int(i));
    assert_eq!(ctx.get_int(i), Some(42));

    let f = ctx.new_float(1.5).expect("float");
    assert!(ctx.is_float(f));
    assert_eq!(ctx.get_float(f), Some(1.5));

    let s = ctx.new_str("hi").expect("str");
    assert!(ctx.is_str(s));
    assert_eq!(ctx.get_str(s), Some("hi"));

    let none = ctx.none();
    assert!(ctx.is_none(none));
    assert!(ctx.is_bool(ctx.new_bool(true)));
}

#[test]
fn boolean_and_none_are_singletons() {
    let (ctx, _output) = context_with_output();
    assert_eq!(ctx.new_bool(true), ctx.new_bool(true));
    assert_eq!(ctx.new_bool(false), ctx.new_bool(false));
    assert_eq!(ctx.none(), ctx.none());
    assert_ne!(ctx.new_bool(true), ctx.new_bool(false));
}

#[test]
fn containers_from_native_code() {
    let (mut ctx, _output) = context_with_output();
    let one = ctx.new_int(1).expect("int");
    let two = ctx.new_int(2).expect("int");

    let tuple = ctx.new_tuple(&[one, two]).expect("tuple");
    assert!(ctx.is_tuple(tuple));

    let list = ctx.new_list(&[one, two]).expect("list");
    assert!(ctx.is_list(list));

    let dict = ctx.new_dict().expect("dict");
    let key = ctx.new_str("k").expect("key");
    ctx.dict_set(dict, key, two).expect("insert");
    assert_eq!(ctx.dict_get(dict, key).expect("get"), Some(two));

    let set = ctx.new_set().expect("set");
    ctx.set_add(set, one).expect("add");
    assert!(ctx.is_set(set));
}

#[test]
fn unary_and_binary_operators_by_tag() {
    let (mut ctx, _output) = context_with_output();
    let three = ctx.new_int(3).expect("int");
    let four = ctx.new_int(4).expect("int");

    let sum = ctx.binary_op(BinOp::Add, three, four).expect("add");
    assert_eq!(ctx.get_int(sum), Some(7));

    let less = ctx.binary_op(BinOp::Lt, three, four).expect("lt");
    assert_eq!(ctx.get_bool(less), Some(true));

    let neg = ctx.unary_op(UnOp::Neg, three).expect("neg");
    assert_eq!(ctx.get_int(neg), Some(-3));

    let text = ctx.unary_op(UnOp::Str, four).expect("str");
    assert_eq!(ctx.get_str(text), Some("4"));

    let list = ctx.new_list(&[three, four]).expect("list");
    let contains = ctx.binary_op(BinOp::In, four, list).expect("in");
    assert_eq!(ctx.get_bool(contains), Some(true));
}

#[test]
fn globals_round_trip() {
    let (mut ctx, _output) = context_with_output();
    let value = ctx.new_int(99).expect("int");
    ctx.set_global("answer", value);
    ctx.execute("doubled = answer * 2", "<test>").expect("script");
    let doubled = ctx.get_global("doubled").expect("global");
    assert_eq!(ctx.get_int(doubled), Some(198));
}

#[test]
fn call_script_function_from_native() {
    let (mut ctx, _output) = context_with_output();
    ctx.execute("def add(a, b):\n    return a + b", "<test>")
        .expect("script");
    let add = ctx.get_global("add").expect("function");
    let two = ctx.new_int(2).expect("int");
    let five = ctx.new_int(5).expect("int");
    let result = ctx.call(add, &[two, five], None).expect("call");
    assert_eq!(ctx.get_int(result), Some(7));
}

#[test]
fn call_with_kwargs_dictionary() {
    let (mut ctx, _output) = context_with_output();
    ctx.execute("def f(a, b=0):\n    return a * 10 + b", "<test>")
        .expect("script");
    let f = ctx.get_global("f").expect("function");

    let kwargs = ctx.new_dict().expect("kwargs");
    let key = ctx.new_str("b").expect("key");
    let val = ctx.new_int(3).expect("val");
    ctx.dict_set(kwargs, key, val).expect("insert");

    let one = ctx.new_int(1).expect("int");
    let result = ctx.call(f, &[one], Some(kwargs)).expect("call");
    assert_eq!(ctx.get_int(result), Some(13));
}

#[test]
fn attribute_get_and_set() {
    let (mut ctx, _output) = context_with_output();
    ctx.execute(
        "class Point:\n    def __init__(self, x):\n        self.x = x\np = Point(4)",
        "<test>",
    )
    .expect("script");
    let p = ctx.get_global("p").expect("instance");

    let x = ctx.get_attribute(p, "x").expect("attr");
    assert_eq!(ctx.get_int(x), Some(4));

    let nine = ctx.new_int(9).expect("int");
    ctx.set_attribute(p, "x", nine);
    let x = ctx.get_attribute(p, "x").expect("attr");
    assert_eq!(ctx.get_int(x), Some(9));

    assert!(ctx.has_attribute(p, "missing").is_none());
    assert!(ctx.get_attribute(p, "missing").is_err());
    assert!(ctx.error_message().contains("AttributeError"));
    ctx.clear_exception();
}

/// Native helper for the base-skip scenario: dispatches `m` starting past
/// the most-derived class.
fn base_m(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    ctx.call_method_from_base(argv[0], "m", &[], None, None)
}

#[test]
fn base_skipping_method_dispatch() {
    let (mut ctx, _output) = context_with_output();

    let helper = ctx.new_function(base_m, "base_m").expect("native");
    ctx.set_global("base_m", helper);

    ctx.execute(
        "
class A:
    def m(self):
        return 1
class B(A):
    def m(self):
        return base_m(self) + 10
b = B()
",
        "<test>",
    )
    .expect("script");

    let b = ctx.get_global("b").expect("instance");

    // Skipping the most-derived m reaches A's.
    let base_only = ctx
        .call_method_from_base(b, "m", &[], None, None)
        .expect("base call");
    assert_eq!(ctx.get_int(base_only), Some(1));

    // The full method chains through the base for 11.
    let full = ctx.call_method(b, "m", &[], None).expect("call");
    assert_eq!(ctx.get_int(full), Some(11));
}

#[test]
fn class_attribute_added_after_instances_exist() {
    let (mut ctx, _output) = context_with_output();
    ctx.execute(
        "class C:\n    def a(self):\n        return 1\nc = C()",
        "<test>",
    )
    .expect("script");

    let class = ctx.get_global("C").expect("class");
    let value = ctx.new_int(7).expect("int");
    ctx.add_class_attribute(class, "tag", value);

    // The pre-existing instance sees the new class attribute.
    let c = ctx.get_global("c").expect("instance");
    let tag = ctx.get_attribute(c, "tag").expect("attr");
    assert_eq!(ctx.get_int(tag), Some(7));
}

#[test]
fn classes_built_through_the_api() {
    let (mut ctx, _output) = context_with_output();

    let base = ctx.new_class("Base", &[]).expect("base class");
    let derived = ctx.new_class("Derived", &[base]).expect("derived class");

    let instance = ctx.call(derived, &[], None).expect("construct");
    assert!(ctx.isinstance_of(instance, &[derived]).is_some());
    assert!(ctx.isinstance_of(instance, &[base]).is_some());

    let other = ctx.new_class("Other", &[]).expect("other class");
    assert!(ctx.isinstance_of(instance, &[other]).is_none());
}

#[test]
fn iterate_visits_every_element() {
    let (mut ctx, _output) = context_with_output();
    let items = ctx
        .eval_expression("[1, 2, 3, 4]", "<test>")
        .expect("list");

    let mut seen = Vec::new();
    ctx.iterate(items, &mut |ctx, value| {
        seen.push(ctx.get_int(value).unwrap_or(-1));
        Ok(true)
    })
    .expect("iterate");
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[test]
fn iterate_callback_can_stop_early() {
    let (mut ctx, _output) = context_with_output();
    let items = ctx
        .eval_expression("[1, 2, 3, 4]", "<test>")
        .expect("list");

    let mut count = 0;
    ctx.iterate(items, &mut |_ctx, _value| {
        count += 1;
        Ok(count < 2)
    })
    .expect("iterate");
    assert_eq!(count, 2);
}

#[test]
fn unpack_enforces_exact_length() {
    let (mut ctx, _output) = context_with_output();
    let pair = ctx.eval_expression("(1, 2)", "<test>").expect("tuple");

    let values = ctx.unpack(pair, 2).expect("unpack");
    assert_eq!(values.len(), 2);
    assert_eq!(ctx.get_int(values[0]), Some(1));

    assert!(ctx.unpack(pair, 3).is_err());
    ctx.clear_exception();
    assert!(ctx.unpack(pair, 1).is_err());
    ctx.clear_exception();
}

#[test]
fn raise_by_kind_from_native() {
    fn failing(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
        Err(ctx.raise_kind(ExcKind::ValueError, "from native"))
    }

    let (mut ctx, output) = context_with_output();
    let f = ctx.new_function(failing, "failing").expect("native");
    ctx.set_global("failing", f);
    ctx.execute(
        "try:\n    failing()\nexcept ValueError as e:\n    print('caught', e)",
        "<test>",
    )
    .expect("script");
    assert_eq!(output.contents(), "caught from native\n");
}

#[test]
fn native_functions_read_kwargs() {
    fn greet(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
        let name = argv
            .first()
            .and_then(|&id| ctx.get_str(id))
            .unwrap_or("world")
            .to_string();
        let punct = match ctx.kwargs() {
            Some(kwargs) => {
                let key = ctx.new_str("punct")?;
                match ctx.dict_get(kwargs, key)? {
                    Some(value) => ctx.get_str(value).unwrap_or("!").to_string(),
                    None => "!".to_string(),
                }
            }
            None => "!".to_string(),
        };
        let text = format!("hello {name}{punct}");
        ctx.new_str(&text)
    }

    let (mut ctx, output) = context_with_output();
    let f = ctx.new_function(greet, "greet").expect("native");
    ctx.set_global("greet", f);
    ctx.execute("print(greet('ada', punct='?'))", "<test>")
        .expect("script");
    assert_eq!(output.contents(), "hello ada?\n");
}

#[test]
fn registered_native_modules_are_importable() {
    fn answer(ctx: &mut Context, _argv: &[ObjId]) -> RunResult<ObjId> {
        ctx.new_int(42)
    }
    fn load(ctx: &mut Context) -> RunResult<()> {
        let f = ctx.new_function(answer, "answer")?;
        ctx.set_global("answer", f);
        Ok(())
    }

    let (mut ctx, output) = context_with_output();
    ctx.register_module("deep_thought", load);
    ctx.execute(
        "import deep_thought\nprint(deep_thought.answer())",
        "<test>",
    )
    .expect("script");
    assert_eq!(output.contents(), "42\n");
}

#[test]
fn import_module_from_file(
) {
    let dir = std::env::temp_dir().join("plume_import_test");
    std::fs::create_dir_all(&dir).expect("temp dir");
    std::fs::write(dir.join("helpers.py"), "def triple(x):\n    return x * 3\n")
        .expect("module file");

    let output = BufferPrint::new();
    let mut config = Config::default();
    config.print = Box::new(output.handle());
    config.import_path = Some(dir.to_string_lossy().into_owned());
    let mut ctx = Context::new(config).expect("context");

    ctx.execute(
        "from helpers import triple\nprint(triple(7))",
        "<test>",
    )
    .expect("script");
    assert_eq!(output.contents(), "21\n");
}

#[test]
fn missing_module_raises_import_error() {
    let (mut ctx, output) = context_with_output();
    ctx.execute(
        "try:\n    import does_not_exist\nexcept ImportError:\n    print('missing')",
        "<test>",
    )
    .expect("script");
    assert_eq!(output.contents(), "missing\n");
}

#[test]
fn userdata_round_trips_through_objects() {
    let (mut ctx, _output) = context_with_output();
    let obj = ctx.eval_expression("object()", "<test>").expect("object");
    ctx.inc_ref(obj);
    ctx.set_userdata(obj, Box::new(1234u32));
    let back = ctx.get_userdata::<u32>(obj, "__object");
    assert_eq!(back, Some(&1234));
    // Type tag mismatch yields nothing.
    assert!(ctx.get_userdata::<u32>(obj, "__int").is_none());
    ctx.dec_ref(obj);
}

#[test]
fn eval_expression_returns_values_directly() {
    let (mut ctx, _output) = context_with_output();
    let value = ctx.eval_expression("2 ** 6", "<test>").expect("value");
    assert_eq!(ctx.get_int(value), Some(64));

    // Statements are not expressions.
    assert!(ctx.eval_expression("if True:\n    pass", "<test>").is_err());
    ctx.clear_exception();
}

#[test]
fn argv_is_visible_through_sys() {
    let output = BufferPrint::new();
    let mut config = Config::default();
    config.print = Box::new(output.handle());
    config.argv = vec!["prog".to_string(), "--flag".to_string()];
    let mut ctx = Context::new(config).expect("context");

    ctx.execute("import sys\nprint(sys.argv)", "<test>")
        .expect("script");
    assert_eq!(output.contents(), "['prog', '--flag']\n");
}
