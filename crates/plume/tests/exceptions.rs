//! Exception semantics: the hierarchy, handler selection, finally paths,
//! boundary errors, and traceback formatting.

use plume::{BufferPrint, Config, Context};
use pretty_assertions::assert_eq;

fn context_with_output() -> (Context, BufferPrint) {
    let output = BufferPrint::new();
    let mut config = Config::default();
    config.print = Box::new(output.handle());
    let ctx = Context::new(config).expect("context creation");
    (ctx, output)
}

fn run(code: &str) -> String {
    let (mut ctx, output) = context_with_output();
    if ctx.execute(code, "<test>").is_err() {
        panic!("script failed:\n{}", ctx.error_message());
    }
    output.contents()
}

/// Runs a script expected to die, returning the formatted traceback.
fn run_expecting_error(code: &str) -> String {
    let (mut ctx, _output) = context_with_output();
    assert!(
        ctx.execute(code, "<test>").is_err(),
        "script should have raised"
    );
    ctx.error_message()
}

#[test]
fn matching_handler_runs_then_finally() {
    let code = "
try:
    raise ValueError('x')
except TypeError:
    print('T')
except ValueError as e:
    print('V', e)
finally:
    print('F')
";
    assert_eq!(run(code), "V x\nF\n");
}

#[test]
fn untyped_except_matches_everything() {
    let code = "
try:
    raise TypeError('whatever')
except:
    print('caught')
";
    assert_eq!(run(code), "caught\n");
}

#[test]
fn base_class_handler_catches_subclass() {
    let code = "
try:
    raise IndexError('oops')
except LookupError:
    print('lookup')
try:
    raise ZeroDivisionError('d')
except ArithmeticError:
    print('arith')
try:
    raise KeyError('k')
except Exception:
    print('exc')
";
    assert_eq!(run(code), "lookup\narith\nexc\n");
}

#[test]
fn unmatched_exception_propagates_after_finally() {
    let code = "
def f():
    try:
        raise ValueError('deep')
    except TypeError:
        print('wrong')
    finally:
        print('cleanup')
try:
    f()
except ValueError as e:
    print('outer', e)
";
    assert_eq!(run(code), "cleanup\nouter deep\n");
}

#[test]
fn finally_runs_when_try_body_succeeds() {
    let code = "
try:
    print('body')
finally:
    print('finally')
print('after')
";
    assert_eq!(run(code), "body\nfinally\nafter\n");
}

#[test]
fn exception_in_finally_replaces_in_flight_exception() {
    let code = "
try:
    try:
        raise ValueError('first')
    finally:
        raise TypeError('second')
except TypeError as e:
    print('caught', e)
";
    assert_eq!(run(code), "caught second\n");
}

#[test]
fn reraise_from_handler() {
    let code = "
try:
    try:
        raise ValueError('v')
    except ValueError as e:
        raise TypeError('converted')
except TypeError as e:
    print(e)
";
    assert_eq!(run(code), "converted\n");
}

#[test]
fn nested_loops_and_handlers() {
    let code = "
found = []
for i in range(4):
    try:
        if i % 2 == 0:
            raise ValueError(str(i))
        found.append(i)
    except ValueError:
        pass
print(found)
";
    assert_eq!(run(code), "[1, 3]\n");
}

#[test]
fn user_defined_exception_classes() {
    let code = "
class AppError(Exception):
    pass
class DbError(AppError):
    pass
try:
    raise DbError('down')
except AppError as e:
    print('handled', e)
";
    assert_eq!(run(code), "handled down\n");
}

#[test]
fn raising_a_class_constructs_an_instance() {
    let code = "
try:
    raise ValueError
except ValueError:
    print('ok')
";
    assert_eq!(run(code), "ok\n");
}

#[test]
fn raising_a_non_exception_is_a_type_error() {
    let code = "
try:
    raise 42
except TypeError:
    print('rejected')
";
    assert_eq!(run(code), "rejected\n");
}

#[test]
fn index_out_of_range() {
    assert_eq!(
        run("try:\n    [1, 2][5]\nexcept IndexError:\n    print('idx')"),
        "idx\n"
    );
    assert_eq!(
        run("try:\n    [1, 2][-3]\nexcept IndexError:\n    print('idx')"),
        "idx\n"
    );
    assert_eq!(
        run("try:\n    'ab'[2]\nexcept IndexError:\n    print('idx')"),
        "idx\n"
    );
}

#[test]
fn slice_step_zero_is_value_error() {
    assert_eq!(
        run("try:\n    [1, 2, 3][::0]\nexcept ValueError:\n    print('step')"),
        "step\n"
    );
}

#[test]
fn division_by_zero() {
    for expr in ["1 / 0", "1 // 0", "1 % 0", "1.5 / 0.0"] {
        let code = format!(
            "try:\n    {expr}\nexcept ZeroDivisionError:\n    print('zero')"
        );
        assert_eq!(run(&code), "zero\n", "no ZeroDivisionError for {expr}");
    }
}

#[test]
fn unhashable_containers_as_dict_keys() {
    for key in ["[1, 2]", "{1: 2}", "{1, 2}"] {
        let code = format!(
            "d = {{}}\ntry:\n    d[{key}] = 1\nexcept TypeError:\n    print('unhashable')"
        );
        assert_eq!(run(&code), "unhashable\n", "no TypeError for key {key}");
    }
}

#[test]
fn missing_dict_key_is_key_error() {
    assert_eq!(
        run("try:\n    {}['missing']\nexcept KeyError:\n    print('key')"),
        "key\n"
    );
}

#[test]
fn missing_name_is_name_error() {
    assert_eq!(
        run("try:\n    undefined_name\nexcept NameError:\n    print('name')"),
        "name\n"
    );
}

#[test]
fn missing_attribute_is_attribute_error() {
    assert_eq!(
        run("try:\n    (1).missing\nexcept AttributeError:\n    print('attr')"),
        "attr\n"
    );
}

#[test]
fn recursion_limit_is_catchable() {
    let code = "
def loop():
    return loop()
try:
    loop()
except RecursionError:
    print('deep')
";
    assert_eq!(run(code), "deep\n");
}

#[test]
fn syntax_error_reported_from_compile() {
    let (mut ctx, _output) = context_with_output();
    assert!(ctx.execute("def broken(:\n    pass", "<test>").is_err());
    let message = ctx.error_message();
    assert!(
        message.contains("SyntaxError"),
        "expected SyntaxError in:\n{message}"
    );
}

#[test]
fn lex_error_is_syntax_error() {
    let (mut ctx, _output) = context_with_output();
    assert!(ctx.execute("s = 'unterminated", "<test>").is_err());
    assert!(ctx.error_message().contains("SyntaxError"));
}

#[test]
fn traceback_names_module_line_and_function() {
    let message = run_expecting_error(
        "def inner():\n    raise ValueError('boom')\ndef outer():\n    inner()\nouter()",
    );
    assert!(message.starts_with("Traceback (most recent call last):"));
    assert!(message.contains("Module __main__"), "{message}");
    assert!(message.contains("Function inner()"), "{message}");
    assert!(message.contains("Line 2"), "{message}");
    assert!(message.contains("raise ValueError('boom')"), "{message}");
    assert!(message.trim_end().ends_with("ValueError: boom"), "{message}");
}

#[test]
fn error_message_is_ok_without_exception() {
    let (ctx, _output) = context_with_output();
    assert_eq!(ctx.error_message(), "Ok");
}

#[test]
fn clear_exception_resets_state() {
    let (mut ctx, _output) = context_with_output();
    assert!(ctx.execute("raise ValueError('x')", "<test>").is_err());
    assert!(ctx.current_exception().is_some());
    ctx.clear_exception();
    assert!(ctx.current_exception().is_none());
    assert_eq!(ctx.error_message(), "Ok");
}

#[test]
fn exception_state_does_not_leak_between_scripts() {
    let (mut ctx, output) = context_with_output();
    assert!(ctx.execute("raise ValueError('x')", "<test>").is_err());
    ctx.clear_exception();
    ctx.execute("print('fine')", "<test>").expect("second script");
    assert_eq!(output.contents(), "fine\n");
}

#[test]
fn break_and_continue_with_finally_interleave() {
    let code = "
log = []
for i in range(4):
    try:
        if i == 1:
            continue
        if i == 3:
            break
        log.append(i)
    finally:
        log.append(10 + i)
print(log)
";
    assert_eq!(run(code), "[0, 10, 11, 2, 12, 13]\n");
}
