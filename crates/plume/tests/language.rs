//! End-to-end language tests: scripts in, print stream out.

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

fn eval_repr(code: &str) -> String {
    let (mut ctx, _output) = context_with_output();
    let value = match ctx.eval_expression(code, "<test>") {
        Ok(value) => value,
        Err(_) => panic!("expression failed:\n{}", ctx.error_message()),
    };
    let repr = ctx
        .unary_op(plume::UnOp::Repr, value)
        .expect("repr");
    ctx.get_str(repr).expect("repr string").to_string()
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(run("print(2 + 3 * 4)"), "14\n");
}

#[test]
fn power_is_right_associative() {
    assert_eq!(run("print(2 ** 3 ** 2)"), "512\n");
}

#[test]
fn unary_minus_binds_looser_than_power() {
    assert_eq!(run("print(-2 ** 2)"), "-4\n");
}

#[test]
fn float_division_and_floor_division() {
    assert_eq!(run("print(7 / 2)"), "3.5\n");
    assert_eq!(run("print(7 // 2)"), "3\n");
    assert_eq!(run("print(-7 // 2)"), "-4\n");
}

#[test]
fn modulo_takes_sign_of_divisor() {
    assert_eq!(run("print(-7 % 3)"), "2\n");
    assert_eq!(run("print(7 % -3)"), "-2\n");
}

#[test]
fn floored_division_identity() {
    let code = "
for a in [-7, -1, 0, 1, 7, 13]:
    for b in [-3, -1, 1, 3, 5]:
        if a != (a // b) * b + a % b:
            print('broken', a, b)
print('ok')
";
    assert_eq!(run(code), "ok\n");
}

#[test]
fn integer_pow_with_negative_exponent_is_float() {
    assert_eq!(run("print(2 ** -1)"), "0.5\n");
    assert_eq!(run("print(2 ** 10)"), "1024\n");
}

#[test]
fn string_concat_and_repeat() {
    assert_eq!(run("print('ab' + 'cd')"), "abcd\n");
    assert_eq!(run("print('ab' * 3)"), "ababab\n");
}

#[test]
fn short_circuit_values() {
    assert_eq!(run("print(0 and 5)"), "0\n");
    assert_eq!(run("print(1 and 5)"), "5\n");
    assert_eq!(run("print(0 or 7)"), "7\n");
    assert_eq!(run("print(3 or 7)"), "3\n");
}

#[test]
fn short_circuit_in_call_arguments() {
    assert_eq!(run("print(1 and 2, 0 or 9)"), "2 9\n");
}

#[test]
fn ternary_expression() {
    assert_eq!(run("print(1 if True else 2)"), "1\n");
    assert_eq!(run("print(1 if False else 2)"), "2\n");
}

#[test]
fn while_loop_with_else() {
    let code = "
i = 0
while i < 3:
    i += 1
else:
    print('done', i)
";
    assert_eq!(run(code), "done 3\n");
}

#[test]
fn break_skips_loop_else() {
    let code = "
i = 0
while True:
    i += 1
    if i == 2:
        break
else:
    print('unreachable')
print(i)
";
    assert_eq!(run(code), "2\n");
}

#[test]
fn for_loop_over_range() {
    assert_eq!(run("for i in range(3):\n    print(i)"), "0\n1\n2\n");
}

#[test]
fn for_loop_with_negative_step() {
    assert_eq!(run("for i in range(3, 0, -1):\n    print(i)"), "3\n2\n1\n");
}

#[test]
fn for_loop_tuple_unpacking() {
    let code = "
for a, b in [(1, 2), (3, 4)]:
    print(a + b)
";
    assert_eq!(run(code), "3\n7\n");
}

#[test]
fn continue_statement() {
    let code = "
for i in range(5):
    if i % 2 == 0:
        continue
    print(i)
";
    assert_eq!(run(code), "1\n3\n");
}

#[test]
fn default_variadic_and_keyword_parameters() {
    let code = "
def f(x=1, *a, **k):
    return (x, a, sorted(k.items()))
print(f(10, 20, 30, y=1, z=2))
";
    assert_eq!(run(code), "(10, (20, 30), [('y', 1), ('z', 2)])\n");
}

#[test]
fn default_parameter_used_when_omitted() {
    let code = "
def f(a, b=5):
    return a + b
print(f(1))
print(f(1, 2))
";
    assert_eq!(run(code), "6\n3\n");
}

#[test]
fn keyword_arguments_bind_by_name() {
    let code = "
def f(a, b):
    return a - b
print(f(b=1, a=10))
";
    assert_eq!(run(code), "9\n");
}

#[test]
fn star_unpack_in_call() {
    let code = "
def f(a, b, c):
    return a + b + c
args = [1, 2, 3]
print(f(*args))
";
    assert_eq!(run(code), "6\n");
}

#[test]
fn kwargs_unpack_in_call() {
    let code = "
def f(a, b):
    return a - b
d = {'a': 10, 'b': 4}
print(f(**d))
";
    assert_eq!(run(code), "6\n");
}

#[test]
fn closures_capture_cells_not_values() {
    let code = "
a = []
for i in range(3):
    a.append(lambda: i)
print([f() for f in a])
";
    assert_eq!(run(code), "[2, 2, 2]\n");
}

#[test]
fn nonlocal_rebinds_enclosing_cell() {
    let code = "
def counter():
    n = 0
    def bump():
        nonlocal n
        n += 1
        return n
    return bump
c = counter()
c()
c()
print(c())
";
    assert_eq!(run(code), "3\n");
}

#[test]
fn global_declaration_writes_module_binding() {
    let code = "
x = 1
def set_x():
    global x
    x = 42
set_x()
print(x)
";
    assert_eq!(run(code), "42\n");
}

#[test]
fn classes_and_inheritance() {
    let code = "
class A:
    def __init__(self):
        self.v = 1
    def name(self):
        return 'A'
class B(A):
    def name(self):
        return 'B' + str(self.v)
b = B()
print(b.name())
print(isinstance(b, A))
print(isinstance(b, B))
";
    assert_eq!(run(code), "B1\nTrue\nTrue\n");
}

#[test]
fn base_methods_visible_unless_shadowed() {
    let code = "
class A:
    def hello(self):
        return 'hello'
class B(A):
    pass
print(B().hello())
";
    assert_eq!(run(code), "hello\n");
}

#[test]
fn multiple_inheritance_resolves_left_first() {
    let code = "
class A:
    def who(self):
        return 'A'
class B:
    def who(self):
        return 'B'
class C(A, B):
    pass
print(C().who())
";
    assert_eq!(run(code), "A\n");
}

#[test]
fn list_comprehension_with_condition() {
    assert_eq!(
        run("print([x * 2 for x in range(5) if x % 2 == 0])"),
        "[0, 4, 8]\n"
    );
}

#[test]
fn list_comprehension_inside_function() {
    let code = "
def squares(data):
    return [x * x for x in data]
print(squares([1, 2, 3]))
";
    assert_eq!(run(code), "[1, 4, 9]\n");
}

#[test]
fn slicing_behaviors() {
    assert_eq!(run("print([0, 1, 2, 3, 4][1:3])"), "[1, 2]\n");
    assert_eq!(run("print([0, 1, 2, 3, 4][::2])"), "[0, 2, 4]\n");
    assert_eq!(run("print([0, 1, 2, 3, 4][::-1])"), "[4, 3, 2, 1, 0]\n");
    assert_eq!(run("print('hello'[1:])"), "ello\n");
    assert_eq!(run("print((1, 2, 3)[:2])"), "(1, 2)\n");
}

#[test]
fn negative_indexing() {
    assert_eq!(run("print('abc'[-1])"), "c\n");
    assert_eq!(run("print([1, 2, 3][-2])"), "2\n");
}

#[test]
fn augmented_assignment_forms() {
    let code = "
x = 10
x += 5
x -= 3
x *= 2
x //= 3
print(x)
li = [1]
li += [2]
print(li)
";
    assert_eq!(run(code), "8\n[1, 2]\n");
}

#[test]
fn augmented_assignment_through_index() {
    let code = "
d = {'n': 1}
d['n'] += 41
print(d['n'])
";
    assert_eq!(run(code), "42\n");
}

#[test]
fn tuple_packing_assignment() {
    let code = "
(a, b) = (1, 2)
(a, b) = (b, a)
print(a, b)
";
    assert_eq!(run(code), "2 1\n");
}

#[test]
fn pack_assignment_length_mismatch_raises() {
    let code = "
try:
    (a, b) = (1, 2, 3)
except TypeError:
    print('mismatch')
";
    assert_eq!(run(code), "mismatch\n");
}

#[test]
fn dict_with_tuple_keys() {
    let code = "
d = {}
d[(1, 2)] = 'ok'
print(d[(1, 2)])
";
    assert_eq!(run(code), "ok\n");
}

#[test]
fn dict_preserves_insertion_order() {
    let code = "
d = {'b': 1, 'a': 2}
d['c'] = 3
print(list(d.keys()))
";
    assert_eq!(run(code), "['b', 'a', 'c']\n");
}

#[test]
fn dict_methods() {
    let code = "
d = {'a': 1}
d.update({'b': 2})
print(d.get('a'), d.get('missing', 9))
print(d.pop('a'))
print(d.setdefault('c', 7))
print(len(d))
";
    assert_eq!(run(code), "1 9\n1\n7\n2\n");
}

#[test]
fn set_operations() {
    let code = "
s = {1, 2, 3}
t = {2, 3, 4}
print(len(s.union(t)))
print(len(s.intersection(t)))
print(2 in s)
print(5 in s)
";
    assert_eq!(run(code), "4\n2\nTrue\nFalse\n");
}

#[test]
fn membership_and_identity() {
    let code = "
print(2 in [1, 2, 3])
print(5 not in [1, 2, 3])
print(None is None)
print(None is not None)
";
    assert_eq!(run(code), "True\nTrue\nTrue\nFalse\n");
}

#[test]
fn fresh_ints_are_not_identical() {
    assert_eq!(run("a = 1000\nb = 1000\nprint(a is b)"), "False\n");
}

#[test]
fn with_statement_runs_exit_on_success_and_error() {
    let code = "
class Mgr:
    def __init__(self, tag):
        self.tag = tag
    def __enter__(self):
        print('enter', self.tag)
        return self
    def __exit__(self, a, b, c):
        print('exit', self.tag)
with Mgr('one') as m:
    print('body', m.tag)
try:
    with Mgr('two'):
        raise ValueError('boom')
except ValueError as e:
    print('caught', e)
";
    assert_eq!(
        run(code),
        "enter one\nbody one\nexit one\nenter two\nexit two\ncaught boom\n"
    );
}

#[test]
fn builtin_sequence_helpers() {
    assert_eq!(run("print(len('hello'))"), "5\n");
    assert_eq!(run("print(sum([1, 2, 3]))"), "6\n");
    assert_eq!(run("print(min(4, 2, 9), max(4, 2, 9))"), "2 9\n");
    assert_eq!(run("print(sorted([3, 1, 2]))"), "[1, 2, 3]\n");
    assert_eq!(run("print(sorted([3, 1, 2], reverse=True))"), "[3, 2, 1]\n");
    assert_eq!(run("print(abs(-5), abs(2.5))"), "5 2.5\n");
    assert_eq!(run("print(divmod(7, 3))"), "(2, 1)\n");
}

#[test]
fn sorted_with_key() {
    let code = "
words = ['bbb', 'a', 'cc']
print(sorted(words, key=len))
";
    assert_eq!(run(code), "['a', 'cc', 'bbb']\n");
}

#[test]
fn sort_is_stable_across_copies() {
    let code = "
x = [(1, 'b'), (0, 'a'), (1, 'a'), (0, 'b')]
y = list(x)
x.sort(key=lambda p: p[0])
y.sort(key=lambda p: p[0])
print(x == y)
";
    assert_eq!(run(code), "True\n");
}

#[test]
fn enumerate_zip_map_filter() {
    let code = "
for i, v in enumerate(['a', 'b']):
    print(i, v)
print(list(zip([1, 2], ['x', 'y'])))
print(list(map(lambda v: v + 1, [1, 2])))
print(list(filter(lambda v: v > 1, [1, 2, 3])))
";
    assert_eq!(
        run(code),
        "0 a\n1 b\n[(1, 'x'), (2, 'y')]\n[2, 3]\n[2, 3]\n"
    );
}

#[test]
fn string_methods() {
    let code = "
s = '  Hello World  '
print(s.strip())
print(s.strip().lower())
print(s.strip().split(' '))
print('-'.join(['a', 'b', 'c']))
print('hello'.replace('l', 'L'))
print('hello'.find('ll'))
print('hello'.startswith('he'), 'hello'.endswith('lo'))
print('7'.zfill(3))
";
    assert_eq!(
        run(code),
        "Hello World\nhello world\n['Hello', 'World']\na-b-c\nheLLo\n2\nTrue True\n007\n"
    );
}

#[test]
fn string_conversions() {
    assert_eq!(run("print(int('42'), int('-7'))"), "42 -7\n");
    assert_eq!(run("print(int('ff', 16))"), "255\n");
    assert_eq!(run("print(float('2.5'))"), "2.5\n");
    assert_eq!(run("print(str(42) + '!')"), "42!\n");
}

#[test]
fn bin_oct_hex_chr_ord() {
    assert_eq!(run("print(bin(5), oct(8), hex(255))"), "0b101 0o10 0xff\n");
    assert_eq!(run("print(chr(65), ord('A'))"), "A 65\n");
}

#[test]
fn round_half_away_from_zero() {
    assert_eq!(run("print(round(2.5))"), "3\n");
    assert_eq!(run("print(round(-2.5))"), "-3\n");
    assert_eq!(run("print(round(2.25, 1))"), "2.3\n");
}

#[test]
fn repr_eval_round_trip() {
    for source in [
        "[1, 2, 3]",
        "(1, 2.5, 'a')",
        "{'k': [1, 2], 'v': None}",
        "{1, 2, 3}",
        "[True, False, None]",
        "'quote\\'d'",
    ] {
        let code = format!("print(eval(repr({source})) == {source})");
        assert_eq!(run(&code), "True\n", "round trip failed for {source}");
    }
}

#[test]
fn recursive_container_repr_is_cycle_safe() {
    let code = "
a = [1]
a.append(a)
print(a)
";
    assert_eq!(run(code), "[1, [...]]\n");
}

#[test]
fn recursion_computes_factorial() {
    let code = "
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)
print(fact(10))
";
    assert_eq!(run(code), "3628800\n");
}

#[test]
fn import_math_module() {
    let code = "
import math
print(math.floor(2.7))
print(math.ceil(2.2))
";
    assert_eq!(run(code), "2\n3\n");
}

#[test]
fn from_import_binds_names() {
    let code = "
from math import sqrt as root
print(root(16.0))
";
    assert_eq!(run(code), "4.0\n");
}

#[test]
fn bracket_continuation_spans_lines() {
    let code = "
total = sum([
    1,
    2,
    3,
])
print(total)
";
    assert_eq!(run(code), "6\n");
}

#[test]
fn len_matches_iteration_count() {
    let code = "
for x in [[], [1], [1, 2], 'abc', (1, 2, 3)]:
    n = 0
    for _item in x:
        n += 1
    print(len(x) == n)
";
    assert_eq!(run(code), "True\nTrue\nTrue\nTrue\nTrue\n");
}

#[test]
fn postfix_increment_and_decrement() {
    let code = "
x = 1
x++
x++
x--
print(x)
";
    assert_eq!(run(code), "2\n");
}

#[test]
fn repr_of_floats_is_shortest_form() {
    assert_eq!(eval_repr("0.1"), "0.1");
    assert_eq!(eval_repr("1.0"), "1.0");
    assert_eq!(eval_repr("2.5"), "2.5");
}

#[test]
fn return_inside_try_still_runs_finally() {
    let code = "
def f():
    try:
        return 'value'
    finally:
        print('finally')
print(f())
";
    assert_eq!(run(code), "finally\nvalue\n");
}

#[test]
fn break_inside_try_still_runs_finally() {
    let code = "
for i in range(3):
    try:
        if i == 1:
            break
        print('body', i)
    finally:
        print('cleanup', i)
print('after')
";
    assert_eq!(run(code), "body 0\ncleanup 0\ncleanup 1\nafter\n");
}
