//! The str builtin class.
//!
//! Strings index and slice by character, equality is byte-sequence
//! equality, and hashing is deterministic within a process (fixed-seed),
//! so dict ordering is reproducible across runs of the same build.

use std::hash::BuildHasher as _;

use crate::{
    builtins::{
        abs_index, expect_count, expect_count_between, int_arg, is_slice, iterate_range,
        register_method, resolve_slice, str_arg,
    },
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
    object::ObjPayload,
};

pub(super) fn install(ctx: &mut Context) -> RunResult<()> {
    let str_class = ctx.new_class("str", &[])?;
    ctx.builtins.str_class = str_class;
    ctx.set_global("str", str_class);

    register_method(ctx, str_class, "__init__", str_init)?;
    register_method(ctx, str_class, "__nonzero__", str_nonzero)?;
    register_method(ctx, str_class, "__int__", str_int)?;
    register_method(ctx, str_class, "__float__", str_float)?;
    register_method(ctx, str_class, "__str__", super::object_self)?;
    register_method(ctx, str_class, "__repr__", str_repr)?;
    register_method(ctx, str_class, "__len__", str_len)?;
    register_method(ctx, str_class, "__add__", str_add)?;
    register_method(ctx, str_class, "__mul__", str_mul)?;
    register_method(ctx, str_class, "__getitem__", str_getitem)?;
    register_method(ctx, str_class, "__contains__", str_contains)?;
    register_method(ctx, str_class, "__lt__", str_lt)?;
    register_method(ctx, str_class, "__eq__", str_eq)?;
    register_method(ctx, str_class, "__hash__", str_hash)?;
    register_method(ctx, str_class, "capitalize", str_capitalize)?;
    register_method(ctx, str_class, "lower", str_lower)?;
    register_method(ctx, str_class, "upper", str_upper)?;
    register_method(ctx, str_class, "count", str_count)?;
    register_method(ctx, str_class, "find", str_find)?;
    register_method(ctx, str_class, "index", str_index)?;
    register_method(ctx, str_class, "rfind", str_rfind)?;
    register_method(ctx, str_class, "rindex", str_rindex)?;
    register_method(ctx, str_class, "startswith", str_startswith)?;
    register_method(ctx, str_class, "endswith", str_endswith)?;
    register_method(ctx, str_class, "isalnum", str_isalnum)?;
    register_method(ctx, str_class, "isalpha", str_isalpha)?;
    register_method(ctx, str_class, "isdigit", str_isdigit)?;
    register_method(ctx, str_class, "islower", str_islower)?;
    register_method(ctx, str_class, "isupper", str_isupper)?;
    register_method(ctx, str_class, "isspace", str_isspace)?;
    register_method(ctx, str_class, "join", str_join)?;
    register_method(ctx, str_class, "ljust", str_ljust)?;
    register_method(ctx, str_class, "rjust", str_rjust)?;
    register_method(ctx, str_class, "lstrip", str_lstrip)?;
    register_method(ctx, str_class, "rstrip", str_rstrip)?;
    register_method(ctx, str_class, "strip", str_strip)?;
    register_method(ctx, str_class, "replace", str_replace)?;
    register_method(ctx, str_class, "split", str_split)?;
    register_method(ctx, str_class, "splitlines", str_splitlines)?;
    register_method(ctx, str_class, "zfill", str_zfill)?;

    Ok(())
}

fn str_init(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let mut value = String::new();
    if argv.len() == 2 {
        let result = ctx.call_method(argv[1], "__str__", &[], None)?;
        let Some(converted) = ctx.heap.get(result).as_str() else {
            return Err(ctx.raise_kind(
                ExcKind::TypeError,
                "__str__() returned a non string type",
            ));
        };
        value = converted.to_string();
    }

    let attrs = ctx.class_instance_attrs(ctx.builtins.str_class);
    let obj = ctx.heap.get_mut(argv[0]);
    obj.attrs = attrs;
    obj.payload = ObjPayload::Str(value);
    obj.type_name = ctx.tags.str_.clone();
    Ok(ctx.none())
}

fn str_nonzero(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    Ok(ctx.new_bool(!s.is_empty()))
}

/// `int(s[, base])`: optional sign, then digits in the given base. Base 0
/// is not supported; prefixes are accepted only when they match the base.
fn str_int(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let s = str_arg(ctx, argv, 0)?;
    let base = if argv.len() == 2 {
        let base = int_arg(ctx, argv, 1)?;
        if !(2..=36).contains(&base) {
            return Err(ctx.raise_kind(ExcKind::ValueError, "Invalid base"));
        }
        base as u32
    } else {
        10
    };

    let trimmed = s.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = match base {
        2 => digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")),
        8 => digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")),
        16 => digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")),
        _ => None,
    }
    .unwrap_or(digits);

    match i64::from_str_radix(digits, base) {
        Ok(value) => ctx.new_int(if negative { -value } else { value }),
        Err(_) => Err(ctx.raise_kind(ExcKind::ValueError, "Invalid integer string")),
    }
}

fn str_float(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    match s.trim().parse::<f64>() {
        Ok(value) => ctx.new_float(value),
        Err(_) => Err(ctx.raise_kind(ExcKind::ValueError, "Invalid float string")),
    }
}

fn str_repr(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;

    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            c if (' '..='~').contains(&c) => out.push(c),
            c if (c as u32) < 0x100 => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    ctx.new_str(&out)
}

fn str_len(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    ctx.new_int(s.chars().count() as i64)
}

fn str_add(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = str_arg(ctx, argv, 0)?;
    let rhs = str_arg(ctx, argv, 1)?;
    ctx.new_str(&format!("{lhs}{rhs}"))
}

fn str_mul(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let s = str_arg(ctx, argv, 0)?;
    let count = int_arg(ctx, argv, 1)?;
    let repeated = s.repeat(usize::try_from(count).unwrap_or(0));
    ctx.new_str(&repeated)
}

fn str_getitem(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let s = str_arg(ctx, argv, 0)?;
    let chars: Vec<char> = s.chars().collect();
    let length = chars.len() as i64;

    if is_slice(ctx, argv[1]) {
        let (start, stop, step) = resolve_slice(ctx, length, argv[1])?;
        let mut out = String::new();
        iterate_range(start, stop, step, |i| {
            if i >= 0 && i < length {
                out.push(chars[i as usize]);
            }
        });
        return ctx.new_str(&out);
    }

    let index = abs_index(ctx, length, argv[1])?;
    if index < 0 || index >= length {
        return Err(ctx.raise_kind(ExcKind::IndexError, "index out of range"));
    }
    ctx.new_str(&chars[index as usize].to_string())
}

fn str_contains(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let haystack = str_arg(ctx, argv, 0)?;
    let needle = str_arg(ctx, argv, 1)?;
    Ok(ctx.new_bool(haystack.contains(&needle)))
}

fn str_lt(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = str_arg(ctx, argv, 0)?;
    let rhs = str_arg(ctx, argv, 1)?;
    Ok(ctx.new_bool(lhs < rhs))
}

fn str_eq(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let lhs = str_arg(ctx, argv, 0)?;
    let equal = ctx.heap.get(argv[1]).as_str() == Some(lhs.as_str());
    Ok(ctx.new_bool(equal))
}

fn str_hash(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    // Fixed seeds keep hashes deterministic for a given build.
    let hasher = ahash::RandomState::with_seeds(0x5c4f, 0x91e3, 0x2b6d, 0xd708);
    let hash = hasher.hash_one(s.as_bytes());
    ctx.new_int(hash as i64)
}

fn str_capitalize(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let mut chars = s.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>()
            + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    ctx.new_str(&capitalized)
}

fn str_lower(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let lower = s.to_lowercase();
    ctx.new_str(&lower)
}

fn str_upper(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let upper = s.to_uppercase();
    ctx.new_str(&upper)
}

fn str_count(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let haystack = str_arg(ctx, argv, 0)?;
    let needle = str_arg(ctx, argv, 1)?;
    if needle.is_empty() {
        return ctx.new_int(haystack.chars().count() as i64 + 1);
    }
    ctx.new_int(haystack.matches(&needle).count() as i64)
}

fn char_index_of_byte(s: &str, byte_index: usize) -> i64 {
    s[..byte_index].chars().count() as i64
}

fn str_find(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let haystack = str_arg(ctx, argv, 0)?;
    let needle = str_arg(ctx, argv, 1)?;
    match haystack.find(&needle) {
        Some(byte_index) => {
            let index = char_index_of_byte(&haystack, byte_index);
            ctx.new_int(index)
        }
        None => ctx.new_int(-1),
    }
}

fn str_index(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    let found = str_find(ctx, argv)?;
    if ctx.heap.get(found).as_int() == Some(-1) {
        return Err(ctx.raise_kind(ExcKind::ValueError, "substring not found"));
    }
    Ok(found)
}

fn str_rfind(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let haystack = str_arg(ctx, argv, 0)?;
    let needle = str_arg(ctx, argv, 1)?;
    match haystack.rfind(&needle) {
        Some(byte_index) => {
            let index = char_index_of_byte(&haystack, byte_index);
            ctx.new_int(index)
        }
        None => ctx.new_int(-1),
    }
}

fn str_rindex(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    let found = str_rfind(ctx, argv)?;
    if ctx.heap.get(found).as_int() == Some(-1) {
        return Err(ctx.raise_kind(ExcKind::ValueError, "substring not found"));
    }
    Ok(found)
}

fn str_startswith(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let s = str_arg(ctx, argv, 0)?;
    let prefix = str_arg(ctx, argv, 1)?;
    Ok(ctx.new_bool(s.starts_with(&prefix)))
}

fn str_endswith(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let s = str_arg(ctx, argv, 0)?;
    let suffix = str_arg(ctx, argv, 1)?;
    Ok(ctx.new_bool(s.ends_with(&suffix)))
}

macro_rules! char_predicate {
    ($name:ident, $pred:expr) => {
        fn $name(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
            expect_count(ctx, argv, 1)?;
            let s = str_arg(ctx, argv, 0)?;
            #[allow(clippy::redundant_closure_call)]
            let result = !s.is_empty() && s.chars().all($pred);
            Ok(ctx.new_bool(result))
        }
    };
}

char_predicate!(str_isalnum, |c: char| c.is_ascii_alphanumeric());
char_predicate!(str_isalpha, |c: char| c.is_ascii_alphabetic());
char_predicate!(str_isdigit, |c: char| c.is_ascii_digit());
char_predicate!(str_isspace, |c: char| c.is_whitespace());

fn str_islower(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let has_cased = s.chars().any(char::is_alphabetic);
    Ok(ctx.new_bool(has_cased && !s.chars().any(char::is_uppercase)))
}

fn str_isupper(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let has_cased = s.chars().any(char::is_alphabetic);
    Ok(ctx.new_bool(has_cased && !s.chars().any(char::is_lowercase)))
}

fn str_join(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let separator = str_arg(ctx, argv, 0)?;

    let mut parts: Vec<String> = Vec::new();
    self_iterate_strings(ctx, argv[1], &mut parts)?;
    let joined = parts.join(&separator);
    ctx.new_str(&joined)
}

fn self_iterate_strings(
    ctx: &mut Context,
    iterable: ObjId,
    out: &mut Vec<String>,
) -> RunResult<()> {
    ctx.iterate(iterable, &mut |ctx, value| {
        match ctx.heap.get(value).as_str() {
            Some(s) => {
                out.push(s.to_string());
                Ok(true)
            }
            None => Err(ctx.raise_kind(ExcKind::TypeError, "Expected a str")),
        }
    })
}

fn str_ljust(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 2, 3)?;
    let s = str_arg(ctx, argv, 0)?;
    let width = usize::try_from(int_arg(ctx, argv, 1)?).unwrap_or(0);
    let fill = pad_char(ctx, argv)?;
    let mut out = s.clone();
    while out.chars().count() < width {
        out.push(fill);
    }
    ctx.new_str(&out)
}

fn str_rjust(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 2, 3)?;
    let s = str_arg(ctx, argv, 0)?;
    let width = usize::try_from(int_arg(ctx, argv, 1)?).unwrap_or(0);
    let fill = pad_char(ctx, argv)?;
    let mut out = String::new();
    let missing = width.saturating_sub(s.chars().count());
    for _ in 0..missing {
        out.push(fill);
    }
    out.push_str(&s);
    ctx.new_str(&out)
}

fn pad_char(ctx: &mut Context, argv: &[ObjId]) -> RunResult<char> {
    if argv.len() < 3 {
        return Ok(' ');
    }
    let fill = str_arg(ctx, argv, 2)?;
    let mut chars = fill.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ctx.raise_kind(
            ExcKind::TypeError,
            "The fill character must be exactly one character long",
        )),
    }
}

fn strip_chars(ctx: &mut Context, argv: &[ObjId]) -> RunResult<(String, Vec<char>)> {
    let s = str_arg(ctx, argv, 0)?;
    let chars = if argv.len() >= 2 && !ctx.is_none(argv[1]) {
        str_arg(ctx, argv, 1)?.chars().collect()
    } else {
        vec![' ', '\t', '\n', '\r', '\x0b', '\x0c']
    };
    Ok((s, chars))
}

fn str_lstrip(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let (s, chars) = strip_chars(ctx, argv)?;
    let stripped = s.trim_start_matches(|c| chars.contains(&c)).to_string();
    ctx.new_str(&stripped)
}

fn str_rstrip(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let (s, chars) = strip_chars(ctx, argv)?;
    let stripped = s.trim_end_matches(|c| chars.contains(&c)).to_string();
    ctx.new_str(&stripped)
}

fn str_strip(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let (s, chars) = strip_chars(ctx, argv)?;
    let stripped = s.trim_matches(|c| chars.contains(&c)).to_string();
    ctx.new_str(&stripped)
}

fn str_replace(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 3, 4)?;
    let s = str_arg(ctx, argv, 0)?;
    let from = str_arg(ctx, argv, 1)?;
    let to = str_arg(ctx, argv, 2)?;
    let replaced = if argv.len() == 4 {
        let count = usize::try_from(int_arg(ctx, argv, 3)?).unwrap_or(0);
        s.replacen(&from, &to, count)
    } else {
        s.replace(&from, &to)
    };
    ctx.new_str(&replaced)
}

fn str_split(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count_between(ctx, argv, 1, 2)?;
    let s = str_arg(ctx, argv, 0)?;

    let parts: Vec<String> = if argv.len() == 2 && !ctx.is_none(argv[1]) {
        let separator = str_arg(ctx, argv, 1)?;
        if separator.is_empty() {
            return Err(ctx.raise_kind(ExcKind::ValueError, "empty separator"));
        }
        s.split(&separator).map(ToString::to_string).collect()
    } else {
        s.split_whitespace().map(ToString::to_string).collect()
    };

    let mut items = Vec::with_capacity(parts.len());
    let protect_base = ctx.protected.len();
    for part in &parts {
        let item = ctx.new_str(part);
        match item {
            Ok(item) => {
                ctx.protected.push(item);
                items.push(item);
            }
            Err(raised) => {
                ctx.protected.truncate(protect_base);
                return Err(raised);
            }
        }
    }
    let list = ctx.new_list(&items);
    ctx.protected.truncate(protect_base);
    list
}

fn str_splitlines(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let s = str_arg(ctx, argv, 0)?;
    let parts: Vec<&str> = s.lines().collect();

    let mut items = Vec::with_capacity(parts.len());
    let protect_base = ctx.protected.len();
    for part in &parts {
        let item = ctx.new_str(part);
        match item {
            Ok(item) => {
                ctx.protected.push(item);
                items.push(item);
            }
            Err(raised) => {
                ctx.protected.truncate(protect_base);
                return Err(raised);
            }
        }
    }
    let list = ctx.new_list(&items);
    ctx.protected.truncate(protect_base);
    list
}

fn str_zfill(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let s = str_arg(ctx, argv, 0)?;
    let width = usize::try_from(int_arg(ctx, argv, 1)?).unwrap_or(0);

    let (sign, body) = match s.strip_prefix(['-', '+']) {
        Some(rest) => (&s[..1], rest),
        None => ("", s.as_str()),
    };
    let missing = width.saturating_sub(s.chars().count());
    let filled = format!("{sign}{}{body}", "0".repeat(missing));
    ctx.new_str(&filled)
}
