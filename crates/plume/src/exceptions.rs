//! Script-level error taxonomy, trace frames, and traceback formatting.
//!
//! A raised exception lives on the context as the "current exception"
//! object; functions signal it by returning `Err(Raised)` so `?` threads
//! the unwind through native code without touching host-language panics.

use std::{fmt::Write as _, rc::Rc};

use strum::{Display, EnumString, IntoStaticStr};

use crate::lex::SourcePos;

/// Marker error: a script exception was raised and recorded on the context.
///
/// Carries no data on purpose; the exception object, message, and trace are
/// context state so that script code can inspect and re-raise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raised;

pub type RunResult<T> = Result<T, Raised>;

/// Error returned when a context cannot be created.
#[derive(Debug, Clone)]
pub struct InitError(pub String);

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InitError {}

/// Built-in exception kinds, named exactly like their script-level classes.
///
/// The hierarchy itself lives in the interpreted prelude; this enum exists
/// so native code can raise by tag without string lookups at call sites.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
pub enum ExcKind {
    BaseException,
    SystemExit,
    Exception,
    StopIteration,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    AttributeError,
    ImportError,
    LookupError,
    IndexError,
    KeyError,
    MemoryError,
    NameError,
    OSError,
    IsADirectoryError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    SyntaxError,
    TypeError,
    ValueError,
}

pub(crate) const DEFAULT_FUNC_NAME: &str = "<unnamed>";

/// A live stack frame, borrowed from the running compilation's source.
#[derive(Debug, Clone)]
pub(crate) struct TraceFrame {
    pub pos: SourcePos,
    pub module: Rc<str>,
    pub func: Rc<str>,
    pub source: Option<Rc<Vec<String>>>,
    pub syntax_error: bool,
}

impl TraceFrame {
    pub fn to_owned_frame(&self) -> OwnedTraceFrame {
        let line_text = self
            .source
            .as_ref()
            .and_then(|lines| lines.get(self.pos.line).cloned())
            .unwrap_or_default();
        OwnedTraceFrame {
            pos: self.pos,
            line_text,
            module: self.module.to_string(),
            func: self.func.to_string(),
            syntax_error: self.syntax_error,
        }
    }
}

/// A frame snapshot taken when an exception is raised, so the traceback
/// survives the stack unwinding beneath it.
#[derive(Debug, Clone)]
pub(crate) struct OwnedTraceFrame {
    pub pos: SourcePos,
    pub line_text: String,
    pub module: String,
    pub func: String,
    pub syntax_error: bool,
}

/// Renders a traceback: one line per frame plus the quoted source line,
/// then `ExceptionClass: message`.
pub(crate) fn format_traceback(
    frames: &[OwnedTraceFrame],
    exc_name: &str,
    message: Option<&str>,
) -> String {
    let mut out = String::from("Traceback (most recent call last):\n");

    for frame in frames {
        out.push_str("  ");
        let _ = write!(out, "Module {}", frame.module);
        if frame.pos.known() {
            let _ = write!(out, ", Line {}", frame.pos.line + 1);
        }
        if frame.func != DEFAULT_FUNC_NAME {
            let _ = write!(out, ", Function {}()", frame.func);
        }
        out.push('\n');

        if !frame.line_text.is_empty() {
            let line_text = frame.line_text.replace('\t', " ");
            let skip = line_text
                .find(|c| c != ' ')
                .unwrap_or(line_text.len());
            let _ = writeln!(out, "    {}", &line_text[skip..]);
            if frame.syntax_error && frame.pos.known() && skip <= frame.pos.column {
                let _ = writeln!(out, "{}^", " ".repeat(frame.pos.column + 4 - skip));
            }
        }
    }

    out.push_str(exc_name);
    if let Some(message) = message {
        if !message.is_empty() {
            let _ = write!(out, ": {message}");
        }
    }
    out.push('\n');
    out
}
