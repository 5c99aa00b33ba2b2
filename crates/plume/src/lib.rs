//! plume: an embeddable interpreter for an indentation-structured,
//! dynamically typed scripting language.
//!
//! The pipeline is strictly staged: lexer, parser, compiler, and a
//! tree-walking instruction executor over a shared object heap with a
//! tracing collector. Embedders create a [`Context`], execute or evaluate
//! source, and interact with objects through handles ([`ObjId`]).
//!
//! ```
//! use plume::{BufferPrint, Config, Context};
//!
//! let output = BufferPrint::new();
//! let mut config = Config::default();
//! config.print = Box::new(output.handle());
//! let mut ctx = Context::new(config).unwrap();
//! ctx.execute("print(2 + 3 * 4)", "<demo>").unwrap();
//! assert_eq!(output.contents(), "14\n");
//! ```

#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is bounds-checked at use sites")]
#![expect(clippy::cast_sign_loss, reason = "hash and bit reinterpretation is intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrapping conversions follow the language's numeric model")]

mod attr_table;
mod builtins;
mod compile;
mod context;
mod dict;
mod exceptions;
mod executor;
mod expressions;
mod heap;
mod io;
mod lex;
mod modules;
mod object;
mod parse;
mod tracer;

pub use crate::{
    context::{Config, Context, ModuleLoader},
    exceptions::{ExcKind, InitError, Raised, RunResult},
    executor::{BinOp, UnOp},
    heap::{HeapStats, ObjId},
    io::{BufferPrint, NoPrint, PrintWriter, StdPrint},
    lex::{CodeError, SourcePos},
    object::{Finalizer, NativeFn},
    tracer::{NoopTracer, StderrTracer, VmTracer},
};
