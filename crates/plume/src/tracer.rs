//! Execution tracing hooks.
//!
//! The executor reports instruction dispatch, calls, and raised exceptions
//! to a `VmTracer`. The default tracer is a no-op; `StderrTracer` gives a
//! cheap execution log when debugging embedded scripts.

use crate::lex::SourcePos;

pub trait VmTracer {
    /// Called before each instruction is executed.
    fn on_instruction(&mut self, _name: &'static str, _pos: SourcePos) {}

    /// Called when a callable is entered.
    fn on_call(&mut self, _function: &str) {}

    /// Called when an exception is raised, with the exception's class name.
    fn on_exception(&mut self, _exc_type: &str) {}
}

/// Does nothing; the default.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Logs events to stderr, one line per event.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, name: &'static str, pos: SourcePos) {
        if pos.known() {
            eprintln!("[trace] {name} at line {}", pos.line + 1);
        } else {
            eprintln!("[trace] {name}");
        }
    }

    fn on_call(&mut self, function: &str) {
        eprintln!("[trace] call {function}");
    }

    fn on_exception(&mut self, exc_type: &str) {
        eprintln!("[trace] raise {exc_type}");
    }
}
