//! Output abstraction for the `print` builtin.

use std::{
    cell::RefCell,
    io::{self, Write as _},
    rc::Rc,
};

/// Destination for script print output.
///
/// Implement this to capture or redirect output from embedded code; the
/// default `StdPrint` writes to the process stdout.
pub trait PrintWriter {
    /// Receives one already-formatted chunk, separators and newline
    /// included.
    fn write(&mut self, text: &str);
}

/// Writes script output to stdout, flushing per chunk.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects output into a shared string buffer.
///
/// The buffer handle is cloneable so tests can keep reading while the
/// context owns the writer.
#[derive(Debug, Clone, Default)]
pub struct BufferPrint {
    buffer: Rc<RefCell<String>>,
}

impl BufferPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that observes everything written so far.
    #[must_use]
    pub fn handle(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }

    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

impl PrintWriter for BufferPrint {
    fn write(&mut self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _text: &str) {}
}
