//! Console output capability.
//!
//! The kernel writes diagnostics (`thread_info`, `sysinfo`) through this
//! interface and nothing else; scheduling correctness never depends on it.
//! Concrete drivers (VGA text, UART) live outside the workspace; the
//! variants here cover hosted use and tests.

use std::io::Write as _;

use crate::sync::{Arc, Mutex};

/// Text-output capability.
pub trait Console: Send {
    fn write_text(&mut self, text: &str);
}

/// Shared console handle stored by the kernel.
pub type SharedConsole = Arc<Mutex<Box<dyn Console>>>;

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullConsole;

impl Console for NullConsole {
    fn write_text(&mut self, _text: &str) {}
}

/// Writes to the process stdout.
#[derive(Debug, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_text(&mut self, text: &str) {
        let mut out = std::io::stdout();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// Captures output in a shared string; clones observe the same buffer.
#[derive(Clone, Default)]
pub struct BufferConsole {
    buf: Arc<Mutex<String>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buf.lock().clone()
    }
}

impl Console for BufferConsole {
    fn write_text(&mut self, text: &str) {
        self.buf.lock().push_str(text);
    }
}

/// Wraps a console into the shared handle the kernel stores.
pub fn shared<C: Console + 'static>(console: C) -> SharedConsole {
    Arc::new(Mutex::new(Box::new(console)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_console_captures_text() {
        let console = BufferConsole::new();
        let handle = shared(console.clone());
        handle.lock().write_text("hello ");
        handle.lock().write_text("kernel");
        assert_eq!(console.contents(), "hello kernel");
    }

    #[test]
    fn null_console_discards() {
        let mut console = NullConsole;
        console.write_text("dropped");
    }
}
