//! Architecture seam.
//!
//! The kernel never touches registers or stacks directly; it asks the CPU
//! port to build an initial execution context for a new thread and to
//! switch to a thread after every scheduling decision. The simulated port
//! used in hosted builds and tests records those switches.

use kcore::sync::{Arc, Mutex};
use kcore::ThreadRef;

/// Opaque saved execution state of one thread.
///
/// Owned by the thread descriptor but meaningful only to the port that
/// built it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    token: u64,
    stack_size: usize,
}

impl ExecContext {
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

/// Save/restore capability of the target architecture.
pub trait CpuPort: Send {
    /// Builds the initial context that will run the thread's entry on a
    /// stack of the given size.
    fn build_context(&mut self, thread: ThreadRef, stack_size: usize) -> ExecContext;

    /// Resumes the given thread from its saved context. Called after
    /// every scheduling decision, including when the decision keeps the
    /// active thread.
    fn switch_to(&mut self, next: ThreadRef, context: ExecContext);
}

/// Port for hosted execution: contexts are tokens, switches are recorded.
pub struct SimPort {
    next_token: u64,
    switches: Arc<Mutex<Vec<ThreadRef>>>,
}

impl SimPort {
    pub fn new() -> Self {
        Self {
            next_token: 1,
            switches: Arc::default(),
        }
    }

    /// Shares the switch log with a test that wants to assert on it.
    pub fn switch_log(&self) -> Arc<Mutex<Vec<ThreadRef>>> {
        Arc::clone(&self.switches)
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuPort for SimPort {
    fn build_context(&mut self, _thread: ThreadRef, stack_size: usize) -> ExecContext {
        let token = self.next_token;
        self.next_token += 1;
        ExecContext { token, stack_size }
    }

    fn switch_to(&mut self, next: ThreadRef, _context: ExecContext) {
        self.switches.lock().push(next);
    }
}
