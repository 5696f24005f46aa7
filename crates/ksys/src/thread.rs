//! Thread descriptors.
//!
//! Descriptors live in an arena owned by the kernel; everything else refers
//! to them through [`kcore::ThreadRef`] arena indices. Public handles carry
//! the slot plus the thread's unique id, so a handle to a recycled slot is
//! detected by the id mismatch instead of dangling.

use std::collections::{HashMap, VecDeque};

use kcore::{Id, ThreadQueue, ThreadRef};

use crate::messages::{Message, SignalHandler};
use crate::port::ExecContext;
use crate::Kernel;

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not schedulable; descriptor possibly pinned for a pending join.
    Passive,
    /// In the ready list of its priority level.
    Ready,
    /// Currently executing. At most one thread systemwide.
    Active,
    /// Blocked in exactly one wait queue.
    Wait,
}

/// What a thread body reports back to the kernel loop after one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStep {
    /// Keep running; the kernel re-activates the thread unless something
    /// strictly better became ready.
    Continue,
    /// Voluntarily rotate to the tail of the thread's own priority level.
    Yield,
    /// A blocking call parked the thread; the body is re-invoked after
    /// release and re-evaluates its request from scratch.
    Blocked,
    /// Terminate with the given exit status.
    Exit(i32),
}

/// One activation of a thread.
pub type ThreadBody = Box<dyn FnMut(&mut Kernel) -> ThreadStep + Send>;

/// Public thread handle: arena slot plus the unique id it held at creation.
///
/// Valid only while the descriptor in that slot still carries the same id;
/// every syscall validates this before touching the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadHandle {
    pub(crate) slot: ThreadRef,
    pub(crate) id: Id,
}

impl ThreadHandle {
    pub fn id(&self) -> Id {
        self.id
    }
}

/// The wait queue (if any) currently holding a thread.
///
/// Cancellation uses this to pull a thread out of whatever it blocks on
/// without searching every queue in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitChannel {
    None,
    Semaphore(Id),
    Device(usize),
    Queue(Id),
    Inbox(ThreadRef),
    Join(ThreadRef),
}

/// Stack region owned by (or lent to) a thread.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StackRegion {
    pub(crate) size: usize,
    /// Owned stacks are released on exit; external ones stay with the
    /// caller that supplied them.
    pub(crate) owned: bool,
}

/// Creation parameters for a thread.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub(crate) name: String,
    pub(crate) priority: usize,
    pub(crate) stack_size: Option<usize>,
    pub(crate) external_stack: bool,
    pub(crate) run_immediately: bool,
    pub(crate) detached: bool,
}

impl ThreadConfig {
    pub fn new(name: impl Into<String>, priority: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            stack_size: None,
            external_stack: false,
            run_immediately: true,
            detached: false,
        }
    }

    /// Overrides the configured default stack size.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Marks the stack as supplied by the caller; it is not released when
    /// the thread exits.
    pub fn external_stack(mut self) -> Self {
        self.external_stack = true;
        self
    }

    /// Creates the thread passive instead of ready.
    pub fn deferred(mut self) -> Self {
        self.run_immediately = false;
        self
    }

    /// Charges no reference for the returned handle; the descriptor and
    /// its id are reclaimed as soon as the thread exits. Nobody can
    /// collect a detached thread's exit status.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

/// Thread descriptor. One per schedulable unit, owned by the kernel arena.
pub(crate) struct Kthread {
    pub(crate) id: Id,
    pub(crate) name: String,
    pub(crate) prio: usize,
    pub(crate) state: ThreadState,
    pub(crate) channel: WaitChannel,
    /// Self reference plus outstanding handle/joiner references; the
    /// descriptor is destroyed only at zero.
    pub(crate) refcount: u32,
    pub(crate) exit_status: Option<i32>,
    pub(crate) errno: i32,
    /// Wait channel whose wake handed this thread the contended resource
    /// (semaphore unit, device lock); consumed only by the retried call
    /// on that same channel.
    pub(crate) grant: Option<WaitChannel>,
    pub(crate) body: Option<ThreadBody>,
    pub(crate) context: ExecContext,
    pub(crate) stack: Option<StackRegion>,
    /// Payload delivered with a signal, owned on the thread's behalf.
    pub(crate) private: Option<Vec<u8>>,
    pub(crate) joiners: ThreadQueue,
    pub(crate) inbox: VecDeque<Message>,
    pub(crate) inbox_waiters: ThreadQueue,
    pub(crate) min_msg_type: u32,
    pub(crate) min_sig_type: u32,
    pub(crate) sig_handlers: HashMap<u32, SignalHandler>,
}

impl Kthread {
    pub(crate) fn new(
        id: Id,
        name: String,
        prio: usize,
        context: ExecContext,
        stack: StackRegion,
        body: ThreadBody,
    ) -> Self {
        Self {
            id,
            name,
            prio,
            state: ThreadState::Passive,
            channel: WaitChannel::None,
            refcount: 0,
            exit_status: None,
            errno: 0,
            grant: None,
            body: Some(body),
            context,
            stack: Some(stack),
            private: None,
            joiners: ThreadQueue::new(),
            inbox: VecDeque::new(),
            inbox_waiters: ThreadQueue::new(),
            min_msg_type: 0,
            min_sig_type: 0,
            sig_handlers: HashMap::new(),
        }
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.state == ThreadState::Passive && self.exit_status.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ThreadConfig::new("worker", 5);
        assert_eq!(config.name, "worker");
        assert_eq!(config.priority, 5);
        assert_eq!(config.stack_size, None);
        assert!(config.run_immediately);
        assert!(!config.external_stack);
        assert!(!config.detached);
    }

    #[test]
    fn config_builder_chains() {
        let config = ThreadConfig::new("io", 2)
            .stack_size(8192)
            .external_stack()
            .deferred();
        assert_eq!(config.stack_size, Some(8192));
        assert!(config.external_stack);
        assert!(!config.run_immediately);
    }
}
