//! Kernel context object.
//!
//! All mutable kernel state (thread arena, ready list, active thread,
//! synchronization objects, alarms) lives in one [`Kernel`] value. The
//! `&mut self` discipline on every operation is the hosted rendition of
//! "disable interrupts around the critical region": nothing observes the
//! tables mid-mutation, and multiple kernels can coexist in one process
//! for testing.

use std::collections::HashMap;

use kcore::console::{self, NullConsole, SharedConsole};
use kcore::{Id, IdPool, KernelError, KernelResult, ReadyList, ThreadRef};

use crate::config::KernelConfig;
use crate::devices::DeviceSlot;
use crate::messages::MsgQueue;
use crate::port::{CpuPort, SimPort};
use crate::sem::Semaphore;
use crate::thread::{
    Kthread, StackRegion, ThreadBody, ThreadConfig, ThreadHandle, ThreadState, ThreadStep,
    WaitChannel,
};
use crate::time::Alarm;

/// Result of collecting another thread's exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The thread finished; its status was collected exactly once.
    Exited(i32),
    /// The handle is stale: the descriptor was already collected (or the
    /// slot was recycled for a new thread).
    AlreadyGone,
}

pub struct Kernel {
    config: KernelConfig,
    port: Box<dyn CpuPort>,
    console: SharedConsole,
    pub(crate) ids: IdPool,
    pub(crate) threads: Vec<Option<Kthread>>,
    live_threads: usize,
    pub(crate) ready: ReadyList,
    pub(crate) active: Option<ThreadRef>,
    idle: ThreadRef,
    pub(crate) sems: HashMap<Id, Semaphore>,
    pub(crate) queues: HashMap<Id, MsgQueue>,
    pub(crate) devices: Vec<DeviceSlot>,
    pub(crate) alarms: Vec<Alarm>,
    pub(crate) ticks: u64,
}

impl Kernel {
    /// Hosted kernel: simulated CPU port, discarded console output.
    pub fn new(config: KernelConfig) -> Self {
        Self::with_parts(config, Box::new(SimPort::new()), console::shared(NullConsole))
    }

    pub fn with_parts(
        config: KernelConfig,
        port: Box<dyn CpuPort>,
        console: SharedConsole,
    ) -> Self {
        let mut kernel = Self {
            ids: IdPool::new(config.id_capacity),
            ready: ReadyList::new(config.priority_levels),
            threads: Vec::new(),
            live_threads: 0,
            active: None,
            idle: ThreadRef(0),
            sems: HashMap::new(),
            queues: HashMap::new(),
            devices: Vec::new(),
            alarms: Vec::new(),
            ticks: 0,
            port,
            console,
            config,
        };
        let idle_prio = kernel.config.worst_priority();
        let idle = match kernel.create_thread(
            ThreadConfig::new("idle", idle_prio),
            Box::new(|_| ThreadStep::Yield),
        ) {
            Ok(handle) => handle.slot,
            Err(err) => panic!("failed to create the idle thread: {err}"),
        };
        kernel.idle = idle;
        kernel
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn console(&self) -> SharedConsole {
        SharedConsole::clone(&self.console)
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    /// Creates a thread and returns a handle the caller can join or
    /// cancel through. Priority is clamped into the supported range.
    pub fn create_thread(
        &mut self,
        config: ThreadConfig,
        body: ThreadBody,
    ) -> KernelResult<ThreadHandle> {
        if self.live_threads >= self.config.max_threads {
            log::warn!("thread limit reached ({})", self.config.max_threads);
            return Err(self.fail(KernelError::NoMemory));
        }

        let slot = match self.threads.iter().position(Option::is_none) {
            Some(free) => ThreadRef(free as u32),
            None => {
                self.threads.push(None);
                ThreadRef((self.threads.len() - 1) as u32)
            }
        };

        let id = self.ids.allocate();
        let prio = config.priority.min(self.config.worst_priority());
        let stack_size = config.stack_size.unwrap_or(self.config.default_stack_size);
        let context = self.port.build_context(slot, stack_size);
        let stack = StackRegion {
            size: stack_size,
            owned: !config.external_stack,
        };

        let mut thread = Kthread::new(id, config.name, prio, context, stack, body);
        thread.refcount = u32::from(!config.detached); // the returned handle
        if config.run_immediately {
            thread.refcount += 1; // self reference while schedulable
            thread.state = ThreadState::Ready;
        }
        log::debug!(
            "created thread '{}' id={:?} prio={} stack={}",
            thread.name,
            id,
            prio,
            stack_size
        );

        self.threads[slot.index()] = Some(thread);
        self.live_threads += 1;
        if config.run_immediately {
            self.ready.enqueue(prio, slot);
        }
        Ok(ThreadHandle { slot, id })
    }

    /// Readies a thread created deferred. No-op class errors for handles
    /// that are stale or already schedulable.
    pub fn thread_start(&mut self, handle: ThreadHandle) -> KernelResult<()> {
        let Some(slot) = self.resolve(handle) else {
            return Err(self.fail(KernelError::DontExist));
        };
        let startable = {
            let thread = self.thr(slot);
            thread.state == ThreadState::Passive && thread.exit_status.is_none()
        };
        if !startable {
            return Err(self.fail(KernelError::InvalidArgument));
        }
        let prio = {
            let thread = self.thr_mut(slot);
            thread.state = ThreadState::Ready;
            thread.refcount += 1;
            thread.prio
        };
        self.ready.enqueue(prio, slot);
        Ok(())
    }

    /// Terminates the calling thread with the given status.
    ///
    /// The body that invoked this must return [`ThreadStep::Blocked`] (or
    /// anything; the step is discarded once the thread is gone).
    pub fn thread_exit(&mut self, status: i32) -> KernelResult<()> {
        if self.active.is_none() {
            return Err(KernelError::InvalidArgument);
        }
        self.exit_current(status);
        Ok(())
    }

    /// Handle of the thread currently executing.
    pub fn thread_self(&self) -> Option<ThreadHandle> {
        let slot = self.active?;
        Some(ThreadHandle {
            slot,
            id: self.thr(slot).id,
        })
    }

    /// Collects another thread's exit status.
    ///
    /// A finished thread's status is collected exactly once; later calls
    /// (and calls through recycled handles) report [`JoinOutcome::AlreadyGone`].
    /// With `block`, an unfinished target parks the caller on the target's
    /// join queue and the call reports [`KernelError::Retry`].
    pub fn wait_for_thread(
        &mut self,
        handle: ThreadHandle,
        block: bool,
    ) -> KernelResult<JoinOutcome> {
        let Some(slot) = self.resolve(handle) else {
            return Ok(JoinOutcome::AlreadyGone);
        };

        if self.thr(slot).has_exited() {
            let (status, gone) = {
                let thread = self.thr_mut(slot);
                thread.refcount -= 1;
                (thread.exit_status.unwrap_or(0), thread.refcount == 0)
            };
            if gone {
                self.destroy(slot);
            }
            return Ok(JoinOutcome::Exited(status));
        }

        if !block {
            return Err(self.fail(KernelError::NotFinished));
        }
        let Some(caller) = self.active else {
            // Nothing to park outside thread context.
            return Err(self.fail(KernelError::NotFinished));
        };
        if caller == slot {
            return Err(self.fail(KernelError::InvalidArgument));
        }

        self.park_active(WaitChannel::Join(slot));
        self.thr_mut(slot).joiners.append(caller);
        Err(KernelError::Retry)
    }

    /// Forces a READY or WAIT thread through the normal exit path.
    ///
    /// Cleanup is identical to a voluntary exit: the target is pulled out
    /// of whatever queue holds it, briefly made active, and exited with
    /// status `-1`. A passive or stale target is a no-op success; the
    /// active thread (and the idle thread) cannot be cancelled.
    pub fn cancel_thread(&mut self, handle: ThreadHandle) -> KernelResult<()> {
        let Some(slot) = self.resolve(handle) else {
            return Ok(());
        };
        if slot == self.idle {
            return Err(self.fail(KernelError::InvalidArgument));
        }

        match self.thr(slot).state {
            ThreadState::Passive => return Ok(()),
            ThreadState::Active => return Err(self.fail(KernelError::InvalidHandle)),
            ThreadState::Ready => {
                let prio = self.thr(slot).prio;
                self.ready.remove(prio, slot);
            }
            ThreadState::Wait => self.unqueue_waiter(slot),
        }

        log::debug!("cancelling thread '{}'", self.thr(slot).name);
        if let Some(caller) = self.active.take() {
            let prio = {
                let thread = self.thr_mut(caller);
                thread.state = ThreadState::Ready;
                thread.prio
            };
            self.ready.enqueue(prio, caller);
        }
        {
            let thread = self.thr_mut(slot);
            thread.state = ThreadState::Active;
            thread.channel = WaitChannel::None;
        }
        self.active = Some(slot);
        self.exit_current(-1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-thread error slot
    // ------------------------------------------------------------------

    /// Last error code recorded for the calling thread.
    pub fn errno(&self) -> i32 {
        self.active.map_or(0, |slot| self.thr(slot).errno)
    }

    pub fn set_errno(&mut self, code: i32) {
        if let Some(slot) = self.active {
            self.thr_mut(slot).errno = code;
        }
    }

    /// Inspects another thread's error slot (diagnostics).
    pub fn errno_of(&self, handle: ThreadHandle) -> KernelResult<i32> {
        match self.resolve(handle) {
            Some(slot) => Ok(self.thr(slot).errno),
            None => Err(KernelError::DontExist),
        }
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    /// The central scheduling decision.
    ///
    /// Keeps the active thread unless a strictly better priority is ready;
    /// otherwise requeues it at its own level (FIFO tail) and activates
    /// the head of the best ready level. No active thread and an empty
    /// ready list means even the idle thread is gone, which is fatal.
    pub(crate) fn schedule(&mut self) {
        let best = self.ready.best();
        if let Some(active) = self.active {
            let (active_prio, context) = {
                let thread = self.thr(active);
                (thread.prio, thread.context)
            };
            if best.map_or(true, |ready_prio| active_prio <= ready_prio) {
                self.port.switch_to(active, context);
                return;
            }
            self.thr_mut(active).state = ThreadState::Ready;
            self.ready.enqueue(active_prio, active);
            self.active = None;
        }

        let Some(prio) = best else {
            panic!("scheduler has nothing to run; the idle thread is gone");
        };
        let Some(next) = self.ready.pop(prio) else {
            panic!("ready bitmap claims level {prio} non-empty");
        };
        let context = {
            let thread = self.thr_mut(next);
            thread.state = ThreadState::Active;
            thread.channel = WaitChannel::None;
            thread.context
        };
        self.active = Some(next);
        self.port.switch_to(next, context);
    }

    /// Runs one scheduling decision plus one activation of the winner.
    ///
    /// Returns false when only the idle thread remains runnable, i.e. the
    /// system is quiescent.
    pub fn dispatch_once(&mut self) -> bool {
        self.schedule();
        let Some(active) = self.active else {
            panic!("no active thread after scheduling");
        };
        if active == self.idle && self.ready.is_empty() {
            return false;
        }

        let slot = active.index();
        let (id, body) = {
            let thread = self.thr_mut(active);
            (thread.id, thread.body.take())
        };
        let Some(mut body) = body else {
            return true;
        };

        let step = body(self);

        // The body may have exited or been superseded; only give the
        // closure back to the same descriptor it came from.
        if let Some(thread) = self.threads.get_mut(slot).and_then(Option::as_mut) {
            if thread.id == id && thread.body.is_none() {
                thread.body = Some(body);
            }
        }

        let still_active = self.active == Some(active)
            && self
                .threads
                .get(slot)
                .and_then(Option::as_ref)
                .is_some_and(|thread| thread.id == id);
        if still_active {
            match step {
                ThreadStep::Continue | ThreadStep::Blocked => {}
                ThreadStep::Yield => {
                    let prio = self.thr(active).prio;
                    self.thr_mut(active).state = ThreadState::Ready;
                    self.ready.enqueue(prio, active);
                    self.active = None;
                }
                ThreadStep::Exit(status) => self.exit_current(status),
            }
        }
        true
    }

    /// Dispatches until the system goes quiescent or `max_steps` is hit.
    /// Returns the number of activations run.
    pub fn run_until_idle(&mut self, max_steps: usize) -> usize {
        for step in 0..max_steps {
            if !self.dispatch_once() {
                return step;
            }
        }
        max_steps
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn live_thread_count(&self) -> usize {
        self.live_threads
    }

    pub fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.resolve(handle).map(|slot| self.thr(slot).state)
    }

    /// Writes a one-line-per-thread listing through the console.
    pub fn thread_info(&self) {
        let mut text = String::new();
        for entry in self.threads.iter().flatten() {
            text.push_str(&format!(
                "id={} name={} prio={} state={:?} refs={} stack={}\n",
                entry.id.0,
                entry.name,
                entry.prio,
                entry.state,
                entry.refcount,
                entry.stack.map_or(0, |stack| stack.size),
            ));
        }
        self.console.lock().write_text(&text);
    }

    /// Writes a system snapshot (thread states, ready mask, tick count)
    /// through the console.
    pub fn sysinfo(&self) {
        let mut ready = 0usize;
        let mut waiting = 0usize;
        let mut passive = 0usize;
        for entry in self.threads.iter().flatten() {
            match entry.state {
                ThreadState::Ready => ready += 1,
                ThreadState::Wait => waiting += 1,
                ThreadState::Passive => passive += 1,
                ThreadState::Active => {}
            }
        }
        let mask: Vec<String> = self
            .ready
            .mask_words()
            .iter()
            .map(|word| format!("{word:#018x}"))
            .collect();
        let text = format!(
            "threads={} active={} ready={} waiting={} passive={}\n\
             ready mask: {}\nticks={}\n",
            self.live_threads,
            usize::from(self.active.is_some()),
            ready,
            waiting,
            passive,
            mask.join(" "),
            self.ticks,
        );
        self.console.lock().write_text(&text);
    }

    // ------------------------------------------------------------------
    // Internals shared with the synchronization layer
    // ------------------------------------------------------------------

    pub(crate) fn thr(&self, slot: ThreadRef) -> &Kthread {
        match self.threads.get(slot.index()).and_then(Option::as_ref) {
            Some(thread) => thread,
            None => panic!("corrupted thread reference {slot:?}"),
        }
    }

    pub(crate) fn thr_mut(&mut self, slot: ThreadRef) -> &mut Kthread {
        match self.threads.get_mut(slot.index()).and_then(Option::as_mut) {
            Some(thread) => thread,
            None => panic!("corrupted thread reference {slot:?}"),
        }
    }

    pub(crate) fn resolve(&self, handle: ThreadHandle) -> Option<ThreadRef> {
        self.threads
            .get(handle.slot.index())
            .and_then(Option::as_ref)
            .filter(|thread| thread.id == handle.id)
            .map(|_| handle.slot)
    }

    /// Moves the active thread onto a wait channel. The caller appends it
    /// to the matching queue and reports `Retry`.
    pub(crate) fn park_active(&mut self, channel: WaitChannel) -> ThreadRef {
        let Some(slot) = self.active.take() else {
            panic!("parking without an active thread");
        };
        let thread = self.thr_mut(slot);
        thread.state = ThreadState::Wait;
        thread.channel = channel;
        thread.errno = KernelError::Retry.code();
        slot
    }

    /// Releases a waiting (or passive-joiner) thread into the ready list.
    /// `grant` hands it the resource it was blocked on, recorded against
    /// the wait channel so only the matching retry consumes it.
    pub(crate) fn make_ready(&mut self, slot: ThreadRef, grant: bool) {
        let prio = {
            let thread = self.thr_mut(slot);
            thread.state = ThreadState::Ready;
            if grant {
                thread.grant = Some(thread.channel);
            }
            thread.channel = WaitChannel::None;
            thread.prio
        };
        self.ready.enqueue(prio, slot);
    }

    /// Records a recoverable error in the caller's errno slot.
    pub(crate) fn fail(&mut self, err: KernelError) -> KernelError {
        if let Some(slot) = self.active {
            self.thr_mut(slot).errno = err.code();
        }
        err
    }

    /// Takes the payload delivered into the calling thread's private
    /// storage (signal delivery).
    pub fn take_private(&mut self) -> Option<Vec<u8>> {
        let slot = self.active?;
        self.thr_mut(slot).private.take()
    }

    /// Removes a WAIT thread from the queue its channel names.
    fn unqueue_waiter(&mut self, slot: ThreadRef) {
        let channel = self.thr(slot).channel;
        let removed = match channel {
            WaitChannel::Semaphore(id) => self
                .sems
                .get_mut(&id)
                .map(|sem| sem.waiters.remove(slot)),
            WaitChannel::Device(dev) => self
                .devices
                .get_mut(dev)
                .map(|device| device.waiters.remove(slot)),
            WaitChannel::Queue(id) => self
                .queues
                .get_mut(&id)
                .map(|queue| queue.receivers.remove(slot)),
            WaitChannel::Inbox(owner) => Some(self.thr_mut(owner).inbox_waiters.remove(slot)),
            WaitChannel::Join(target) => Some(self.thr_mut(target).joiners.remove(slot)),
            WaitChannel::None => None,
        };
        if removed != Some(true) {
            panic!("wait channel {channel:?} does not hold thread {slot:?}");
        }
    }

    /// The single exit path, shared by voluntary exit and cancellation.
    ///
    /// Releases owned resources, wakes every joiner and inbox waiter, and
    /// destroys the descriptor once no references remain.
    pub(crate) fn exit_current(&mut self, status: i32) {
        let Some(slot) = self.active.take() else {
            panic!("exit without an active thread");
        };

        let mut woken = Vec::new();
        let gone = {
            let thread = self.thr_mut(slot);
            log::debug!("thread '{}' exits with status {}", thread.name, status);
            thread.state = ThreadState::Passive;
            thread.channel = WaitChannel::None;
            thread.exit_status = Some(status);
            if thread.stack.is_some_and(|stack| stack.owned) {
                thread.stack = None;
            }
            thread.private = None;
            thread.inbox.clear();
            thread.sig_handlers.clear();
            while let Some(joiner) = thread.joiners.remove_first() {
                woken.push(joiner);
            }
            while let Some(receiver) = thread.inbox_waiters.remove_first() {
                woken.push(receiver);
            }
            thread.refcount -= 1; // the self reference
            thread.refcount == 0
        };

        for thread in woken {
            self.make_ready(thread, false);
        }
        self.live_threads -= 1;
        if gone {
            self.destroy(slot);
        }
    }

    fn destroy(&mut self, slot: ThreadRef) {
        let Some(thread) = self.threads.get_mut(slot.index()).and_then(Option::take) else {
            panic!("destroying an empty thread slot {slot:?}");
        };
        log::debug!("destroyed thread '{}' id={:?}", thread.name, thread.id);
        self.ids.free(thread.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_kernel() -> Kernel {
        let config = KernelConfig::builder()
            .priority_levels(8)
            .max_threads(8)
            .id_capacity(64)
            .build()
            .unwrap();
        Kernel::new(config)
    }

    #[test]
    fn priority_is_clamped_on_creation() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("greedy", 99),
                Box::new(|_| ThreadStep::Exit(0)),
            )
            .unwrap();
        let slot = kernel.resolve(handle).unwrap();
        assert_eq!(kernel.thr(slot).prio, 7);
    }

    #[test]
    fn idle_kernel_is_quiescent() {
        let mut kernel = small_kernel();
        assert_eq!(kernel.run_until_idle(10), 0);
        assert_eq!(kernel.live_thread_count(), 1);
    }

    #[test]
    fn exit_status_collected_exactly_once() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("answer", 3),
                Box::new(|_| ThreadStep::Exit(42)),
            )
            .unwrap();
        kernel.run_until_idle(10);

        assert_eq!(
            kernel.wait_for_thread(handle, true),
            Ok(JoinOutcome::Exited(42))
        );
        assert_eq!(
            kernel.wait_for_thread(handle, true),
            Ok(JoinOutcome::AlreadyGone)
        );
    }

    #[test]
    fn nonblocking_join_of_running_thread() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("loiterer", 3),
                Box::new(|_| ThreadStep::Yield),
            )
            .unwrap();
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Err(KernelError::NotFinished)
        );
        assert_eq!(kernel.thread_state(handle), Some(ThreadState::Ready));
    }

    #[test]
    fn cancel_ready_thread_is_full_cleanup() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("victim", 3),
                Box::new(|_| ThreadStep::Yield),
            )
            .unwrap();
        kernel.cancel_thread(handle).unwrap();
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Ok(JoinOutcome::Exited(-1))
        );
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Ok(JoinOutcome::AlreadyGone)
        );
    }

    #[test]
    fn detached_thread_is_reclaimed_on_exit() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("fire-and-forget", 3).detached(),
                Box::new(|_| ThreadStep::Exit(0)),
            )
            .unwrap();
        kernel.run_until_idle(10);

        // The descriptor was destroyed at exit; there is no status left
        // to collect and the slot is free for reuse.
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Ok(JoinOutcome::AlreadyGone)
        );
        assert_eq!(kernel.live_thread_count(), 1);
    }

    #[test]
    fn cancel_of_stale_handle_is_noop() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("gone", 3),
                Box::new(|_| ThreadStep::Exit(0)),
            )
            .unwrap();
        kernel.run_until_idle(10);
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Ok(JoinOutcome::Exited(0))
        );
        assert_eq!(kernel.cancel_thread(handle), Ok(()));
    }

    #[test]
    fn cancelling_idle_is_rejected() {
        let mut kernel = small_kernel();
        let idle = kernel.idle;
        let id = kernel.thr(idle).id;
        let handle = ThreadHandle { slot: idle, id };
        assert_eq!(
            kernel.cancel_thread(handle),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn deferred_thread_runs_after_start() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("late", 3).deferred(),
                Box::new(|_| ThreadStep::Exit(7)),
            )
            .unwrap();
        assert_eq!(kernel.run_until_idle(10), 0, "deferred thread must not run");

        kernel.thread_start(handle).unwrap();
        kernel.run_until_idle(10);
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Ok(JoinOutcome::Exited(7))
        );
    }

    #[test]
    fn errno_records_last_failure() {
        let mut kernel = small_kernel();
        let handle = kernel
            .create_thread(
                ThreadConfig::new("prober", 2),
                Box::new(move |k| {
                    let me = k.thread_self().unwrap();
                    // Joining self is rejected and must land in errno.
                    assert_eq!(
                        k.wait_for_thread(me, true),
                        Err(KernelError::InvalidArgument)
                    );
                    ThreadStep::Exit(0)
                }),
            )
            .unwrap();
        kernel.dispatch_once();
        // The thread exited; its errno was visible while it ran.
        assert_eq!(
            kernel.wait_for_thread(handle, false),
            Ok(JoinOutcome::Exited(0))
        );
    }
}
