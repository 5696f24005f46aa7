//! Counting semaphores.
//!
//! A `post` either wakes exactly one waiter or increments the count, never
//! both: the woken thread is handed the unit through its wake grant and
//! consumes it when it retries the wait, so the count is untouched by the
//! handoff.

use kcore::{Id, KernelError, KernelResult, ThreadQueue};

use crate::thread::WaitChannel;
use crate::Kernel;

pub(crate) struct Semaphore {
    pub(crate) count: u32,
    pub(crate) waiters: ThreadQueue,
}

impl Kernel {
    pub fn sem_init(&mut self, initial: u32) -> KernelResult<Id> {
        let id = self.ids.allocate();
        self.sems.insert(
            id,
            Semaphore {
                count: initial,
                waiters: ThreadQueue::new(),
            },
        );
        log::debug!("semaphore {:?} created with count {}", id, initial);
        Ok(id)
    }

    /// Takes one unit, or parks the caller until a `post` hands one over.
    ///
    /// A parked caller observes [`KernelError::Retry`]; when it re-issues
    /// the wait after release, the wake grant satisfies it immediately.
    pub fn sem_wait(&mut self, sem: Id) -> KernelResult<()> {
        if !self.sems.contains_key(&sem) {
            return Err(self.fail(KernelError::InvalidHandle));
        }
        if let Some(active) = self.active {
            if self.thr(active).grant == Some(WaitChannel::Semaphore(sem)) {
                self.thr_mut(active).grant = None;
                return Ok(());
            }
        }

        let count = match self.sems.get_mut(&sem) {
            Some(s) if s.count > 0 => {
                s.count -= 1;
                return Ok(());
            }
            Some(s) => s.count,
            None => return Err(self.fail(KernelError::InvalidHandle)),
        };
        debug_assert_eq!(count, 0);

        if self.active.is_none() {
            return Err(self.fail(KernelError::WouldBlock));
        }
        let waiter = self.park_active(WaitChannel::Semaphore(sem));
        if let Some(s) = self.sems.get_mut(&sem) {
            s.waiters.append(waiter);
        }
        Err(KernelError::Retry)
    }

    /// Releases one unit: wakes the first waiter or increments the count.
    pub fn sem_post(&mut self, sem: Id) -> KernelResult<()> {
        let woken = match self.sems.get_mut(&sem) {
            Some(s) => match s.waiters.remove_first() {
                Some(waiter) => Some(waiter),
                None => {
                    s.count += 1;
                    None
                }
            },
            None => return Err(self.fail(KernelError::InvalidHandle)),
        };
        if let Some(waiter) = woken {
            self.make_ready(waiter, true);
        }
        Ok(())
    }

    /// Destroys the semaphore, releasing every waiter without a grant;
    /// their retried waits observe the stale handle.
    pub fn sem_destroy(&mut self, sem: Id) -> KernelResult<()> {
        let Some(mut s) = self.sems.remove(&sem) else {
            return Err(self.fail(KernelError::InvalidHandle));
        };
        while let Some(waiter) = s.waiters.remove_first() {
            self.make_ready(waiter, false);
        }
        self.ids.free(sem);
        log::debug!("semaphore {:?} destroyed", sem);
        Ok(())
    }

    /// Current count (diagnostics and tests).
    pub fn sem_value(&self, sem: Id) -> KernelResult<u32> {
        match self.sems.get(&sem) {
            Some(s) => Ok(s.count),
            None => Err(KernelError::InvalidHandle),
        }
    }
}
