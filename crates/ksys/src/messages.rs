//! Message queues, per-thread inboxes and signal delivery.
//!
//! A queue accepts a message only when its type clears the queue's
//! minimum-type threshold; filtered messages are reported `Ignored` and
//! never enqueued. Receivers filter by type: wanted type 0 is the
//! wildcard, otherwise the first matching message is taken and the
//! non-matching ones stay queued in order.

use std::collections::VecDeque;

use kcore::sync::Arc;
use kcore::{Id, KernelError, KernelResult, ThreadQueue};

use crate::thread::{ThreadConfig, ThreadHandle, ThreadStep, WaitChannel};
use crate::Kernel;

/// Typed message with an owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub mtype: u32,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(mtype: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            mtype,
            data: data.into(),
        }
    }
}

/// Signal handler, run in a freshly spawned thread with a private copy of
/// the signal payload.
pub type SignalHandler = Arc<dyn Fn(&mut Kernel, &[u8]) + Send + Sync>;

/// Where a message is posted.
#[derive(Debug, Clone, Copy)]
pub enum MsgDestination {
    /// A global queue created with [`Kernel::create_msg_queue`].
    Queue(Id),
    /// Another thread's inbox.
    Inbox(ThreadHandle),
    /// A signal to another thread; delivered by spawning its registered
    /// handler, subject to the thread's signal threshold.
    Signal(ThreadHandle),
}

/// Where a receive looks for messages.
#[derive(Debug, Clone, Copy)]
pub enum MsgSource {
    Queue(Id),
    /// The calling thread's own inbox.
    Own,
}

pub(crate) struct MsgQueue {
    pub(crate) min_type: u32,
    pub(crate) messages: VecDeque<Message>,
    pub(crate) receivers: ThreadQueue,
}

/// Index of the first queued message a receiver with this wanted type
/// takes; wildcard 0 matches the head.
fn match_index(messages: &VecDeque<Message>, wanted: u32) -> Option<usize> {
    if wanted == 0 {
        if messages.is_empty() {
            None
        } else {
            Some(0)
        }
    } else {
        messages.iter().position(|msg| msg.mtype == wanted)
    }
}

impl Kernel {
    pub fn create_msg_queue(&mut self, min_type: u32) -> KernelResult<Id> {
        let id = self.ids.allocate();
        self.queues.insert(
            id,
            MsgQueue {
                min_type,
                messages: VecDeque::new(),
                receivers: ThreadQueue::new(),
            },
        );
        log::debug!("message queue {:?} created, threshold {}", id, min_type);
        Ok(id)
    }

    /// Drops the queue and its messages; blocked receivers are released
    /// and observe the stale handle on retry.
    pub fn delete_msg_queue(&mut self, queue: Id) -> KernelResult<()> {
        let Some(mut q) = self.queues.remove(&queue) else {
            return Err(self.fail(KernelError::DontExist));
        };
        while let Some(receiver) = q.receivers.remove_first() {
            self.make_ready(receiver, false);
        }
        self.ids.free(queue);
        Ok(())
    }

    /// Posts a message.
    ///
    /// `Ignored` reports a message filtered by the destination's threshold
    /// (or, for signals, a missing handler); nothing was enqueued. An
    /// accepted message releases exactly one blocked receiver.
    pub fn msg_post(&mut self, dest: MsgDestination, msg: Message) -> KernelResult<()> {
        match dest {
            MsgDestination::Queue(id) => {
                let Some(min_type) = self.queues.get(&id).map(|q| q.min_type) else {
                    return Err(self.fail(KernelError::DontExist));
                };
                if msg.mtype < min_type {
                    return Err(self.fail(KernelError::Ignored));
                }
                let woken = match self.queues.get_mut(&id) {
                    Some(q) => {
                        q.messages.push_back(msg);
                        q.receivers.remove_first()
                    }
                    None => None,
                };
                if let Some(receiver) = woken {
                    self.make_ready(receiver, false);
                }
                Ok(())
            }
            MsgDestination::Inbox(handle) => {
                let Some(slot) = self.resolve(handle) else {
                    return Err(self.fail(KernelError::DontExist));
                };
                let woken = {
                    let target = self.thr_mut(slot);
                    if msg.mtype < target.min_msg_type {
                        None
                    } else {
                        target.inbox.push_back(msg);
                        Some(target.inbox_waiters.remove_first())
                    }
                };
                match woken {
                    None => Err(self.fail(KernelError::Ignored)),
                    Some(receiver) => {
                        if let Some(receiver) = receiver {
                            self.make_ready(receiver, false);
                        }
                        Ok(())
                    }
                }
            }
            MsgDestination::Signal(handle) => self.deliver_signal(handle, msg),
        }
    }

    /// Receives a message, filtering by type.
    ///
    /// A matching message larger than `max_size` fails `TooBig` without
    /// being consumed. With `block`, an empty result parks the caller on
    /// the queue's receiver list and reports `Retry`.
    pub fn msg_recv(
        &mut self,
        src: MsgSource,
        wanted: u32,
        max_size: usize,
        block: bool,
    ) -> KernelResult<Message> {
        let (found, channel) = match src {
            MsgSource::Queue(id) => {
                let Some(q) = self.queues.get_mut(&id) else {
                    return Err(self.fail(KernelError::DontExist));
                };
                (Self::take_match(&mut q.messages, wanted, max_size), WaitChannel::Queue(id))
            }
            MsgSource::Own => {
                let Some(active) = self.active else {
                    return Err(self.fail(KernelError::InvalidArgument));
                };
                let inbox = &mut self.thr_mut(active).inbox;
                (
                    Self::take_match(inbox, wanted, max_size),
                    WaitChannel::Inbox(active),
                )
            }
        };

        match found {
            Ok(Some(msg)) => Ok(msg),
            Err(err) => Err(self.fail(err)),
            Ok(None) => {
                if !block || self.active.is_none() {
                    return Err(self.fail(KernelError::Empty));
                }
                let waiter = self.park_active(channel);
                match channel {
                    WaitChannel::Queue(id) => {
                        if let Some(q) = self.queues.get_mut(&id) {
                            q.receivers.append(waiter);
                        }
                    }
                    WaitChannel::Inbox(owner) => {
                        self.thr_mut(owner).inbox_waiters.append(waiter);
                    }
                    _ => {}
                }
                Err(KernelError::Retry)
            }
        }
    }

    /// Sets the calling thread's message and signal acceptance thresholds.
    /// Registered signal handlers are reset.
    pub fn thread_msg_set(&mut self, min_msg_type: u32, min_sig_type: u32) -> KernelResult<()> {
        let Some(active) = self.active else {
            return Err(KernelError::InvalidArgument);
        };
        let thread = self.thr_mut(active);
        thread.min_msg_type = min_msg_type;
        thread.min_sig_type = min_sig_type;
        thread.sig_handlers.clear();
        Ok(())
    }

    /// Registers (or replaces) the calling thread's handler for one signal
    /// type, returning the previous handler.
    pub fn set_signal_handler(
        &mut self,
        sig: u32,
        handler: SignalHandler,
    ) -> KernelResult<Option<SignalHandler>> {
        if sig == 0 {
            return Err(self.fail(KernelError::InvalidType));
        }
        let Some(active) = self.active else {
            return Err(KernelError::InvalidArgument);
        };
        Ok(self.thr_mut(active).sig_handlers.insert(sig, handler))
    }

    pub fn clear_signal_handler(&mut self, sig: u32) -> KernelResult<Option<SignalHandler>> {
        let Some(active) = self.active else {
            return Err(KernelError::InvalidArgument);
        };
        Ok(self.thr_mut(active).sig_handlers.remove(&sig))
    }

    /// Queue length (diagnostics and tests).
    pub fn msg_queue_len(&self, queue: Id) -> KernelResult<usize> {
        match self.queues.get(&queue) {
            Some(q) => Ok(q.messages.len()),
            None => Err(KernelError::DontExist),
        }
    }

    fn take_match(
        messages: &mut VecDeque<Message>,
        wanted: u32,
        max_size: usize,
    ) -> Result<Option<Message>, KernelError> {
        match match_index(messages, wanted) {
            None => Ok(None),
            Some(index) => {
                if messages[index].data.len() > max_size {
                    return Err(KernelError::TooBig);
                }
                Ok(messages.remove(index))
            }
        }
    }

    /// Delivers a signal by spawning the target's registered handler.
    ///
    /// Requires both that the signal type clears the target's threshold
    /// and that a handler is registered for it; otherwise the signal is
    /// `Ignored`, which is an outcome rather than an error. The handler
    /// thread runs one priority level better than the target, so delivery
    /// preempts it at the next scheduling point.
    fn deliver_signal(&mut self, handle: ThreadHandle, msg: Message) -> KernelResult<()> {
        let Some(slot) = self.resolve(handle) else {
            return Err(self.fail(KernelError::DontExist));
        };
        let accepted = {
            let target = self.thr(slot);
            if msg.mtype < target.min_sig_type {
                None
            } else {
                target.sig_handlers.get(&msg.mtype).map(|handler| {
                    (
                        Arc::clone(handler),
                        target.prio.saturating_sub(1),
                        format!("{}.sig{}", target.name, msg.mtype),
                    )
                })
            }
        };
        let Some((handler, prio, name)) = accepted else {
            return Err(self.fail(KernelError::Ignored));
        };

        // Detached: nobody joins a signal handler, so no handle reference
        // is charged and the descriptor is reclaimed when the handler
        // exits.
        let spawned = self.create_thread(
            ThreadConfig::new(name, prio).detached(),
            Box::new(move |k| {
                let payload = k.take_private().unwrap_or_default();
                handler(k, &payload);
                ThreadStep::Exit(0)
            }),
        )?;
        self.thr_mut(spawned.slot).private = Some(msg.data);
        Ok(())
    }
}
