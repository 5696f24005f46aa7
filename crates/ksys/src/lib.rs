//! # ksys - Kernel Core
//!
//! Preemptive-multitasking kernel core: a priority-scheduled thread
//! manager, the blocking primitives built on it (semaphores, device
//! locks, message and signal queues), and kernel time with alarms. The
//! interrupt side lives in the `kirq` crate; shared primitives in `kcore`.
//!
//! All state belongs to a [`Kernel`] context object. Exactly one thread
//! is active at a time; blocking operations park the caller on a wait
//! queue and report [`kcore::KernelError::Retry`], and the released
//! thread re-issues the call (see [`ThreadStep`]).
//!
//! ## Module Overview
//! - [`config`]   – Kernel sizing and the config builder.
//! - [`kernel`]   – The context object, scheduler and thread lifecycle.
//! - [`thread`]   – Descriptors, handles, creation parameters.
//! - [`port`]     – Architecture seam: context build and switch.
//! - [`sem`]      – Counting semaphores.
//! - [`devices`]  – Character-device registry, exclusivity and locking.
//! - [`messages`] – Message queues, inboxes and signal delivery.
//! - [`time`]     – Tick counter and expiry-ordered alarms.
//! - [`irq`]      – Adapters registering kernel operations as interrupt
//!   handlers.

pub mod config;
pub mod devices;
pub mod irq;
pub mod kernel;
pub mod messages;
pub mod port;
pub mod sem;
pub mod thread;
pub mod time;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use devices::{CharDevice, LoopDevice, NullDevice};
pub use irq::{SharedKernel, clock_handler, kernel_handler};
pub use kernel::{JoinOutcome, Kernel};
pub use messages::{Message, MsgDestination, MsgSource, SignalHandler};
pub use port::{CpuPort, ExecContext, SimPort};
pub use thread::{ThreadBody, ThreadConfig, ThreadHandle, ThreadState, ThreadStep};
pub use time::{AlarmAction, AlarmSpec};

pub use kcore::{Id, KernelError, KernelResult};
