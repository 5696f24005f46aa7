//! # kcore
//!
//! Leaf primitives shared by the kernel workspace. The kernel proper lives
//! in the `ksys` crate and the interrupt dispatcher in `kirq`; this crate
//! holds the pieces both build on.
//!
//! ## Module Overview
//! - [`errno`]   – Recoverable error taxonomy returned by the syscall surface.
//! - [`ids`]     – Recycling pool of small integer resource ids.
//! - [`queue`]   – FIFO thread queue over arena indices.
//! - [`ready`]   – Multi-level ready list with a non-empty bitmap.
//! - [`console`] – Text-output capability used for diagnostics only.
//! - [`sync`]    – Platform `Mutex`/`Arc` selection.
//!
//! The crate keeps modules loosely coupled so that alternative kernels can
//! reuse the same primitives.

pub mod console;
pub mod errno;
pub mod ids;
pub mod queue;
pub mod ready;
pub mod sync;

pub use console::{BufferConsole, Console, NullConsole, SharedConsole, StdoutConsole};
pub use errno::{KernelError, KernelResult};
pub use ids::{Id, IdPool};
pub use queue::{ThreadQueue, ThreadRef};
pub use ready::ReadyList;
