//! # kirq - Interrupt Priority Dispatcher
//!
//! Nested interrupt delivery with a static per-source priority table.
//! A handler of priority P can only be preempted by sources strictly more
//! urgent than P, and the dispatcher restores P exactly when the nested
//! handler returns, so interrupt sources never invert priorities.
//!
//! Lower level index = more urgent, matching the thread convention in the
//! rest of the workspace.

pub mod dispatch;

pub use dispatch::{IrqDispatcher, IrqHandler, PriorityStack};
