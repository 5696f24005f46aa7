//! Interrupt-to-kernel glue.
//!
//! `kirq` delivers interrupts in priority order but knows nothing about
//! threads; the adapters here turn kernel operations into registrable
//! handlers. The kernel is shared behind a mutex because handlers fire
//! from interrupt context, outside any `&mut Kernel` the dispatch loop
//! holds. Never raise an interrupt while holding the kernel lock.

use kcore::sync::{Arc, Mutex};
use kirq::IrqHandler;

use crate::Kernel;

/// Kernel handle shared between thread context and interrupt handlers.
pub type SharedKernel = Arc<Mutex<Kernel>>;

pub fn shared(kernel: Kernel) -> SharedKernel {
    Arc::new(Mutex::new(kernel))
}

/// Clock interrupt handler: advances kernel time by one tick, firing due
/// alarms.
pub fn clock_handler(kernel: &SharedKernel) -> IrqHandler {
    let kernel = Arc::clone(kernel);
    Arc::new(move |_, _| kernel.lock().tick())
}

/// Wraps an arbitrary kernel operation as an interrupt handler; the
/// source number is passed through for handlers serving several lines.
pub fn kernel_handler<F>(kernel: &SharedKernel, op: F) -> IrqHandler
where
    F: Fn(&mut Kernel, u32) + Send + Sync + 'static,
{
    let kernel = Arc::clone(kernel);
    Arc::new(move |_, irq| op(&mut kernel.lock(), irq))
}
