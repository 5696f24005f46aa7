//! Character devices: registry, exclusive open, and per-device locking.
//!
//! Drivers implement [`CharDevice`] and are registered at init time. Open
//! tracking enforces the exclusive-use flag; `lock`/`unlock` is a separate
//! mutual-exclusion policy built on the same thread-queue primitives as
//! every other blocking operation, so it inherits identical ordering.

use std::collections::VecDeque;

use kcore::{KernelError, KernelResult, ThreadQueue};

use crate::thread::WaitChannel;
use crate::Kernel;

/// Byte-stream capability implemented by device drivers.
pub trait CharDevice: Send {
    /// Writes bytes, returning how many the device consumed.
    fn send(&mut self, data: &[u8]) -> usize;
    /// Reads bytes into the buffer, returning how many were produced.
    fn recv(&mut self, buf: &mut [u8]) -> usize;
}

/// Consumes writes, produces nothing.
#[derive(Debug, Default)]
pub struct NullDevice;

impl CharDevice for NullDevice {
    fn send(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn recv(&mut self, _buf: &mut [u8]) -> usize {
        0
    }
}

/// Echoes written bytes back to readers, FIFO. Used in tests and as the
/// hosted stand-in for a UART.
#[derive(Debug, Default)]
pub struct LoopDevice {
    buf: VecDeque<u8>,
}

impl LoopDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CharDevice for LoopDevice {
    fn send(&mut self, data: &[u8]) -> usize {
        self.buf.extend(data.iter().copied());
        data.len()
    }

    fn recv(&mut self, buf: &mut [u8]) -> usize {
        let mut produced = 0;
        while produced < buf.len() {
            match self.buf.pop_front() {
                Some(byte) => {
                    buf[produced] = byte;
                    produced += 1;
                }
                None => break,
            }
        }
        produced
    }
}

pub(crate) struct DeviceSlot {
    pub(crate) name: String,
    pub(crate) driver: Box<dyn CharDevice>,
    /// Shared devices allow concurrent opens; others are exclusive-use.
    pub(crate) shared: bool,
    pub(crate) open_count: u32,
    pub(crate) locked: bool,
    pub(crate) waiters: ThreadQueue,
}

impl Kernel {
    /// Adds a driver to the registry. Returns the device index used by
    /// every other device operation.
    pub fn register_device(
        &mut self,
        name: impl Into<String>,
        driver: Box<dyn CharDevice>,
        shared: bool,
    ) -> usize {
        let name = name.into();
        log::debug!("device '{}' registered (shared={})", name, shared);
        self.devices.push(DeviceSlot {
            name,
            driver,
            shared,
            open_count: 0,
            locked: false,
            waiters: ThreadQueue::new(),
        });
        self.devices.len() - 1
    }

    /// Opens a device by name. Opening a busy exclusive-use device fails
    /// with [`KernelError::WouldBlock`].
    pub fn device_open(&mut self, name: &str) -> KernelResult<usize> {
        let Some(index) = self.devices.iter().position(|dev| dev.name == name) else {
            return Err(self.fail(KernelError::DontExist));
        };
        if !self.devices[index].shared && self.devices[index].open_count > 0 {
            return Err(self.fail(KernelError::WouldBlock));
        }
        self.devices[index].open_count += 1;
        Ok(index)
    }

    pub fn device_close(&mut self, dev: usize) -> KernelResult<()> {
        self.check_device_open(dev)?;
        self.devices[dev].open_count -= 1;
        Ok(())
    }

    pub fn device_send(&mut self, dev: usize, data: &[u8]) -> KernelResult<usize> {
        self.check_device_open(dev)?;
        Ok(self.devices[dev].driver.send(data))
    }

    pub fn device_recv(&mut self, dev: usize, buf: &mut [u8]) -> KernelResult<usize> {
        self.check_device_open(dev)?;
        Ok(self.devices[dev].driver.recv(buf))
    }

    /// Acquires the device's mutual-exclusion lock.
    ///
    /// Unlocked: locks and returns. Locked and `wait` false: fails with
    /// [`KernelError::WouldBlock`]. Locked and `wait` true: parks the
    /// caller; on release the lock was handed over through the wake grant.
    pub fn device_lock(&mut self, dev: usize, wait: bool) -> KernelResult<()> {
        if dev >= self.devices.len() {
            return Err(self.fail(KernelError::InvalidHandle));
        }
        if let Some(active) = self.active {
            if self.thr(active).grant == Some(WaitChannel::Device(dev)) {
                self.thr_mut(active).grant = None;
                return Ok(());
            }
        }
        if !self.devices[dev].locked {
            self.devices[dev].locked = true;
            return Ok(());
        }
        if !wait || self.active.is_none() {
            return Err(self.fail(KernelError::WouldBlock));
        }
        let waiter = self.park_active(WaitChannel::Device(dev));
        self.devices[dev].waiters.append(waiter);
        Err(KernelError::Retry)
    }

    /// Releases the lock: the first waiter (if any) receives it directly,
    /// so the device is never observably unlocked during the handoff.
    pub fn device_unlock(&mut self, dev: usize) -> KernelResult<()> {
        if dev >= self.devices.len() {
            return Err(self.fail(KernelError::InvalidHandle));
        }
        if !self.devices[dev].locked {
            return Err(self.fail(KernelError::InvalidArgument));
        }
        let woken = {
            let device = &mut self.devices[dev];
            match device.waiters.remove_first() {
                Some(waiter) => Some(waiter),
                None => {
                    device.locked = false;
                    None
                }
            }
        };
        if let Some(waiter) = woken {
            self.make_ready(waiter, true);
        }
        Ok(())
    }

    /// Lock state (diagnostics and tests).
    pub fn device_locked(&self, dev: usize) -> KernelResult<bool> {
        match self.devices.get(dev) {
            Some(device) => Ok(device.locked),
            None => Err(KernelError::InvalidHandle),
        }
    }

    fn check_device_open(&mut self, dev: usize) -> KernelResult<()> {
        if dev >= self.devices.len() {
            return Err(self.fail(KernelError::InvalidHandle));
        }
        if self.devices[dev].open_count == 0 {
            return Err(self.fail(KernelError::InvalidArgument));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn kernel() -> Kernel {
        let config = KernelConfig::builder()
            .priority_levels(8)
            .max_threads(8)
            .id_capacity(64)
            .build()
            .unwrap();
        Kernel::new(config)
    }

    #[test]
    fn loop_device_round_trip() {
        let mut k = kernel();
        let dev = k.register_device("uart0", Box::new(LoopDevice::new()), true);
        let opened = k.device_open("uart0").unwrap();
        assert_eq!(opened, dev);

        assert_eq!(k.device_send(dev, b"ping"), Ok(4));
        let mut buf = [0u8; 8];
        assert_eq!(k.device_recv(dev, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"ping");
    }

    #[test]
    fn exclusive_device_rejects_second_open() {
        let mut k = kernel();
        k.register_device("disk0", Box::new(NullDevice), false);
        let dev = k.device_open("disk0").unwrap();
        assert_eq!(k.device_open("disk0"), Err(KernelError::WouldBlock));
        k.device_close(dev).unwrap();
        assert!(k.device_open("disk0").is_ok());
    }

    #[test]
    fn io_requires_open() {
        let mut k = kernel();
        let dev = k.register_device("sink", Box::new(NullDevice), true);
        assert_eq!(k.device_send(dev, b"x"), Err(KernelError::InvalidArgument));
        k.device_open("sink").unwrap();
        assert_eq!(k.device_send(dev, b"x"), Ok(1));
    }

    #[test]
    fn nonblocking_lock_fails_when_held() {
        let mut k = kernel();
        let dev = k.register_device("bus", Box::new(NullDevice), true);
        k.device_lock(dev, false).unwrap();
        assert_eq!(k.device_lock(dev, false), Err(KernelError::WouldBlock));
        k.device_unlock(dev).unwrap();
        assert_eq!(k.device_locked(dev), Ok(false));
        k.device_lock(dev, false).unwrap();
    }

    #[test]
    fn unlock_of_unlocked_device_is_an_error() {
        let mut k = kernel();
        let dev = k.register_device("bus", Box::new(NullDevice), true);
        assert_eq!(k.device_unlock(dev), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn unknown_device_name() {
        let mut k = kernel();
        assert_eq!(k.device_open("nope"), Err(KernelError::DontExist));
    }
}
