// Shared IPC device abstraction
//
// `Device` is the kernel character device every IPC module is multiplexed
// over. A production build backs it with the real driver node; tests and
// single-process deployments use `LoopbackDevice`, which dispatches ioctl
// commands to in-process handlers.
//
// Correctness and safety notes:
// - `ioctl` must be callable concurrently; only open/close are serialized
//   by the multiplexer
// - Descriptors handed out must fit in 16 bits so they can be packed into a
//   `DriverHandle`
// - Like a kernel, the loopback device reuses the lowest free descriptor

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::error::{RawTransportError, TransportResult, EBADF};

/// Kernel file descriptor
pub type Fd = i32;

/// First descriptor handed out after stdin/stdout/stderr
const FIRST_FD: Fd = 3;

/// fcntl commands understood by the loopback device
pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;

pub trait Device: Send + Sync {
    fn open(&self, path: &str) -> TransportResult<Fd>;
    fn close(&self, fd: Fd) -> TransportResult<()>;
    /// Issue `cmd` with an in/out argument block. `Ok` carries the ioctl
    /// return value; `Err` means the OS call itself failed.
    fn ioctl(&self, fd: Fd, cmd: u32, args: &mut [u8]) -> TransportResult<i32>;
    fn read(&self, fd: Fd, buf: &mut [u8]) -> TransportResult<usize>;
    fn fcntl(&self, fd: Fd, cmd: i32, arg: i64) -> TransportResult<i64>;
}

pub type IoctlHandler = Arc<dyn Fn(&mut [u8]) -> TransportResult<i32> + Send + Sync>;

/// In-process device with per-command handlers
pub struct LoopbackDevice {
    open_fds: Mutex<BTreeSet<Fd>>,
    flags: Mutex<BTreeMap<Fd, i64>>,
    handlers: Mutex<BTreeMap<u32, IoctlHandler>>,
    read_queue: Mutex<VecDeque<u8>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self {
            open_fds: Mutex::new(BTreeSet::new()),
            flags: Mutex::new(BTreeMap::new()),
            handlers: Mutex::new(BTreeMap::new()),
            read_queue: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Install the handler run for `cmd`, replacing any previous one
    pub fn on_ioctl<F>(&self, cmd: u32, handler: F)
    where
        F: Fn(&mut [u8]) -> TransportResult<i32> + Send + Sync + 'static,
    {
        self.handlers.lock().insert(cmd, Arc::new(handler));
    }

    /// Queue bytes returned by subsequent `read` calls
    pub fn push_read(&self, bytes: &[u8]) {
        self.read_queue.lock().extend(bytes.iter().copied());
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    fn check_fd(&self, fd: Fd) -> TransportResult<()> {
        if self.open_fds.lock().contains(&fd) {
            Ok(())
        } else {
            Err(RawTransportError::from_errno(EBADF))
        }
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for LoopbackDevice {
    fn open(&self, _path: &str) -> TransportResult<Fd> {
        let mut open_fds = self.open_fds.lock();
        let fd = (FIRST_FD..=u16::MAX as Fd)
            .find(|fd| !open_fds.contains(fd))
            .ok_or(RawTransportError::Busy)?;
        open_fds.insert(fd);
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(fd)
    }

    fn close(&self, fd: Fd) -> TransportResult<()> {
        if !self.open_fds.lock().remove(&fd) {
            return Err(RawTransportError::from_errno(EBADF));
        }
        self.flags.lock().remove(&fd);
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn ioctl(&self, fd: Fd, cmd: u32, args: &mut [u8]) -> TransportResult<i32> {
        self.check_fd(fd)?;
        // Clone out so the handler runs without the table lock held.
        let handler = self.handlers.lock().get(&cmd).cloned();
        match handler {
            Some(handler) => handler(args),
            None => Err(RawTransportError::Inval),
        }
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> TransportResult<usize> {
        self.check_fd(fd)?;
        let mut queue = self.read_queue.lock();
        let count = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn fcntl(&self, fd: Fd, cmd: i32, arg: i64) -> TransportResult<i64> {
        self.check_fd(fd)?;
        let mut flags = self.flags.lock();
        match cmd {
            F_GETFL => Ok(flags.get(&fd).copied().unwrap_or(0)),
            F_SETFL => {
                flags.insert(fd, arg);
                Ok(0)
            }
            _ => Err(RawTransportError::Inval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_dispatches_to_handler() {
        let dev = LoopbackDevice::new();
        dev.on_ioctl(7, |args| {
            args[0] = 0xAA;
            Ok(5)
        });
        let fd = dev.open("/dev/syslink_ipc").unwrap();
        let mut args = [0u8; 4];
        assert_eq!(dev.ioctl(fd, 7, &mut args), Ok(5));
        assert_eq!(args[0], 0xAA);
        assert_eq!(dev.ioctl(fd, 8, &mut args), Err(RawTransportError::Inval));
    }

    #[test]
    fn test_closed_fd_is_rejected() {
        let dev = LoopbackDevice::new();
        let fd = dev.open("/dev/syslink_ipc").unwrap();
        dev.close(fd).unwrap();
        assert!(dev.ioctl(fd, 1, &mut [0u8; 4]).is_err());
        assert!(dev.close(fd).is_err());
        assert_eq!(dev.open_count(), 1);
        assert_eq!(dev.close_count(), 1);
    }

    #[test]
    fn test_lowest_free_fd_is_reused() {
        let dev = LoopbackDevice::new();
        let first = dev.open("/dev/syslink_ipc").unwrap();
        let second = dev.open("/dev/syslink_ipc").unwrap();
        assert_eq!((first, second), (3, 4));
        dev.close(first).unwrap();
        assert_eq!(dev.open("/dev/syslink_ipc"), Ok(first));
    }

    #[test]
    fn test_read_drains_queue() {
        let dev = LoopbackDevice::new();
        let fd = dev.open("/dev/syslink_ipc").unwrap();
        dev.push_read(&[1, 2, 3]);
        let mut buf = [0u8; 2];
        assert_eq!(dev.read(fd, &mut buf), Ok(2));
        assert_eq!(buf, [1, 2]);
        assert_eq!(dev.read(fd, &mut buf), Ok(1));
        assert_eq!(dev.read(fd, &mut buf), Ok(0));
    }

    #[test]
    fn test_fcntl_flags_round_trip() {
        let dev = LoopbackDevice::new();
        let fd = dev.open("/dev/syslink_ipc").unwrap();
        assert_eq!(dev.fcntl(fd, F_GETFL, 0), Ok(0));
        dev.fcntl(fd, F_SETFL, 0o4000).unwrap();
        assert_eq!(dev.fcntl(fd, F_GETFL, 0), Ok(0o4000));
    }
}
