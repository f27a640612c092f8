// Driver Multiplexer
//
// Funnels every module-level setup/ioctl call through one shared kernel
// device. Each module gets a tagged handle; ioctl results are rewritten into
// the caller's own status vocabulary.
//
// Key responsibilities:
// - Resolve `/dev/syslinkipc/<Module>` names to module ids
// - Open the shared device on first use and close it on the last close
// - Pack `(module_id << 16) | fd` into a `DriverHandle`, tagged with the
//   open generation of the shared descriptor
// - Forward ioctl calls, retrying on EINTR, and remap `apiStatus`
// - Count ioctl calls per module for diagnostics
//
// Correctness and safety notes:
// - The shared descriptor and its usage count are guarded by one spinlock
//   held across open/close only; ioctl calls run unlocked
// - A handle is accepted only while its descriptor is the live shared one
//   and was issued by the same open; a reopen that gets the same fd number
//   back still invalidates older handles

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::args;
use crate::device::{Device, Fd};
use crate::error::{RawTransportError, TransportResult};
use crate::{log_debug, log_error, log_info};

const LOG_ORIGIN: &str = "ipcmgr";

/// Path of the shared kernel device
pub const DEVICE_NAME: &str = "/dev/syslink_ipc";

/// Prefix of every module driver name
pub const DRIVER_PREFIX: &str = "/dev/syslinkipc/";

pub const MODULE_COUNT: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum ModuleId {
    SharedRegion = 0,
    HeapMemMP = 1,
    GateMP = 2,
    HeapBufMP = 3,
    NameServer = 4,
    MessageQ = 5,
    ListMP = 6,
    MultiProc = 7,
    Ipc = 8,
    SysMemMgr = 9,
    Notify = 10,
}

const MODULE_TABLE: [(ModuleId, &str); MODULE_COUNT] = [
    (ModuleId::SharedRegion, "/dev/syslinkipc/SharedRegion"),
    (ModuleId::HeapMemMP, "/dev/syslinkipc/HeapMemMP"),
    (ModuleId::GateMP, "/dev/syslinkipc/GateMP"),
    (ModuleId::HeapBufMP, "/dev/syslinkipc/HeapBufMP"),
    (ModuleId::NameServer, "/dev/syslinkipc/NameServer"),
    (ModuleId::MessageQ, "/dev/syslinkipc/MessageQ"),
    (ModuleId::ListMP, "/dev/syslinkipc/ListMP"),
    (ModuleId::MultiProc, "/dev/syslinkipc/MultiProc"),
    (ModuleId::Ipc, "/dev/syslinkipc/Ipc"),
    (ModuleId::SysMemMgr, "/dev/syslinkipc/SysMemMgr"),
    (ModuleId::Notify, "/dev/syslinkipc/Notify"),
];

impl ModuleId {
    pub fn from_raw(raw: u16) -> Option<Self> {
        MODULE_TABLE
            .iter()
            .map(|(id, _)| *id)
            .find(|id| *id as u16 == raw)
    }

    pub fn raw(&self) -> u16 {
        *self as u16
    }

    /// Look up a module by its driver name
    pub fn from_driver_name(name: &str) -> Option<Self> {
        MODULE_TABLE
            .iter()
            .find(|(_, driver)| *driver == name)
            .map(|(id, _)| *id)
    }

    pub fn driver_name(&self) -> &'static str {
        MODULE_TABLE[*self as usize].1
    }

    pub fn name(&self) -> &'static str {
        &self.driver_name()[DRIVER_PREFIX.len()..]
    }
}

/// Module id in the high 16 bits, shared descriptor in the low 16 bits,
/// plus the generation of the open that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverHandle {
    raw: u32,
    epoch: u32,
}

impl DriverHandle {
    fn new(module: ModuleId, fd: Fd, epoch: u32) -> Option<Self> {
        let fd = u16::try_from(fd).ok()?;
        Some(DriverHandle {
            raw: ((module.raw() as u32) << 16) | fd as u32,
            epoch,
        })
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn module(&self) -> Option<ModuleId> {
        ModuleId::from_raw((self.raw >> 16) as u16)
    }

    pub fn fd(&self) -> Fd {
        (self.raw & 0xFFFF) as Fd
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.module() {
            Some(module) => write!(f, "Driver({}:{}#{})", module.name(), self.fd(), self.epoch),
            None => write!(f, "Driver(?{:#x})", self.raw),
        }
    }
}

/// A module's status vocabulary as seen across the ioctl boundary.
///
/// The `From<RawTransportError>` impl is the module's own remapping table.
pub trait ModuleStatus: From<RawTransportError> + Copy {
    const MODULE: ModuleId;

    /// The status word reported for this error
    fn code(&self) -> i32;

    /// Error used when the OS call itself fails
    fn os_failure(err: RawTransportError) -> Self;
}

struct SharedFd {
    fd: Option<Fd>,
    /// Bumped on every fresh open of the device
    epoch: u32,
    usage: u32,
}

impl SharedFd {
    fn issued(&self, handle: DriverHandle) -> Option<Fd> {
        self.fd.filter(|fd| *fd == handle.fd() && self.epoch == handle.epoch())
    }
}

pub struct DriverMultiplexer<D: Device> {
    device: D,
    shared: Mutex<SharedFd>,
    ioctl_counts: [AtomicU64; MODULE_COUNT],
}

impl<D: Device> DriverMultiplexer<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            shared: Mutex::new(SharedFd {
                fd: None,
                epoch: 0,
                usage: 0,
            }),
            ioctl_counts: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Open the driver for `module_name`, sharing the process-wide descriptor.
    pub fn open(&self, module_name: &str) -> TransportResult<DriverHandle> {
        let module = ModuleId::from_driver_name(module_name).ok_or(RawTransportError::NoEnt)?;

        let mut shared = self.shared.lock();
        let (fd, epoch) = match shared.fd {
            Some(fd) => (fd, shared.epoch),
            None => {
                let fd = self.device.open(DEVICE_NAME)?;
                log_info!(LOG_ORIGIN, "Opened {} as fd {}", DEVICE_NAME, fd);
                (fd, shared.epoch.wrapping_add(1))
            }
        };

        let handle = match DriverHandle::new(module, fd, epoch) {
            Some(handle) => handle,
            None => {
                if shared.fd.is_none() {
                    let _ = self.device.close(fd);
                }
                log_error!(LOG_ORIGIN, "fd {} does not fit a driver handle", fd);
                return Err(RawTransportError::Inval);
            }
        };

        shared.fd = Some(fd);
        shared.epoch = epoch;
        shared.usage += 1;
        log_debug!(LOG_ORIGIN, "open {} -> {} (usage {})", module_name, handle, shared.usage);
        Ok(handle)
    }

    /// Drop one reference; the descriptor is closed when the last one goes.
    pub fn close(&self, handle: DriverHandle) -> TransportResult<()> {
        let mut shared = self.shared.lock();
        match shared.issued(handle) {
            Some(fd) if handle.module().is_some() && shared.usage > 0 => {
                if shared.usage == 1 {
                    self.device.close(fd)?;
                    shared.fd = None;
                    log_info!(LOG_ORIGIN, "Closed {}", DEVICE_NAME);
                }
                shared.usage -= 1;
                Ok(())
            }
            _ => Err(RawTransportError::Inval),
        }
    }

    fn validate(&self, handle: DriverHandle) -> TransportResult<(ModuleId, Fd)> {
        let module = handle.module().ok_or(RawTransportError::Inval)?;
        let fd = self.shared.lock().issued(handle).ok_or(RawTransportError::Inval)?;
        Ok((module, fd))
    }

    /// Forward an ioctl without touching `apiStatus`.
    pub fn ioctl_raw(&self, handle: DriverHandle, cmd: u32, args: &mut [u8]) -> TransportResult<i32> {
        let (module, fd) = self.validate(handle)?;
        self.ioctl_counts[module as usize].fetch_add(1, Ordering::Relaxed);

        loop {
            match self.device.ioctl(fd, cmd, args) {
                Err(RawTransportError::Intr) => continue,
                result => return result,
            }
        }
    }

    /// Forward an ioctl and rewrite `apiStatus` into `E`'s vocabulary.
    ///
    /// Returns the non-negative status on success (0, or an informational
    /// positive value such as "already set up").
    pub fn ioctl<E: ModuleStatus>(&self, handle: DriverHandle, cmd: u32, args: &mut [u8]) -> Result<i32, E> {
        if handle.module() != Some(E::MODULE) || self.validate(handle).is_err() {
            return Err(E::from(RawTransportError::Inval));
        }

        let ret = match self.ioctl_raw(handle, cmd, args) {
            Ok(ret) => ret,
            Err(err) => {
                log_error!(LOG_ORIGIN, "ioctl {:#x} on {} failed: {}", cmd, handle, err);
                let err = E::os_failure(err);
                args::set_api_status(args, err.code());
                return Err(err);
            }
        };

        match args::api_status(args) {
            Some(status) if status < 0 => {
                let err = E::from(RawTransportError::from_status(status));
                args::set_api_status(args, err.code());
                Err(err)
            }
            Some(status) => Ok(status),
            None => Ok(ret),
        }
    }

    pub fn read(&self, handle: DriverHandle, buf: &mut [u8]) -> TransportResult<usize> {
        let (_, fd) = self.validate(handle)?;
        self.device.read(fd, buf)
    }

    pub fn fcntl(&self, handle: DriverHandle, cmd: i32, arg: i64) -> TransportResult<i64> {
        let (_, fd) = self.validate(handle)?;
        self.device.fcntl(fd, cmd, arg)
    }

    pub fn ioctl_count(&self, module: ModuleId) -> u64 {
        self.ioctl_counts[module as usize].load(Ordering::Relaxed)
    }

    pub fn usage_count(&self) -> u32 {
        self.shared.lock().usage
    }
}
