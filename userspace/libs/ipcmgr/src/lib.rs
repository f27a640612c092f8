// SysLink IPC Driver Multiplexer
//
// This library is the seam between the user-space IPC modules (MessageQ,
// NameServer, Notify, heaps) and the single kernel character device that
// backs all of them when the stack is split across a user/kernel boundary.
//
// Key responsibilities:
// - Map a module name to a module id through a static table
// - Open the shared device once per process and reference-count it
// - Tag every handle with its module id in the high 16 bits
// - Forward ioctl/read/fcntl to the shared descriptor
// - Rewrite the raw OS status found in `args.apiStatus` into the calling
//   module's own status vocabulary
//
// Design principles:
// - One transport error type (`RawTransportError`); each client module owns
//   its conversion from it, there is no central per-module switch
// - The device itself is a trait so the same multiplexer runs against a
//   kernel driver or the in-process `LoopbackDevice`
// - Logging goes through the `log` facade with a per-module origin tag

pub mod args;
pub mod device;
pub mod error;
pub mod log;
pub mod manager;

// Re-export common types at crate root
pub use device::{Device, Fd, IoctlHandler, LoopbackDevice};
pub use error::{RawTransportError, TransportResult};
pub use manager::{DriverHandle, DriverMultiplexer, ModuleId, ModuleStatus, DEVICE_NAME};
