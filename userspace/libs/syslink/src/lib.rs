// SysLink IPC
//
// User-space half of the inter-processor communication stack: structured
// message queues, one-word event notification, name resolution and the
// heap registry that backs message storage.
//
// Modules, leaf first:
// - `list`/`gate`: intrusive list with injectable mutual exclusion
// - `notify`: per processor-pair event channel
// - `nameserver`: name -> value tables with remote fan-out
// - `heap`: heap id -> allocator registry
// - `message`/`messageq`/`sync`/`transport`: MessageQ
// - `ipc`: context object owning one processor's modules
//
// Design principles:
// - Every module reports failures with its own status enum (`error`)
// - Components take their collaborators by `Arc`; there is no global state
// - Logging goes through the `ipcmgr` macros with a per-module origin

pub mod error;
pub mod gate;
pub mod heap;
pub mod ipc;
pub mod list;
pub mod message;
pub mod messageq;
pub mod nameserver;
pub mod notify;
pub mod sync;
pub mod transport;

/// Processor id
pub type ProcId = u16;

/// Terminates processor id lists
pub const PROC_ID_INVALID: ProcId = 0xFFFF;

// Re-export common types at crate root
pub use error::{HeapError, IpcError, MessageQError, NameServerError, NotifyError};
pub use heap::{Heap, HeapBuf, HeapId, HeapMem, HeapRegistry};
pub use ipc::{Ipc, IpcConfig};
pub use message::{Message, Priority, QueueId};
pub use messageq::{MessageQ, MessageQConfig, MessageQHandle, MessageQParams, PutError};
pub use nameserver::{NameServer, NameServerParams, NameServerRegistry};
pub use notify::{NotifyConfig, NotifyDriver};
pub use sync::{SemaphoreSync, Synchronizer, WaitStatus, FOREVER};
