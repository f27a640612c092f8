// Status codes
//
// Every module reports failures in its own small-integer vocabulary:
// 0 is success, positive values are informational successes and negative
// values name the error kind. The Rust enums below carry those codes; the
// `From<RawTransportError>` impls are each module's remapping table for
// statuses that come back across the driver boundary.

use ipcmgr::{ModuleId, ModuleStatus, RawTransportError};

pub const S_SUCCESS: i32 = 0;
pub const S_ALREADYSETUP: i32 = 1;
pub const S_BUSY: i32 = 2;

macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident = $code:literal => $msg:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $( #[error($msg)] $variant, )+
        }

        impl $name {
            /// Stable status value for this error
            pub const fn code(&self) -> i32 {
                match self {
                    $( $name::$variant => $code, )+
                }
            }

            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    $( $code => Some($name::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

status_enum! {
    /// MessageQ status
    pub enum MessageQError {
        Fail = -1 => "generic failure",
        InvalidArgument = -2 => "invalid argument",
        Memory = -3 => "memory allocation failed",
        AlreadyExists = -4 => "queue already exists",
        NotFound = -5 => "queue not found",
        Timeout = -6 => "timed out waiting for a message",
        InvalidState = -7 => "module is in an invalid state",
        OsFailure = -8 => "operating system call failed",
        Resource = -9 => "resource unavailable",
        Restart = -10 => "operation must be restarted",
        InvalidMessage = -11 => "invalid message",
        NotOwner = -12 => "not the owner of the queue",
        RemoteActive = -13 => "remote processor is active",
        InvalidHeapId = -14 => "invalid heap id",
        InvalidProcId = -15 => "invalid processor id",
        MaxReached = -16 => "maximum number of queues reached",
        UnregisteredHeapId = -17 => "heap id is not registered",
        CannotFreeStaticMessage = -18 => "cannot free a static message",
        Unblocked = -20 => "queue was unblocked",
    }
}

status_enum! {
    /// NameServer status
    pub enum NameServerError {
        Fail = -1 => "generic failure",
        InvalidArgument = -2 => "invalid argument",
        Memory = -3 => "memory allocation failed",
        AlreadyExists = -4 => "name already exists",
        NotFound = -5 => "name not found",
        Timeout = -6 => "timed out",
        InvalidState = -7 => "module is in an invalid state",
        OsFailure = -8 => "operating system call failed",
        Resource = -9 => "resource unavailable",
        Restart = -10 => "operation must be restarted",
        MaxReached = -11 => "table is full",
    }
}

status_enum! {
    /// Notify status
    pub enum NotifyError {
        Fail = -1 => "generic failure",
        InvalidArgument = -2 => "invalid argument",
        Memory = -3 => "memory allocation failed",
        AlreadyExists = -4 => "callback already registered",
        NotFound = -5 => "no matching registration",
        Timeout = -6 => "timed out waiting for the event flag to clear",
        InvalidState = -7 => "module is in an invalid state",
        OsFailure = -8 => "operating system call failed",
        Resource = -10 => "resource unavailable",
        Restart = -11 => "operation must be restarted",
        Busy = -12 => "driver busy",
        DriverNotInitialized = -13 => "remote side is not initialized to receive",
        NotReady = -14 => "no receiver ready for the event",
        HandleInvalid = -16 => "driver handle is invalid",
        EventReserved = -17 => "event number is reserved",
    }
}

status_enum! {
    /// Heap registry status
    pub enum HeapError {
        InvalidArgument = -2 => "invalid heap id",
        Memory = -3 => "heap exhausted",
        NotFound = -5 => "no heap registered at this id",
    }
}

/// Errors reported while bringing the whole stack up or down
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    #[error("ipc context is in an invalid state")]
    InvalidState,
    #[error(transparent)]
    NameServer(#[from] NameServerError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    MessageQ(#[from] MessageQError),
}

impl IpcError {
    pub const fn code(&self) -> i32 {
        match self {
            IpcError::InvalidState => -7,
            IpcError::NameServer(err) => err.code(),
            IpcError::Notify(err) => err.code(),
            IpcError::Heap(err) => err.code(),
            IpcError::MessageQ(err) => err.code(),
        }
    }
}

impl From<RawTransportError> for MessageQError {
    fn from(err: RawTransportError) -> Self {
        match err {
            RawTransportError::Inval => MessageQError::InvalidArgument,
            RawTransportError::NoMem => MessageQError::Memory,
            RawTransportError::NoDev => MessageQError::InvalidState,
            RawTransportError::NoEnt => MessageQError::NotFound,
            RawTransportError::Time => MessageQError::Timeout,
            other => MessageQError::from_code(other.status()).unwrap_or(MessageQError::OsFailure),
        }
    }
}

impl ModuleStatus for MessageQError {
    const MODULE: ModuleId = ModuleId::MessageQ;

    fn code(&self) -> i32 {
        MessageQError::code(self)
    }

    fn os_failure(_err: RawTransportError) -> Self {
        MessageQError::OsFailure
    }
}

impl From<RawTransportError> for NameServerError {
    fn from(err: RawTransportError) -> Self {
        match err {
            RawTransportError::Inval => NameServerError::InvalidArgument,
            RawTransportError::NoMem => NameServerError::Memory,
            RawTransportError::NoDev => NameServerError::InvalidState,
            RawTransportError::NoEnt => NameServerError::NotFound,
            RawTransportError::Time => NameServerError::Timeout,
            RawTransportError::Exist => NameServerError::AlreadyExists,
            _ => NameServerError::Fail,
        }
    }
}

impl ModuleStatus for NameServerError {
    const MODULE: ModuleId = ModuleId::NameServer;

    fn code(&self) -> i32 {
        NameServerError::code(self)
    }

    fn os_failure(_err: RawTransportError) -> Self {
        NameServerError::OsFailure
    }
}

impl From<RawTransportError> for NotifyError {
    fn from(err: RawTransportError) -> Self {
        // The kernel side already speaks Notify codes.
        NotifyError::from_code(err.status()).unwrap_or(NotifyError::OsFailure)
    }
}

impl ModuleStatus for NotifyError {
    const MODULE: ModuleId = ModuleId::Notify;

    fn code(&self) -> i32 {
        NotifyError::code(self)
    }

    fn os_failure(_err: RawTransportError) -> Self {
        NotifyError::OsFailure
    }
}

impl From<RawTransportError> for HeapError {
    fn from(err: RawTransportError) -> Self {
        match err {
            RawTransportError::NoMem => HeapError::Memory,
            RawTransportError::NoEnt => HeapError::NotFound,
            _ => HeapError::InvalidArgument,
        }
    }
}

impl ModuleStatus for HeapError {
    const MODULE: ModuleId = ModuleId::HeapBufMP;

    fn code(&self) -> i32 {
        HeapError::code(self)
    }

    fn os_failure(_err: RawTransportError) -> Self {
        HeapError::InvalidArgument
    }
}

impl From<NameServerError> for MessageQError {
    fn from(err: NameServerError) -> Self {
        match err {
            NameServerError::InvalidArgument => MessageQError::InvalidArgument,
            NameServerError::Memory => MessageQError::Memory,
            NameServerError::AlreadyExists => MessageQError::AlreadyExists,
            NameServerError::NotFound => MessageQError::NotFound,
            NameServerError::Timeout => MessageQError::Timeout,
            NameServerError::InvalidState => MessageQError::InvalidState,
            NameServerError::OsFailure => MessageQError::OsFailure,
            NameServerError::MaxReached => MessageQError::MaxReached,
            _ => MessageQError::Fail,
        }
    }
}

impl From<HeapError> for MessageQError {
    fn from(err: HeapError) -> Self {
        match err {
            HeapError::Memory => MessageQError::Memory,
            HeapError::InvalidArgument | HeapError::NotFound => MessageQError::InvalidHeapId,
        }
    }
}
