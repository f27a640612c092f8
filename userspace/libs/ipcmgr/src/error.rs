// Raw transport errors
//
// The kernel driver reports failures as negative errno values, either as the
// return of the ioctl call itself or inside the `apiStatus` word of the
// argument block. This module gives those values one Rust vocabulary that
// client modules convert from.

/// errno values understood by the transport (Linux numbering)
pub const ENOENT: i32 = 2;
pub const EINTR: i32 = 4;
pub const EBADF: i32 = 9;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const ETIME: i32 = 62;

/// Failure reported by the shared device or found in `apiStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RawTransportError {
    #[error("invalid argument")]
    Inval,
    #[error("out of memory")]
    NoMem,
    #[error("no such entry")]
    NoEnt,
    #[error("no such device")]
    NoDev,
    #[error("entry already exists")]
    Exist,
    #[error("timer expired")]
    Time,
    #[error("interrupted system call")]
    Intr,
    #[error("bad address")]
    Fault,
    #[error("device or resource busy")]
    Busy,
    /// A negative status that is not a known errno. Kernel-side modules
    /// write their own status codes here.
    #[error("status {0}")]
    Status(i32),
}

impl RawTransportError {
    /// Convert from a positive errno value
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            EINVAL => RawTransportError::Inval,
            ENOMEM => RawTransportError::NoMem,
            ENOENT => RawTransportError::NoEnt,
            ENODEV => RawTransportError::NoDev,
            EEXIST => RawTransportError::Exist,
            ETIME => RawTransportError::Time,
            EINTR => RawTransportError::Intr,
            EFAULT => RawTransportError::Fault,
            EBUSY => RawTransportError::Busy,
            other => RawTransportError::Status(-other),
        }
    }

    /// Convert a negative `apiStatus` word
    pub fn from_status(status: i32) -> Self {
        match status.checked_neg() {
            Some(errno) if errno > 0 => match Self::from_errno(errno) {
                RawTransportError::Status(_) => RawTransportError::Status(status),
                known => known,
            },
            _ => RawTransportError::Status(status),
        }
    }

    /// The negative status word this error is carried as
    pub fn status(&self) -> i32 {
        match self {
            RawTransportError::Inval => -EINVAL,
            RawTransportError::NoMem => -ENOMEM,
            RawTransportError::NoEnt => -ENOENT,
            RawTransportError::NoDev => -ENODEV,
            RawTransportError::Exist => -EEXIST,
            RawTransportError::Time => -ETIME,
            RawTransportError::Intr => -EINTR,
            RawTransportError::Fault => -EFAULT,
            RawTransportError::Busy => -EBUSY,
            RawTransportError::Status(code) => *code,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, RawTransportError>;
