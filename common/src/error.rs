use std::{io, path::PathBuf};

use nix::errno::Errno;
use thiserror::Error;

use crate::config::ChannelKind;

/// Success on the integer surface
pub const STATUS_OK: i32 = 0;

/// Invalid argument. Same value as JNI `EINVAL`, which managed callers
/// already treat as "bad input" and which can never collide with a
/// positive errno.
pub const STATUS_INVALID_ARGUMENT: i32 = -6;

/// A panic or other internal failure was caught at the C boundary
pub const STATUS_INTERNAL: i32 = -1;

/// Failures raised by the bridge itself. Engine results are never wrapped
/// in this type; they are passed through as plain integers.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A required argument was null, empty or not representable
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// mkfifo failed with something other than EEXIST
    #[error("failed to create {kind} channel at {}: {errno}", .path.display())]
    Create {
        /// Which endpoint of the pair
        kind:  ChannelKind,
        /// Full path of the FIFO
        path:  PathBuf,
        /// Raw OS error
        errno: Errno,
    },

    /// open(O_RDWR) on the FIFO failed
    #[error("failed to open {kind} channel at {}: {errno}", .path.display())]
    Open {
        /// Which endpoint of the pair
        kind:  ChannelKind,
        /// Full path of the FIFO
        path:  PathBuf,
        /// Raw OS error
        errno: Errno,
    },

    /// An operation needed both channel handles but the session is not open
    #[error("channel session is not open")]
    NotOpen,

    /// Read/write failure on an established channel
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Integer status for the foreign surface: `-6` for invalid arguments,
    /// the raw positive errno for OS failures.
    pub fn status(&self) -> i32 {
        match self {
            BridgeError::InvalidArgument(_) => STATUS_INVALID_ARGUMENT,
            BridgeError::Create { errno, .. } | BridgeError::Open { errno, .. } => *errno as i32,
            BridgeError::NotOpen => libc::EBADF,
            BridgeError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// The endpoint involved, if this is a channel setup failure
    pub fn channel_kind(&self) -> Option<ChannelKind> {
        match self {
            BridgeError::Create { kind, .. } | BridgeError::Open { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this came from the operating system rather than argument
    /// validation
    pub fn is_os_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Create { .. } | BridgeError::Open { .. } | BridgeError::Io(_)
        )
    }
}

/// Collapse a unit result into the integer surface
pub fn to_status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => e.status(),
    }
}

/// Result alias used across the bridge crates
pub type Result<T> = std::result::Result<T, BridgeError>;
