//! CAdES Bridge Common Library
//!
//! Channel plumbing shared by the bridge library and its tools:
//!
//! - Named FIFO endpoints (`{dir}/in`, `{dir}/out`) with idempotent creation
//! - The error taxonomy and its mapping onto integer status codes
//! - Configuration for channel directories and FIFO permissions
//! - An optional length-prefix framing contract for the raw byte stream

#[cfg(not(unix))]
compile_error!("cades-common needs a Unix platform with named FIFOs");

/// Named FIFO endpoints
pub mod channel;

/// Configuration structures and channel naming
pub mod config;

/// Error taxonomy and status codes
pub mod error;

/// Length-prefixed framing over the raw channels
pub mod framing;

// Re-export commonly used types for convenience
pub use channel::{ensure_channel, ChannelEndpoint};
pub use config::{BridgeConfig, ChannelKind, ChannelPath, CHANNEL_IN_NAME, CHANNEL_OUT_NAME};
pub use error::{BridgeError, Result, STATUS_INTERNAL, STATUS_INVALID_ARGUMENT, STATUS_OK};
