use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// File name of the channel the engine reads requests from
pub const CHANNEL_IN_NAME: &str = "in";
/// File name of the channel the engine writes responses to
pub const CHANNEL_OUT_NAME: &str = "out";

/// Owner read/write, no access for anyone else
pub const DEFAULT_FIFO_MODE: u32 = 0o600;
/// Upper bound for a single length-prefixed frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const CHANNEL_DIR_ENV: &str = "CADES_CHANNEL_DIR";
const FIFO_MODE_ENV: &str = "CADES_FIFO_MODE";

/// One side of the channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Requests towards the engine
    In,
    /// Responses from the engine
    Out,
}

impl ChannelKind {
    /// File name under the channel directory
    pub fn file_name(self) -> &'static str {
        match self {
            ChannelKind::In => CHANNEL_IN_NAME,
            ChannelKind::Out => CHANNEL_OUT_NAME,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Directory holding the `in`/`out` FIFOs.
///
/// The directory belongs to the embedding application. The bridge never
/// creates or removes it, and leaves the FIFOs behind on close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPath {
    dir: PathBuf,
}

impl ChannelPath {
    /// Validates that the path is non-empty. Existence is left to the
    /// channel setup so that a missing directory surfaces as an OS error.
    pub fn new(dir: impl Into<PathBuf>) -> crate::error::Result<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(BridgeError::InvalidArgument("channel path is empty"));
        }
        Ok(Self { dir })
    }

    /// The directory itself
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/in` or `{dir}/out`
    pub fn endpoint(&self, kind: ChannelKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

/// Settings for channel creation and framing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Default channel directory for tools that are not handed one
    pub channel_dir:   Option<PathBuf>,
    /// Permission bits for newly created FIFOs
    pub fifo_mode:     u32,
    /// Largest frame `framing::read_frame` accepts
    pub max_frame_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_dir:   None,
            fifo_mode:     DEFAULT_FIFO_MODE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl BridgeConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables
    ///
    /// Reads CADES_CHANNEL_DIR and CADES_FIFO_MODE (octal, e.g. `660`).
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(dir) = env::var(CHANNEL_DIR_ENV) {
            if !dir.is_empty() {
                config.channel_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(mode) = env::var(FIFO_MODE_ENV) {
            match parse_mode(&mode) {
                Some(mode) => config.fifo_mode = mode,
                None => tracing::warn!("Ignoring invalid {}={:?}", FIFO_MODE_ENV, mode),
            }
        }

        config
    }

    /// Loads a JSON configuration file. Missing keys take default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {path:?}"))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config from {path:?}"))?;
        tracing::debug!("Loaded bridge config from {:?}: {:?}", path, config);
        Ok(config)
    }

    /// Set the default channel directory
    pub fn with_channel_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.channel_dir = Some(dir.into());
        self
    }

    /// Set the FIFO permission bits
    pub fn with_fifo_mode(mut self, mode: u32) -> Self {
        self.fifo_mode = mode;
        self
    }

    /// Set the frame size limit
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

fn parse_mode(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    u32::from_str_radix(digits, 8).ok().filter(|mode| *mode <= 0o777)
}
