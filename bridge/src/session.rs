use std::{
    os::fd::{AsRawFd, RawFd},
    path::Path,
};

use cades_common::{BridgeConfig, ChannelEndpoint, ChannelKind, ChannelPath, Result};
use uuid::Uuid;

/// Where a [`Session`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel held
    Closed,
    /// `in` is held but `out` could not be established. Stays this way
    /// until [`Session::close`] or the next [`Session::open`].
    PartiallyOpen,
    /// Both channels held
    Open,
}

/// One `in`/`out` FIFO pair bound to an engine session.
///
/// The caller owns the session and passes it to whatever needs the
/// descriptors. A session does no locking: callers that share it between
/// threads must serialise `open`/`close` against every other use.
#[derive(Debug)]
pub struct Session {
    id:          Uuid,
    fifo_mode:   u32,
    root:        Option<ChannelPath>,
    channel_in:  Option<ChannelEndpoint>,
    channel_out: Option<ChannelEndpoint>,
}

impl Default for Session {
    fn default() -> Self {
        Self::with_config(&BridgeConfig::default())
    }
}

impl Session {
    /// Creates a closed session with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a closed session that creates FIFOs with `config.fifo_mode`
    pub fn with_config(config: &BridgeConfig) -> Self {
        Self {
            id:          Uuid::new_v4(),
            fifo_mode:   config.fifo_mode,
            root:        None,
            channel_in:  None,
            channel_out: None,
        }
    }

    /// Identifier used on this session's log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        match (&self.channel_in, &self.channel_out) {
            (Some(_), Some(_)) => SessionState::Open,
            (Some(_), None) => SessionState::PartiallyOpen,
            _ => SessionState::Closed,
        }
    }

    /// Directory of the channels currently or last held
    pub fn path(&self) -> Option<&ChannelPath> {
        self.root.as_ref()
    }

    /// The `in` endpoint, if held
    pub fn channel_in(&self) -> Option<&ChannelEndpoint> {
        self.channel_in.as_ref()
    }

    /// The `out` endpoint, if held
    pub fn channel_out(&self) -> Option<&ChannelEndpoint> {
        self.channel_out.as_ref()
    }

    /// Both descriptors, only when the session is fully open
    pub fn raw_handles(&self) -> Option<(RawFd, RawFd)> {
        match (&self.channel_in, &self.channel_out) {
            (Some(channel_in), Some(channel_out)) => {
                Some((channel_in.as_raw_fd(), channel_out.as_raw_fd()))
            }
            _ => None,
        }
    }

    /// Establish `{dir}/in` then `{dir}/out`.
    ///
    /// An empty `dir` fails with an invalid argument before anything is
    /// touched, including a session that is already open. Otherwise any
    /// descriptors from an earlier open are released first and existing
    /// FIFOs are reused.
    ///
    /// If `in` fails the session stays [`SessionState::Closed`] and `out`
    /// is never attempted. If `out` fails the session is left
    /// [`SessionState::PartiallyOpen`] holding `in`, and the `out` error is
    /// returned.
    pub fn open(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let root = ChannelPath::new(dir.as_ref())?;

        if self.state() != SessionState::Closed {
            tracing::info!(
                "Session {} reopening, releasing channels in {:?}",
                self.id,
                self.root.as_ref().map(ChannelPath::dir)
            );
            self.close();
        }

        tracing::info!("Session {} opening channels in {:?}", self.id, root.dir());
        self.root = Some(root.clone());

        let channel_in = ChannelEndpoint::ensure(&root, ChannelKind::In, self.fifo_mode)
            .inspect_err(|e| tracing::warn!("Session {} failed to open: {}", self.id, e))?;
        self.channel_in = Some(channel_in);

        let channel_out = ChannelEndpoint::ensure(&root, ChannelKind::Out, self.fifo_mode)
            .inspect_err(|e| {
                tracing::warn!(
                    "Session {} partially open, holding `in` until close: {}",
                    self.id,
                    e
                )
            })?;
        self.channel_out = Some(channel_out);

        tracing::info!("Session {} open", self.id);
        Ok(())
    }

    /// Release whatever descriptors are held. Always succeeds; calling it
    /// on a closed session does nothing. The FIFOs stay on disk.
    pub fn close(&mut self) {
        let released_in = self.channel_in.take().is_some();
        let released_out = self.channel_out.take().is_some();

        if released_in || released_out {
            tracing::info!(
                "Session {} closed (released in: {}, out: {})",
                self.id,
                released_in,
                released_out
            );
        } else {
            tracing::debug!("Session {} close with nothing open", self.id);
        }
    }
}
