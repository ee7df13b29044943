//! CAdES Plugin Bridge
//!
//! Connects an embedding application to a CAdES signature engine. The
//! bridge owns one pair of named FIFOs per [`Session`] (`{dir}/in` and
//! `{dir}/out`) and hands their descriptors to the engine's message loop.
//! Licensing, PFX import, root certificate installation and error text are
//! forwarded to the engine unchanged through the [`Gateway`].
//!
//! The engine is any [`Engine`] implementation. C callers supply one as a
//! function table through the [`abi`] entry points; the `native-engine`
//! feature links the vendor SDK's symbols directly.
//!
//! # Example
//!
//! ```no_run
//! use cades_bridge::{Bridge, Engine};
//!
//! fn start<E: Engine>(engine: E) -> i32 {
//!     let mut bridge = Bridge::new(engine);
//!     // Blocks in the engine loop once both channels are up
//!     bridge.serve("/data/data/org.example/files")
//! }
//! ```

#[cfg(not(unix))]
compile_error!("cades-bridge needs a Unix platform with named FIFOs");

/// C entry points
pub mod abi;

/// Engine trait and C function table adapter
pub mod engine;

/// Pass-through operations
pub mod gateway;

/// Background reader for engine messages
pub mod pump;

/// Channel pair lifecycle
pub mod session;

use std::path::Path;

pub use cades_common::{BridgeConfig, BridgeError, ChannelKind, ChannelPath};
pub use engine::{Engine, EngineVtable, VtableEngine};
pub use gateway::{needs_password, Gateway, Outcome, ERROR_INVALID_PASSWORD};
pub use pump::MessagePump;
pub use session::{Session, SessionState};

/// A [`Session`] paired with the [`Gateway`] to its engine
pub struct Bridge<E> {
    session: Session,
    gateway: Gateway<E>,
}

impl<E: Engine> Bridge<E> {
    /// Creates a bridge with default settings
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, &BridgeConfig::default())
    }

    /// Creates a bridge whose session uses `config`
    pub fn with_config(engine: E, config: &BridgeConfig) -> Self {
        Self {
            session: Session::with_config(config),
            gateway: Gateway::new(engine),
        }
    }

    /// The channel session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The engine gateway
    pub fn gateway(&self) -> &Gateway<E> {
        &self.gateway
    }

    /// See [`Session::open`]
    pub fn open(&mut self, dir: impl AsRef<Path>) -> Result<(), BridgeError> {
        self.session.open(dir)
    }

    /// See [`Session::close`]
    pub fn close(&mut self) {
        self.session.close();
    }

    /// Run the engine loop over the open session. See [`Gateway::run_engine`].
    pub fn run(&self) -> i32 {
        self.gateway.run_engine(&self.session)
    }

    /// Open the channels under `dir`, then run the engine loop on them.
    ///
    /// Returns the open failure status if the channels could not be set up,
    /// otherwise whatever the engine loop returns. A partially open session
    /// stays that way until [`Bridge::close`].
    pub fn serve(&mut self, dir: impl AsRef<Path>) -> i32 {
        if let Err(e) = self.open(dir) {
            tracing::error!("Not starting engine: {}", e);
            return e.status();
        }
        self.run()
    }
}
