//! Altair - Core
//!
//! An Alpaca device-control server for astronomical instruments, built
//! around a hand-rolled HTTP/1.1 protocol engine.
//!
//! # Overview
//!
//! Altair exposes heterogeneous instruments (cameras, filter wheels, domes,
//! focusers, switches) as numbered devices of a device type. Clients issue
//! GET/PUT requests against paths of the form
//! `/api/v1/{deviceType}/{deviceNumber}/{command}` and receive a JSON
//! envelope carrying the result plus standard transaction bookkeeping.
//! A companion UDP responder answers broadcast discovery probes with the
//! HTTP listen port.
//!
//! # Architecture
//!
//! - [`http`] - HTTP request parsing, response building, TCP listener loop
//! - [`protocol`] - path routing, command tables, dispatch, JSON envelopes
//! - [`device`] - the device capability trait, registry, watchdog, simulators
//! - [`scheduler`] - cooperative polling loop over every device state machine
//! - [`discovery`] - UDP discovery responder
//! - [`server`] - process-wide server context tying the threads together
//! - [`config`] - TOML configuration with environment overrides
//! - [`logging`] - `log`-facade backend and the device event sink
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use altair_core::config::AltairConfig;
//! use altair_core::server::AltairServer;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AltairConfig::default();
//!     let server = AltairServer::new(config)?;
//!     server.run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod http;
pub mod logging;
pub mod pages;
pub mod protocol;
pub mod scheduler;
pub mod server;

// Re-exports of main types
pub use device::registry::DeviceRegistry;
pub use device::AlpacaDevice;
pub use http::{HttpResponse, Request};
pub use protocol::envelope::EnvelopeWriter;
pub use server::{AltairServer, ServerContext};

/// Main result type for the framework
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type, used for startup and configuration failures.
///
/// Per-request failures never surface here; they are resolved inside the
/// protocol engine and reported to the client in the response envelope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration file or value problems
    #[error("configuration error: {0}")]
    Config(String),

    /// The fixed-capacity device registry is full; adding more devices is a
    /// startup configuration error, never a runtime fault
    #[error("device registry full (capacity {capacity})")]
    RegistryFull { capacity: usize },

    /// An unknown device type name in the configuration
    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    /// HTTP listener or discovery socket setup failures
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// HTTP-level errors escaping the listener loop
    #[error(transparent)]
    Http(#[from] http::HttpError),

    /// Logger installation failed
    #[error("logging error: {0}")]
    Logging(String),
}
