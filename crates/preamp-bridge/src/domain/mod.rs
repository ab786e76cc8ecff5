//! Domain layer for preamp-bridge.
//!
//! Pure types with no I/O, no async runtime and no sockets:
//!
//! - Configuration ([`BridgeConfig`])
//! - Wi-Fi identity ([`NetworkCredentials`], [`StationStatus`],
//!   [`ConnectionState`])
//!
//! Loading the configuration from disk or the command line happens in the
//! infrastructure layer and `main.rs`.

pub mod config;
pub mod network;

pub use config::{BridgeConfig, RadioBackend};
pub use network::{ConnectionState, NetworkCredentials, StationStatus};
