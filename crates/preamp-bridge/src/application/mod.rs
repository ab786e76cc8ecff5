//! Application layer for preamp-bridge.
//!
//! The application layer knows *what* the bridge does with device lines,
//! browser commands and Wi-Fi state, but delegates *how* bytes move to the
//! infrastructure layer.
//!
//! # Responsibilities
//!
//! - Owning the device state cache, command queue and session registry
//! - Running the serial reader / writer loops against abstract byte sources
//! - Supervising station joins and the setup access point
//!
//! # What does NOT belong here?
//!
//! - Opening sockets, serial ports or files (that is infrastructure)
//! - HTTP parsing and WebSocket framing on the wire

pub mod bridge_service;
pub mod device_link;
pub mod network_supervisor;
pub mod session_broadcaster;

pub use bridge_service::{BridgeContext, SessionHandle};
pub use device_link::{run_reader, run_writer, spawn_startup_sync, LineSink};
pub use network_supervisor::{
    BootOutcome, NetworkSupervisor, RadioError, SupervisorSettings, WifiRadio,
};
pub use session_broadcaster::{Outbound, SessionId, SessionRegistry};
