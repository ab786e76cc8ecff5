//! Infrastructure layer for preamp-bridge.
//!
//! Everything that touches the outside world lives here: the TCP listener
//! and HTTP parsing, WebSocket framing on the socket, the serial port, the
//! captive DNS socket, files on disk and the Wi-Fi radio.
//!
//! # What does NOT belong here?
//!
//! - Device line handling, command dedup and session fan-out (application)
//! - Configuration types (domain)

pub mod dns_server;
pub mod http_server;
pub mod radio;
pub mod restart;
pub mod serial_link;
pub mod setup_page;
pub mod storage;
pub mod ws_session;

pub use dns_server::run_dns_server;
pub use http_server::{run_server, serve, GatewayState, RestartHook};
