//! preamp-bridge library crate.
//!
//! Connects a tube preamp controller on a serial line to web browsers on the
//! local network, and helps the device onto that network in the first place.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (WebSocket text frames, REST)          Phone on setup AP (HTTP, DNS)
//!         ↕                                                ↕
//! [preamp-bridge]
//!   ├── domain/           BridgeConfig, credentials, connection state
//!   ├── application/      BridgeContext (cache, command queue, sessions),
//!   │                     serial reader/writer loops, NetworkSupervisor
//!   └── infrastructure/
//!         ├── http_server/   accept loop, routing, setup flow
//!         ├── ws_session/    per-browser frame loop
//!         ├── serial_link/   UART open + reader thread
//!         ├── dns_server/    captive DNS while in setup mode
//!         ├── storage/       credentials JSON, TOML config file
//!         └── radio/         simulated and nmcli Wi-Fi backends
//!         ↕
//! Preamp controller (line protocol over UART)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `preamp-core`; it uses tokio
//!   channels and timers but opens no sockets, ports or files.
//! - `infrastructure` depends on all other layers.
//!
//! The protocol rules themselves (framing, caching, dedup, frame and DNS
//! codecs) live in the `preamp-core` crate so they can be tested and
//! benchmarked without a runtime.

/// Domain layer: configuration and network identity types (no I/O).
pub mod domain;

/// Application layer: shared bridge state and long-running activities.
pub mod application;

/// Infrastructure layer: sockets, serial port, files and radios.
pub mod infrastructure;
