//! # preamp-core
//!
//! Protocol building blocks for the preamp serial-to-WebSocket bridge.
//!
//! This crate has no sockets, no threads and no async runtime.  Everything in
//! here is a pure function or a plain data structure, which keeps the tricky
//! parsing code easy to unit test.  The `preamp-bridge` crate wires these
//! pieces to a real serial port and real TCP/UDP sockets.
//!
//! # Architecture overview
//!
//! ```text
//!  serial bytes ─► framer ─► device ─► (broadcast to browsers)
//!                                         ▲
//!  browser ─► websocket ─► command ─► (write queue) ─► serial
//! ```
//!
//! - **`framer`** – Recovers whole protocol lines from a noisy, unterminated
//!   UART byte stream.
//! - **`device`** – Last-value-wins cache of `STATE`, `SELECTOR_LABELS` and
//!   `AMP_STATES` lines plus the per-tube telemetry table.
//! - **`command`** – Normalizes client commands, throttles repeated reads and
//!   holds the FIFO of lines waiting to be written.
//! - **`websocket`** – Handshake accept key, frame encode/decode and opcode
//!   classification.
//! - **`dns`** – Captive-portal DNS question parsing and answer building.

pub mod command;
pub mod device;
pub mod dns;
pub mod framer;
pub mod websocket;

pub use command::{normalize_command, CommandQueue, DedupWindow, SubmitOutcome};
pub use device::{AppliedLine, DeviceStateCache, DeviceStateSnapshot, LineCategory, TubeTelemetry};
pub use framer::{extract_lines, FramerLimits, UartFramer};
pub use websocket::{accept_key, decode_frame, encode_frame, Frame, FrameError, FrameEvent, Opcode};
