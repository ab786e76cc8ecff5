//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is assembled once at startup from three layers, lowest precedence first:
//!
//! 1. The built-in defaults below.
//! 2. An optional TOML file passed with `--config`.
//! 3. Command-line flags and their environment variables.
//!
//! Every field carries a serde default, so a TOML file only needs the keys it
//! wants to change:
//!
//! ```toml
//! serial_port = "/dev/ttyAMA0"
//! radio = "nmcli"
//! join_timeout_ms = 15000
//! ```
//!
//! Timing values are stored as plain milliseconds because that is what people
//! write in config files; the `*_duration()` accessors convert them.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Which Wi-Fi backend drives the station / access point radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    /// In-process fake radio for development hosts and tests.
    Simulated,
    /// NetworkManager via the `nmcli` command-line tool (Linux only).
    Nmcli,
}

impl FromStr for RadioBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" => Ok(RadioBackend::Simulated),
            "nmcli" => Ok(RadioBackend::Nmcli),
            other => Err(format!("unknown radio backend '{other}' (expected simulated or nmcli)")),
        }
    }
}

impl fmt::Display for RadioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioBackend::Simulated => f.write_str("simulated"),
            RadioBackend::Nmcli => f.write_str("nmcli"),
        }
    }
}

/// All runtime configuration for the preamp bridge.
///
/// Build this struct once at startup and share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use preamp_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.http_bind_addr.port(), 80);
/// assert_eq!(cfg.dedup_window_ms, 350);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    // ── Network endpoints ────────────────────────────────────────────────────
    /// Address the HTTP / WebSocket server binds to.
    pub http_bind_addr: SocketAddr,
    /// UDP port of the captive DNS responder.
    pub dns_port: u16,

    // ── Device link ──────────────────────────────────────────────────────────
    /// Serial device connected to the preamp controller.
    pub serial_port: String,
    pub baud_rate: u32,

    // ── Files ────────────────────────────────────────────────────────────────
    /// JSON file holding the saved Wi-Fi credentials.
    pub credentials_path: PathBuf,
    /// Directory with `index.html`, `app.js` and `style.css`.
    pub web_root: PathBuf,

    // ── Wi-Fi ────────────────────────────────────────────────────────────────
    pub radio: RadioBackend,
    /// SSID of the self-hosted setup access point.
    pub ap_ssid: String,
    /// WPA2 passphrase of the setup access point (at least 8 characters).
    pub ap_password: String,
    /// Address the access point hands out for itself and answers DNS with.
    pub ap_address: Ipv4Addr,
    /// Hostname announced when joining a network.
    pub hostname: String,
    /// Wireless interface used by the `nmcli` backend.
    pub wifi_interface: String,
    /// SSID pre-filled on the setup page while no credentials are stored.
    pub default_ssid: String,

    // ── Tunables ─────────────────────────────────────────────────────────────
    /// Minimum interval between repeated sends of the same read command.
    pub dedup_window_ms: u64,
    /// Serial silence after which a partial line is flushed.
    pub idle_flush_ms: u64,
    /// Pending serial bytes allowed before the framer truncates.
    pub buffer_cap: usize,
    /// Bytes kept when the framer truncates.
    pub retained_tail: usize,
    /// Upper bound on one station join attempt.
    pub join_timeout_ms: u64,
    /// Radio status poll period during a join attempt.
    pub join_poll_ms: u64,
    /// Pause between two consecutive serial writes.
    pub write_pacing_ms: u64,
    /// Delay before the initial `GET` burst after the serial link starts.
    pub startup_sync_delay_ms: u64,
    /// HTTP response bodies are written in pieces of at most this many bytes.
    pub http_chunk_size: usize,
    /// Largest inbound WebSocket frame payload accepted.
    pub max_frame_payload: usize,
    /// Outbound messages buffered per WebSocket session before it is dropped.
    pub session_queue_len: usize,
}

impl Default for BridgeConfig {
    /// | Field                  | Default             |
    /// |------------------------|---------------------|
    /// | http_bind_addr         | `0.0.0.0:80`        |
    /// | dns_port               | `53`                |
    /// | serial_port            | `/dev/ttyUSB0`      |
    /// | baud_rate              | `115200`            |
    /// | credentials_path       | `wifi.json`         |
    /// | web_root               | `web`               |
    /// | radio                  | `simulated`         |
    /// | ap_ssid / ap_password  | `preamp-bridge` / `preamp123` |
    /// | ap_address             | `192.168.4.1`       |
    /// | default_ssid           | `""` (empty)        |
    /// | dedup_window_ms        | `350`               |
    /// | idle_flush_ms          | `50`                |
    /// | buffer_cap / tail      | `1024` / `256`      |
    /// | join_timeout_ms        | `10000`             |
    /// | join_poll_ms           | `250`               |
    /// | write_pacing_ms        | `2`                 |
    /// | startup_sync_delay_ms  | `500`               |
    /// | http_chunk_size        | `1024`              |
    /// | max_frame_payload      | `65536`             |
    fn default() -> Self {
        Self {
            http_bind_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            dns_port: 53,
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            credentials_path: PathBuf::from("wifi.json"),
            web_root: PathBuf::from("web"),
            radio: RadioBackend::Simulated,
            ap_ssid: "preamp-bridge".to_string(),
            ap_password: "preamp123".to_string(),
            ap_address: Ipv4Addr::new(192, 168, 4, 1),
            hostname: "preamp".to_string(),
            wifi_interface: "wlan0".to_string(),
            default_ssid: String::new(),
            dedup_window_ms: 350,
            idle_flush_ms: 50,
            buffer_cap: 1024,
            retained_tail: 256,
            join_timeout_ms: 10_000,
            join_poll_ms: 250,
            write_pacing_ms: 2,
            startup_sync_delay_ms: 500,
            http_chunk_size: 1024,
            max_frame_payload: 64 * 1024,
            session_queue_len: 64,
        }
    }
}

impl BridgeConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn idle_flush(&self) -> Duration {
        Duration::from_millis(self.idle_flush_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_ms)
    }

    pub fn write_pacing(&self) -> Duration {
        Duration::from_millis(self.write_pacing_ms)
    }

    pub fn startup_sync_delay(&self) -> Duration {
        Duration::from_millis(self.startup_sync_delay_ms)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
