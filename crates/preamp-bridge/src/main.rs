//! Preamp bridge: entry point.
//!
//! This binary sits between a tube preamp controller on a serial line and
//! the browsers on the local network.  It relays the controller's line
//! protocol over WebSocket, answers a handful of REST reads from its cache,
//! and brings up a captive Wi-Fi setup portal when it has no network to join.
//!
//! # Usage
//!
//! ```text
//! preamp-bridge [OPTIONS]
//!
//! Options:
//!   --config      <FILE>    TOML configuration file
//!   --http-bind   <ADDR>    HTTP / WebSocket listener [default: 0.0.0.0:80]
//!   --serial-port <PATH>    Serial device [default: /dev/ttyUSB0]
//!   --baud-rate   <BAUD>    Serial baud rate [default: 115200]
//!   --radio       <KIND>    simulated | nmcli [default: simulated]
//!   ...
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then flags.  Every flag can
//! also come from the environment variable shown below; a flag given on the
//! command line wins over the variable.
//!
//! | Variable                 | Field                 |
//! |--------------------------|-----------------------|
//! | `PREAMP_CONFIG`          | config file path      |
//! | `PREAMP_HTTP_BIND`       | `http_bind_addr`      |
//! | `PREAMP_DNS_PORT`        | `dns_port`            |
//! | `PREAMP_SERIAL_PORT`     | `serial_port`         |
//! | `PREAMP_BAUD_RATE`       | `baud_rate`           |
//! | `PREAMP_CREDENTIALS`     | `credentials_path`    |
//! | `PREAMP_WEB_ROOT`        | `web_root`            |
//! | `PREAMP_RADIO`           | `radio`               |
//! | `PREAMP_WIFI_INTERFACE`  | `wifi_interface`      |
//! | `PREAMP_AP_SSID`         | `ap_ssid`             |
//! | `PREAMP_AP_PASSWORD`     | `ap_password`         |
//! | `PREAMP_AP_ADDRESS`      | `ap_address`          |
//! | `PREAMP_HOSTNAME`        | `hostname`            |
//! | `PREAMP_DEFAULT_SSID`    | `default_ssid`        |
//! | `PREAMP_DEDUP_WINDOW_MS` | `dedup_window_ms`     |
//! | `PREAMP_JOIN_TIMEOUT_MS` | `join_timeout_ms`     |
//!
//! # Startup sequence
//!
//! ```text
//! config ─► radio + supervisor ─► boot (join or setup AP)
//!        ─► serial link (reader thread, writer task, startup sync)
//!        ─► captive DNS (setup mode only)
//!        ─► HTTP / WebSocket gateway until Ctrl+C
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use preamp_core::framer::FramerLimits;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use preamp_bridge::application::{
    run_reader, run_writer, spawn_startup_sync, BootOutcome, BridgeContext, NetworkSupervisor,
    SupervisorSettings,
};
use preamp_bridge::domain::{BridgeConfig, RadioBackend};
use preamp_bridge::infrastructure::radio::build_radio;
use preamp_bridge::infrastructure::restart::restart_process;
use preamp_bridge::infrastructure::serial_link;
use preamp_bridge::infrastructure::storage::{load_config_file, CredentialStore};
use preamp_bridge::infrastructure::{run_dns_server, run_server, GatewayState, RestartHook};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial-to-WebSocket bridge for a tube preamp controller.
///
/// Every option is optional; anything left unset keeps the value from the
/// config file, or the built-in default when there is no file.
#[derive(Debug, Default, Parser)]
#[command(
    name = "preamp-bridge",
    about = "Serial-to-WebSocket bridge and Wi-Fi setup portal for a tube preamp controller",
    version
)]
struct Cli {
    /// TOML configuration file.  A missing file is treated as empty.
    #[arg(long, env = "PREAMP_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the HTTP / WebSocket listener, e.g. `0.0.0.0:80`.
    #[arg(long, env = "PREAMP_HTTP_BIND")]
    http_bind: Option<SocketAddr>,

    /// UDP port for the captive DNS responder.
    #[arg(long, env = "PREAMP_DNS_PORT")]
    dns_port: Option<u16>,

    /// Serial device connected to the preamp controller.
    #[arg(long, env = "PREAMP_SERIAL_PORT")]
    serial_port: Option<String>,

    #[arg(long, env = "PREAMP_BAUD_RATE")]
    baud_rate: Option<u32>,

    /// JSON file holding the saved Wi-Fi credentials.
    #[arg(long, env = "PREAMP_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Directory holding `index.html`, `app.js` and `style.css`.
    #[arg(long, env = "PREAMP_WEB_ROOT")]
    web_root: Option<PathBuf>,

    /// Wi-Fi backend: `simulated` or `nmcli`.
    #[arg(long, env = "PREAMP_RADIO")]
    radio: Option<RadioBackend>,

    /// Wireless interface for the nmcli backend.
    #[arg(long, env = "PREAMP_WIFI_INTERFACE")]
    wifi_interface: Option<String>,

    /// SSID of the setup access point.
    #[arg(long, env = "PREAMP_AP_SSID")]
    ap_ssid: Option<String>,

    #[arg(long, env = "PREAMP_AP_PASSWORD")]
    ap_password: Option<String>,

    /// Address of the setup access point; captive DNS answers with it.
    #[arg(long, env = "PREAMP_AP_ADDRESS")]
    ap_address: Option<Ipv4Addr>,

    /// Hostname announced when joining a network.
    #[arg(long, env = "PREAMP_HOSTNAME")]
    hostname: Option<String>,

    /// SSID pre-filled on the setup page when nothing is stored.
    #[arg(long, env = "PREAMP_DEFAULT_SSID")]
    default_ssid: Option<String>,

    /// Minimum interval between repeated sends of the same read command.
    #[arg(long, env = "PREAMP_DEDUP_WINDOW_MS")]
    dedup_window_ms: Option<u64>,

    /// Serial silence after which a partial line is flushed.
    #[arg(long, env = "PREAMP_IDLE_FLUSH_MS")]
    idle_flush_ms: Option<u64>,

    /// Upper bound on one station join attempt.
    #[arg(long, env = "PREAMP_JOIN_TIMEOUT_MS")]
    join_timeout_ms: Option<u64>,

    /// Pause between two consecutive serial writes.
    #[arg(long, env = "PREAMP_WRITE_PACING_MS")]
    write_pacing_ms: Option<u64>,
}

impl Cli {
    /// Loads the `--config` file (or the defaults) and applies the flags on
    /// top of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let base = match &self.config {
            Some(path) => load_config_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        Ok(self.apply_to(base))
    }

    /// Overrides every field of `config` that was given on the command line.
    fn apply_to(self, mut config: BridgeConfig) -> BridgeConfig {
        if let Some(v) = self.http_bind {
            config.http_bind_addr = v;
        }
        if let Some(v) = self.dns_port {
            config.dns_port = v;
        }
        if let Some(v) = self.serial_port {
            config.serial_port = v;
        }
        if let Some(v) = self.baud_rate {
            config.baud_rate = v;
        }
        if let Some(v) = self.credentials {
            config.credentials_path = v;
        }
        if let Some(v) = self.web_root {
            config.web_root = v;
        }
        if let Some(v) = self.radio {
            config.radio = v;
        }
        if let Some(v) = self.wifi_interface {
            config.wifi_interface = v;
        }
        if let Some(v) = self.ap_ssid {
            config.ap_ssid = v;
        }
        if let Some(v) = self.ap_password {
            config.ap_password = v;
        }
        if let Some(v) = self.ap_address {
            config.ap_address = v;
        }
        if let Some(v) = self.hostname {
            config.hostname = v;
        }
        if let Some(v) = self.default_ssid {
            config.default_ssid = v;
        }
        if let Some(v) = self.dedup_window_ms {
            config.dedup_window_ms = v;
        }
        if let Some(v) = self.idle_flush_ms {
            config.idle_flush_ms = v;
        }
        if let Some(v) = self.join_timeout_ms {
            config.join_timeout_ms = v;
        }
        if let Some(v) = self.write_pacing_ms {
            config.write_pacing_ms = v;
        }
        config
    }
}

/// Restart hook handed to the gateway for `POST /clear`.
fn restart_after_clear() {
    restart_process()
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Logging is initialised from `RUST_LOG` (default `info`).
/// 2. The configuration is assembled from defaults, file and flags.
/// 3. The network supervisor boots: join the stored network or start the
///    setup access point.
/// 4. The serial link is started.  If the port cannot be opened the bridge
///    keeps running without a device so the setup portal stays reachable.
/// 5. Captive DNS runs while setup mode is active.
/// 6. The HTTP / WebSocket gateway serves until Ctrl+C clears `running`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Cli::parse().into_bridge_config()?);

    info!(
        "preamp bridge starting: http={}, serial={}@{}, radio={}",
        config.http_bind_addr, config.serial_port, config.baud_rate, config.radio
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Wi-Fi ─────────────────────────────────────────────────────────────────
    let store = CredentialStore::new(config.credentials_path.clone());
    let stored = match store.load() {
        Ok(stored) => stored,
        Err(e) => {
            warn!("ignoring unreadable credentials: {e}");
            None
        }
    };

    let radio = build_radio(&config);
    let supervisor = Arc::new(NetworkSupervisor::new(
        radio,
        SupervisorSettings::from(config.as_ref()),
    ));
    match supervisor.boot(stored).await {
        BootOutcome::Joined { address } => info!("joined Wi-Fi; reachable at {address}"),
        BootOutcome::SetupMode => info!(
            "setup portal on '{}' at {}",
            config.ap_ssid,
            supervisor.access_point_address()
        ),
        BootOutcome::Fallback => info!(
            "setup portal on '{}' at {}; retrying stored network in the background",
            config.ap_ssid,
            supervisor.access_point_address()
        ),
    }

    // ── Device link ───────────────────────────────────────────────────────────
    let ctx = Arc::new(BridgeContext::new(&config));
    let limits = FramerLimits {
        buffer_cap: config.buffer_cap,
        retained_tail: config.retained_tail,
    };

    match serial_link::open(&config.serial_port, config.baud_rate) {
        Ok(link) => {
            let chunks = serial_link::spawn_reader(link.reader, Arc::clone(&running))
                .context("failed to start serial reader")?;
            tokio::spawn(run_reader(Arc::clone(&ctx), chunks, limits, config.idle_flush()));
            tokio::spawn(run_writer(Arc::clone(&ctx), link.writer, config.write_pacing()));
        }
        Err(e) => {
            warn!("{e}; running without a device, commands will be discarded");
            tokio::spawn(run_writer(
                Arc::clone(&ctx),
                std::io::sink(),
                config.write_pacing(),
            ));
        }
    }
    spawn_startup_sync(Arc::clone(&ctx), config.startup_sync_delay());

    // ── Captive DNS ───────────────────────────────────────────────────────────
    if supervisor.is_setup_mode_active() {
        tokio::spawn(run_dns_server(
            config.dns_port,
            Arc::clone(&supervisor),
            Arc::clone(&running),
        ));
    }

    // ── Gateway ───────────────────────────────────────────────────────────────
    let restart: RestartHook = Arc::new(restart_after_clear);
    let state = Arc::new(GatewayState {
        ctx,
        supervisor,
        store,
        config: Arc::clone(&config),
        restart,
    });
    run_server(state, running).await?;

    info!("preamp bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
