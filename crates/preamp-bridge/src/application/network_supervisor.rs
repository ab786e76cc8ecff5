//! Station / access-point state machine.
//!
//! The bridge either joins an existing Wi-Fi network ("station mode") or hosts
//! its own access point with a captive setup page ("setup mode").
//!
//! ```text
//!            join()                 GOT_IP
//!   Idle ───────────► Connecting ───────────► Connected{address}
//!                         │
//!                         │ terminal status or timeout
//!                         ▼
//!                       Failed
//! ```
//!
//! # Boot policy
//!
//! - No stored credentials: go straight to setup mode without trying to join.
//! - Stored credentials: try to join.  On failure, bring up the access point
//!   and start one background join with the same credentials, so the device
//!   keeps trying while the setup page is reachable.
//!
//! Whenever a join succeeds the access point is shut down and setup mode ends.
//!
//! The connection state and the "background join running" flag live under one
//! mutex.  A background join claims the flag and switches to `Connecting` in
//! one critical section, and releases the flag in the same critical section
//! that stores its final state.
//!
//! The radio itself sits behind the [`WifiRadio`] trait; implementations live
//! in `infrastructure::radio`.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::{BridgeConfig, ConnectionState, NetworkCredentials, StationStatus};

/// Errors reported by a Wi-Fi backend.
#[derive(Debug, Error)]
pub enum RadioError {
    /// The backend command could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The backend ran but reported failure.
    #[error("radio backend error: {0}")]
    Backend(String),
}

/// The Wi-Fi hardware as seen by the supervisor.
///
/// Methods must return promptly: `begin_station_join` only starts an attempt,
/// and progress is observed through `station_status`.
#[cfg_attr(test, mockall::automock)]
pub trait WifiRadio: Send + Sync {
    /// Starts joining `credentials.ssid`.
    fn begin_station_join(
        &self,
        credentials: &NetworkCredentials,
        hostname: &str,
    ) -> Result<(), RadioError>;

    /// Current station status.
    fn station_status(&self) -> StationStatus;

    /// The station's IPv4 address once connected.
    fn station_address(&self) -> Option<String>;

    /// Brings up the setup access point; returns the address it serves on.
    fn start_access_point(&self, ssid: &str, password: &str) -> Result<Ipv4Addr, RadioError>;

    /// Shuts the access point down.  Returns whether it had been active.
    fn stop_access_point(&self) -> Result<bool, RadioError>;

    fn access_point_active(&self) -> bool;
}

/// How boot ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// Joined the stored network.
    Joined { address: String },
    /// No usable credentials; serving the setup access point.
    SetupMode,
    /// Stored credentials failed; serving the access point and retrying.
    Fallback,
}

/// Supervisor settings taken from [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub join_timeout: Duration,
    pub poll_interval: Duration,
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_address: Ipv4Addr,
    pub hostname: String,
    /// SSID shown on the setup page when nothing is stored.
    pub placeholder_ssid: String,
}

impl From<&BridgeConfig> for SupervisorSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            join_timeout: config.join_timeout(),
            poll_interval: config.join_poll_interval(),
            ap_ssid: config.ap_ssid.clone(),
            ap_password: config.ap_password.clone(),
            ap_address: config.ap_address,
            hostname: config.hostname.clone(),
            placeholder_ssid: config.default_ssid.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct JoinTracker {
    state: ConnectionState,
    in_flight: bool,
}

/// Owns the connection state and setup-mode flag.
pub struct NetworkSupervisor {
    radio: Arc<dyn WifiRadio>,
    settings: SupervisorSettings,
    tracker: Mutex<JoinTracker>,
    setup_mode: AtomicBool,
    setup_ssid: Mutex<String>,
    ap_address: Mutex<Option<Ipv4Addr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NetworkSupervisor {
    pub fn new(radio: Arc<dyn WifiRadio>, settings: SupervisorSettings) -> Self {
        let placeholder = settings.placeholder_ssid.clone();
        Self {
            radio,
            settings,
            tracker: Mutex::new(JoinTracker::default()),
            setup_mode: AtomicBool::new(false),
            setup_ssid: Mutex::new(placeholder),
            ap_address: Mutex::new(None),
        }
    }

    /// Applies the boot policy described in the module docs.
    pub async fn boot(self: &Arc<Self>, stored: Option<NetworkCredentials>) -> BootOutcome {
        let Some(credentials) = stored.filter(NetworkCredentials::is_usable) else {
            info!("no stored Wi-Fi credentials; entering setup mode");
            self.enter_setup_mode();
            return BootOutcome::SetupMode;
        };

        *lock(&self.setup_ssid) = credentials.ssid.clone();
        match self.join(&credentials).await {
            ConnectionState::Connected { address } => BootOutcome::Joined { address },
            _ => {
                warn!("Wi-Fi not connected; falling back to access point");
                self.enter_setup_mode();
                self.start_background_join(credentials);
                BootOutcome::Fallback
            }
        }
    }

    /// Runs one join attempt to completion and returns the final state.
    pub async fn join(&self, credentials: &NetworkCredentials) -> ConnectionState {
        self.set_state(ConnectionState::Connecting);
        self.attempt(credentials, false).await
    }

    /// The join loop.  `background` attempts release the in-flight flag
    /// together with their final state.
    async fn attempt(&self, credentials: &NetworkCredentials, background: bool) -> ConnectionState {
        info!("connecting to Wi-Fi '{}'", credentials.ssid);

        if let Err(e) = self
            .radio
            .begin_station_join(credentials, &self.settings.hostname)
        {
            warn!("Wi-Fi join could not start: {e}");
            return self.finish(ConnectionState::Failed, background);
        }

        let started = Instant::now();
        loop {
            let status = self.radio.station_status();
            if status == StationStatus::GotIp {
                let address = self.radio.station_address().unwrap_or_default();
                info!("connected, IP: {address}");
                let state = self.finish(ConnectionState::Connected { address }, background);
                self.leave_setup_mode();
                return state;
            }
            if status.is_terminal_failure() {
                warn!("Wi-Fi connect failed status={status}");
                return self.finish(ConnectionState::Failed, background);
            }
            if started.elapsed() >= self.settings.join_timeout {
                warn!("Wi-Fi connect timeout status={status}");
                return self.finish(ConnectionState::Failed, background);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Starts a join attempt in the background.
    ///
    /// The state switches to `Connecting` immediately.  Returns `false` when
    /// an attempt is already running; that attempt keeps its own credentials
    /// and the state is left alone.
    pub fn start_background_join(self: &Arc<Self>, credentials: NetworkCredentials) -> bool {
        {
            let mut tracker = lock(&self.tracker);
            if tracker.in_flight {
                info!("Wi-Fi join already in progress");
                return false;
            }
            tracker.in_flight = true;
            tracker.state = ConnectionState::Connecting;
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.attempt(&credentials, true).await;
        });
        true
    }

    /// Setup mode counts only while the access point is actually up.
    pub fn is_setup_mode_active(&self) -> bool {
        self.setup_mode.load(Ordering::SeqCst) && self.radio.access_point_active()
    }

    pub fn is_join_in_flight(&self) -> bool {
        lock(&self.tracker).in_flight
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.tracker).state.clone()
    }

    pub fn status_line(&self) -> String {
        lock(&self.tracker).state.status_line()
    }

    /// SSID pre-filled on the setup page.
    pub fn setup_page_ssid(&self) -> String {
        lock(&self.setup_ssid).clone()
    }

    /// Address answered by the captive DNS responder.
    pub fn access_point_address(&self) -> Ipv4Addr {
        lock(&self.ap_address).unwrap_or(self.settings.ap_address)
    }

    fn set_state(&self, state: ConnectionState) {
        lock(&self.tracker).state = state;
    }

    fn finish(&self, state: ConnectionState, release: bool) -> ConnectionState {
        let mut tracker = lock(&self.tracker);
        tracker.state = state.clone();
        if release {
            tracker.in_flight = false;
        }
        state
    }

    fn enter_setup_mode(&self) {
        self.setup_mode.store(true, Ordering::SeqCst);
        match self
            .radio
            .start_access_point(&self.settings.ap_ssid, &self.settings.ap_password)
        {
            Ok(address) => {
                *lock(&self.ap_address) = Some(address);
                info!("AP mode up: {} IP: {address}", self.settings.ap_ssid);
            }
            Err(e) => warn!("failed to start access point: {e}"),
        }
    }

    fn leave_setup_mode(&self) {
        self.setup_mode.store(false, Ordering::SeqCst);
        match self.radio.stop_access_point() {
            Ok(true) => info!("AP disabled after station connect"),
            Ok(false) => {}
            Err(e) => warn!("failed to stop access point: {e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
