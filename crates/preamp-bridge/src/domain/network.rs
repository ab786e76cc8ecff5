//! Wi-Fi identity types: credentials, station status, connection state.

use std::fmt;

/// An SSID / passphrase pair for joining an existing network.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub password: String,
}

impl NetworkCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// A stored record is usable only with a non-empty SSID.
    pub fn is_usable(&self) -> bool {
        !self.ssid.is_empty()
    }
}

// Never print the passphrase.
impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Raw status reported by the station radio while joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Idle,
    Connecting,
    WrongPassword,
    NoApFound,
    ConnectFail,
    GotIp,
    /// The backend could not report a status.
    Unknown,
}

impl StationStatus {
    /// Statuses after which polling further is pointless.
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            StationStatus::WrongPassword | StationStatus::NoApFound | StationStatus::ConnectFail
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            StationStatus::Idle => "IDLE",
            StationStatus::Connecting => "CONNECTING",
            StationStatus::WrongPassword => "WRONG_PASSWORD",
            StationStatus::NoApFound => "NO_AP_FOUND",
            StationStatus::ConnectFail => "CONNECT_FAIL",
            StationStatus::GotIp => "GOT_IP",
            StationStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the most recent station-mode join attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected {
        address: String,
    },
    Failed,
}

impl ConnectionState {
    /// The one-line text served by `GET /status`.
    ///
    /// ```rust
    /// use preamp_bridge::domain::ConnectionState;
    ///
    /// let state = ConnectionState::Connected { address: "10.0.0.7".into() };
    /// assert_eq!(state.status_line(), "CONNECTED 10.0.0.7");
    /// ```
    pub fn status_line(&self) -> String {
        match self {
            ConnectionState::Idle => "IDLE".to_string(),
            ConnectionState::Connecting => "CONNECTING".to_string(),
            ConnectionState::Connected { address } => format!("CONNECTED {address}"),
            ConnectionState::Failed => "FAILED".to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}
