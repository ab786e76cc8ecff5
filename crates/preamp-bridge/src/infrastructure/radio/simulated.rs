//! A fake Wi-Fi radio that never touches hardware.
//!
//! A join attempt reports `Connecting` for a configurable number of status
//! polls and then settles on the configured outcome.  The access point is a
//! flag.  Tests can change the outcome between attempts and read how many
//! joins were started.

use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::application::{RadioError, WifiRadio};
use crate::domain::{NetworkCredentials, StationStatus};

/// How the next join attempts end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedOutcome {
    /// Report `GotIp` with `address` after `after_polls` polls.
    Join { address: String, after_polls: u32 },
    /// Report the given failure status after one `Connecting` poll.
    Fail(StationStatus),
    /// Stay `Connecting` forever; the supervisor's timeout ends the attempt.
    Hang,
}

#[derive(Debug)]
struct SimState {
    outcome: SimulatedOutcome,
    status: StationStatus,
    polls_left: u32,
    address: Option<String>,
    ap_active: bool,
    join_attempts: usize,
    last_ssid: Option<String>,
}

/// In-process [`WifiRadio`].
#[derive(Debug)]
pub struct SimulatedRadio {
    ap_address: Ipv4Addr,
    state: Mutex<SimState>,
}

impl SimulatedRadio {
    /// A radio whose joins succeed on the first poll with address `127.0.0.1`.
    pub fn new(ap_address: Ipv4Addr) -> Self {
        Self::with_outcome(
            ap_address,
            SimulatedOutcome::Join {
                address: Ipv4Addr::LOCALHOST.to_string(),
                after_polls: 0,
            },
        )
    }

    pub fn with_outcome(ap_address: Ipv4Addr, outcome: SimulatedOutcome) -> Self {
        Self {
            ap_address,
            state: Mutex::new(SimState {
                outcome,
                status: StationStatus::Idle,
                polls_left: 0,
                address: None,
                ap_active: false,
                join_attempts: 0,
                last_ssid: None,
            }),
        }
    }

    /// Changes the outcome of future join attempts.
    pub fn set_outcome(&self, outcome: SimulatedOutcome) {
        self.lock().outcome = outcome;
    }

    pub fn join_attempts(&self) -> usize {
        self.lock().join_attempts
    }

    /// SSID of the most recent join attempt.
    pub fn last_ssid(&self) -> Option<String> {
        self.lock().last_ssid.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WifiRadio for SimulatedRadio {
    fn begin_station_join(
        &self,
        credentials: &NetworkCredentials,
        hostname: &str,
    ) -> Result<(), RadioError> {
        let mut state = self.lock();
        state.join_attempts += 1;
        state.last_ssid = Some(credentials.ssid.clone());
        state.status = StationStatus::Connecting;
        state.address = None;
        state.polls_left = match &state.outcome {
            SimulatedOutcome::Join { after_polls, .. } => *after_polls,
            SimulatedOutcome::Fail(_) => 1,
            SimulatedOutcome::Hang => u32::MAX,
        };
        debug!(
            "simulated join #{} to '{}' as {hostname}",
            state.join_attempts, credentials.ssid
        );
        Ok(())
    }

    fn station_status(&self) -> StationStatus {
        let mut state = self.lock();
        if state.status != StationStatus::Connecting {
            return state.status;
        }
        if state.polls_left > 0 {
            if !matches!(state.outcome, SimulatedOutcome::Hang) {
                state.polls_left -= 1;
            }
            return StationStatus::Connecting;
        }
        match state.outcome.clone() {
            SimulatedOutcome::Join { address, .. } => {
                state.address = Some(address);
                state.status = StationStatus::GotIp;
            }
            SimulatedOutcome::Fail(status) => state.status = status,
            SimulatedOutcome::Hang => {}
        }
        state.status
    }

    fn station_address(&self) -> Option<String> {
        self.lock().address.clone()
    }

    fn start_access_point(&self, ssid: &str, _password: &str) -> Result<Ipv4Addr, RadioError> {
        self.lock().ap_active = true;
        debug!("simulated access point '{ssid}' up");
        Ok(self.ap_address)
    }

    fn stop_access_point(&self) -> Result<bool, RadioError> {
        let mut state = self.lock();
        let was_active = state.ap_active;
        state.ap_active = false;
        Ok(was_active)
    }

    fn access_point_active(&self) -> bool {
        self.lock().ap_active
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
