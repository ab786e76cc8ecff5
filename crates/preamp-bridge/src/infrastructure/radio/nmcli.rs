//! NetworkManager backend driven through the `nmcli` command-line tool.
//!
//! `nmcli device wifi connect` blocks until NetworkManager gives up, so a
//! join runs it on a helper thread and publishes the result as a
//! [`StationStatus`] that the supervisor polls.  The setup access point is a
//! NetworkManager hotspot connection named [`HOTSPOT_CONNECTION`].

use std::net::Ipv4Addr;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::application::{RadioError, WifiRadio};
use crate::domain::{NetworkCredentials, StationStatus};

const NMCLI: &str = "nmcli";

/// Connection profile name used for the setup hotspot.
pub const HOTSPOT_CONNECTION: &str = "preamp-setup";

/// [`WifiRadio`] on top of NetworkManager.
#[derive(Debug)]
pub struct NmcliRadio {
    interface: String,
    fallback_ap_address: Ipv4Addr,
    status: Arc<Mutex<StationStatus>>,
    ap_active: AtomicBool,
}

impl NmcliRadio {
    pub fn new(interface: &str, fallback_ap_address: Ipv4Addr) -> Self {
        Self {
            interface: interface.to_string(),
            fallback_ap_address,
            status: Arc::new(Mutex::new(StationStatus::Idle)),
            ap_active: AtomicBool::new(false),
        }
    }

    fn interface_address(&self) -> Option<String> {
        let output = run_nmcli(&["-g", "IP4.ADDRESS", "device", "show", &self.interface]).ok()?;
        if !output.status.success() {
            return None;
        }
        parse_ip4_address(&String::from_utf8_lossy(&output.stdout))
    }
}

fn run_nmcli(args: &[&str]) -> Result<Output, RadioError> {
    debug!("running {NMCLI} {}", args.join(" "));
    Command::new(NMCLI)
        .args(args)
        .output()
        .map_err(|source| RadioError::Spawn {
            program: NMCLI,
            source,
        })
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Maps `nmcli device wifi connect` error text onto a station status.
pub fn classify_connect_failure(stderr: &str) -> StationStatus {
    let text = stderr.to_ascii_lowercase();
    if text.contains("secrets were required") || text.contains("psk") || text.contains("password") {
        StationStatus::WrongPassword
    } else if text.contains("no network with ssid") || text.contains("not found") {
        StationStatus::NoApFound
    } else {
        StationStatus::ConnectFail
    }
}

/// Extracts the first address from `nmcli -g IP4.ADDRESS` output, without
/// its prefix length (`192.168.1.20/24` becomes `192.168.1.20`).
pub fn parse_ip4_address(output: &str) -> Option<String> {
    output
        .split(|c: char| c == '\n' || c == '|')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .map(|entry| entry.split('/').next().unwrap_or(entry).to_string())
}

impl WifiRadio for NmcliRadio {
    fn begin_station_join(
        &self,
        credentials: &NetworkCredentials,
        hostname: &str,
    ) -> Result<(), RadioError> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = StationStatus::Connecting;

        match run_nmcli(&["general", "hostname", hostname]) {
            Ok(output) if !output.status.success() => {
                debug!("could not set hostname: {}", stderr_text(&output))
            }
            Err(e) => debug!("could not set hostname: {e}"),
            Ok(_) => {}
        }

        let status = Arc::clone(&self.status);
        let interface = self.interface.clone();
        let ssid = credentials.ssid.clone();
        let password = credentials.password.clone();

        let spawned = std::thread::Builder::new()
            .name("preamp-nmcli-join".to_string())
            .spawn(move || {
                let mut args = vec!["device", "wifi", "connect", ssid.as_str()];
                if !password.is_empty() {
                    args.extend(["password", password.as_str()]);
                }
                args.extend(["ifname", interface.as_str()]);

                let result = match run_nmcli(&args) {
                    Ok(output) if output.status.success() => StationStatus::GotIp,
                    Ok(output) => {
                        let stderr = stderr_text(&output);
                        warn!("nmcli connect to '{ssid}' failed: {stderr}");
                        classify_connect_failure(&stderr)
                    }
                    Err(e) => {
                        warn!("{e}");
                        StationStatus::ConnectFail
                    }
                };
                *status.lock().unwrap_or_else(PoisonError::into_inner) = result;
            });

        spawned.map(|_| ()).map_err(|source| RadioError::Spawn {
            program: NMCLI,
            source,
        })
    }

    fn station_status(&self) -> StationStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn station_address(&self) -> Option<String> {
        self.interface_address()
    }

    fn start_access_point(&self, ssid: &str, password: &str) -> Result<Ipv4Addr, RadioError> {
        let output = run_nmcli(&[
            "device",
            "wifi",
            "hotspot",
            "ifname",
            &self.interface,
            "con-name",
            HOTSPOT_CONNECTION,
            "ssid",
            ssid,
            "password",
            password,
        ])?;
        if !output.status.success() {
            return Err(RadioError::Backend(stderr_text(&output)));
        }
        self.ap_active.store(true, Ordering::SeqCst);

        let address = self
            .interface_address()
            .and_then(|text| text.parse().ok())
            .unwrap_or(self.fallback_ap_address);
        info!("hotspot '{ssid}' active on {}", self.interface);
        Ok(address)
    }

    fn stop_access_point(&self) -> Result<bool, RadioError> {
        if !self.ap_active.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let output = run_nmcli(&["connection", "down", HOTSPOT_CONNECTION])?;
        if !output.status.success() {
            return Err(RadioError::Backend(stderr_text(&output)));
        }
        Ok(true)
    }

    fn access_point_active(&self) -> bool {
        self.ap_active.load(Ordering::SeqCst)
    }
}
