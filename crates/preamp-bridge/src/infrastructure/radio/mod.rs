//! Wi-Fi radio backends implementing [`WifiRadio`].
//!
//! - [`SimulatedRadio`]: in-process fake; the default on development hosts and
//!   the backend used by the integration tests.
//! - `NmcliRadio`: NetworkManager through the `nmcli` tool (Linux only).

use std::sync::Arc;

use tracing::info;

use crate::application::WifiRadio;
use crate::domain::{BridgeConfig, RadioBackend};

#[cfg(target_os = "linux")]
pub mod nmcli;
pub mod simulated;

#[cfg(target_os = "linux")]
pub use nmcli::NmcliRadio;
pub use simulated::{SimulatedOutcome, SimulatedRadio};

/// Builds the radio selected in `config`.
///
/// Asking for `nmcli` on a platform without NetworkManager falls back to the
/// simulated radio with a warning.
pub fn build_radio(config: &BridgeConfig) -> Arc<dyn WifiRadio> {
    match config.radio {
        RadioBackend::Simulated => {
            info!("using simulated Wi-Fi radio");
            Arc::new(SimulatedRadio::new(config.ap_address))
        }
        #[cfg(target_os = "linux")]
        RadioBackend::Nmcli => {
            info!("using nmcli Wi-Fi radio on {}", config.wifi_interface);
            Arc::new(NmcliRadio::new(&config.wifi_interface, config.ap_address))
        }
        #[cfg(not(target_os = "linux"))]
        RadioBackend::Nmcli => {
            tracing::warn!("nmcli radio is only available on Linux; using simulated radio");
            Arc::new(SimulatedRadio::new(config.ap_address))
        }
    }
}
