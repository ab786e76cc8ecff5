//! Captive-portal DNS responder.
//!
//! While the bridge hosts its setup access point, every A (or ANY) query is
//! answered with the access point's own address so phones open the setup
//! page.  The responder stops by itself once setup mode ends.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use preamp_core::dns::build_captive_response;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::NetworkSupervisor;

/// Binds UDP `port` on all interfaces and serves until setup mode ends or
/// `running` is cleared.  A bind failure disables the responder with a
/// warning; it never stops the bridge.
pub async fn run_dns_server(port: u16, supervisor: Arc<NetworkSupervisor>, running: Arc<AtomicBool>) {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = match UdpSocket::bind(addr).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("captive DNS disabled: cannot bind {addr}: {e}");
            return;
        }
    };
    info!("captive DNS listening on {addr}");
    serve_dns(socket, supervisor, running).await;
}

/// Answers queries on an already bound socket.
pub async fn serve_dns(socket: UdpSocket, supervisor: Arc<NetworkSupervisor>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 512];

    while running.load(Ordering::Relaxed) && supervisor.is_setup_mode_active() {
        let (len, src) = match timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                debug!("captive DNS recv error: {e}");
                continue;
            }
            Err(_) => continue,
        };

        let Some(response) = build_captive_response(&buf[..len], supervisor.access_point_address()) else {
            debug!("captive DNS: ignoring unsupported query from {src}");
            continue;
        };
        if let Err(e) = socket.send_to(&response, src).await {
            debug!("captive DNS send to {src} failed: {e}");
        }
    }
    info!("captive DNS stopped");
}
