//! End-to-end tests over real loopback sockets.
//!
//! Each test binds the gateway on `127.0.0.1:0`, drives it with a plain
//! `TcpStream` the way a browser would, and observes the device side through
//! the shared [`BridgeContext`] and an in-memory serial sink.

use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use preamp_bridge::application::{
    run_writer, BridgeContext, NetworkSupervisor, SupervisorSettings, WifiRadio,
};
use preamp_bridge::domain::{BridgeConfig, NetworkCredentials};
use preamp_bridge::infrastructure::radio::{SimulatedOutcome, SimulatedRadio};
use preamp_bridge::infrastructure::storage::CredentialStore;
use preamp_bridge::infrastructure::{serve, GatewayState};
use preamp_core::websocket::{decode_frame, encode_client_frame, Opcode, DEFAULT_MAX_PAYLOAD};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use uuid::Uuid;

const STEP: Duration = Duration::from_secs(5);
const WS_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

// ── Fixtures ──────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Gateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    radio: Arc<SimulatedRadio>,
    restarts: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    dir: PathBuf,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Starts a gateway.  `stored` is what the credential store held at boot.
async fn start_gateway(stored: Option<NetworkCredentials>, outcome: SimulatedOutcome) -> Gateway {
    let dir = std::env::temp_dir().join(format!("preamp-it-{}", Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("web")).unwrap();
    std::fs::write(dir.join("web").join("index.html"), "<h1>preamp</h1>").unwrap();

    let config = BridgeConfig {
        http_bind_addr: "127.0.0.1:0".parse().unwrap(),
        web_root: dir.join("web"),
        credentials_path: dir.join("wifi.json"),
        join_timeout_ms: 300,
        join_poll_ms: 10,
        ..BridgeConfig::default()
    };

    let radio = Arc::new(SimulatedRadio::with_outcome(Ipv4Addr::new(192, 168, 4, 1), outcome));
    let supervisor = Arc::new(NetworkSupervisor::new(
        Arc::clone(&radio) as Arc<dyn WifiRadio>,
        SupervisorSettings::from(&config),
    ));
    supervisor.boot(stored).await;

    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&restarts);
    let state = Arc::new(GatewayState {
        ctx: Arc::new(BridgeContext::new(&config)),
        supervisor,
        store: CredentialStore::new(&config.credentials_path),
        config: Arc::new(config),
        restart: Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(listener, Arc::clone(&state), Arc::clone(&running)));

    Gateway {
        addr,
        state,
        radio,
        restarts,
        running,
        dir,
    }
}

fn joined() -> SimulatedOutcome {
    SimulatedOutcome::Join {
        address: "10.0.0.42".to_string(),
        after_polls: 0,
    }
}

/// One request per connection; returns the full response.
async fn http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    timeout(STEP, stream.read_to_end(&mut out))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8(out).unwrap()
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

/// A WebSocket client that has completed the handshake.
struct WsClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl WsClient {
    async fn connect(addr: SocketAddr) -> (Self, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /ws HTTP/1.1\r\nHost: preamp\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: {WS_KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut buf = Vec::new();
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let mut chunk = [0u8; 512];
            let n = timeout(STEP, stream.read(&mut chunk)).await.unwrap().unwrap();
            assert!(n > 0, "server closed before finishing the handshake");
            buf.extend_from_slice(&chunk[..n]);
        };
        let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
        buf.drain(..head_end);
        (Self { stream, buf }, head)
    }

    async fn send_text(&mut self, text: &str) {
        let frame = encode_client_frame(Opcode::Text, text.as_bytes(), [0x11, 0x22, 0x33, 0x44]);
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn next_text(&mut self) -> String {
        loop {
            if let Ok((frame, used)) = decode_frame(&self.buf, DEFAULT_MAX_PAYLOAD) {
                self.buf.drain(..used);
                assert_eq!(frame.opcode, Opcode::Text);
                return String::from_utf8(frame.payload).unwrap();
            }
            let mut chunk = [0u8; 512];
            let n = timeout(STEP, self.stream.read(&mut chunk))
                .await
                .expect("frame timed out")
                .unwrap();
            assert!(n > 0, "server closed the session");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ── WebSocket ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_late_joiner_receives_cached_state_then_live_lines() {
    // Arrange: the device has already reported labels and state
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;
    gw.state.ctx.handle_device_line("STATE VOL=20 SEL=2");
    gw.state.ctx.handle_device_line("SELECTOR_LABELS CD,Phono,Tuner");

    // Act
    let (mut client, head) = WsClient::connect(gw.addr).await;

    // Assert: replay order is labels, then state
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert_eq!(client.next_text().await, "SELECTOR_LABELS CD,Phono,Tuner");
    assert_eq!(client.next_text().await, "STATE VOL=20 SEL=2");

    // Act: a new device line arrives
    wait_until(|| gw.state.ctx.session_count() == 1).await;
    gw.state.ctx.handle_device_line("AMP_STATES ON,OFF");

    // Assert
    assert_eq!(client.next_text().await, "AMP_STATES ON,OFF");
}

#[tokio::test]
async fn test_websocket_command_reaches_serial_writer() {
    // Arrange
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;
    let sink = SharedSink::default();
    let written = Arc::clone(&sink.0);
    tokio::spawn(run_writer(Arc::clone(&gw.state.ctx), sink, Duration::ZERO));
    let (mut client, _) = WsClient::connect(gw.addr).await;

    // Act: shorthand is expanded, garbage is dropped
    client.send_text("hello there friend").await;
    client.send_text("  VOL 12 ").await;

    // Assert
    wait_until(|| written.lock().unwrap().as_slice() == b"SET VOL 12\r\n").await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_session() {
    // Arrange
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;
    let (mut first, _) = WsClient::connect(gw.addr).await;
    let (mut second, _) = WsClient::connect(gw.addr).await;
    wait_until(|| gw.state.ctx.session_count() == 2).await;

    // Act
    gw.state.ctx.handle_device_line("TUBE NUM=1 MIN=5 HOUR=120");

    // Assert
    assert_eq!(first.next_text().await, "TUBE NUM=1 MIN=5 HOUR=120");
    assert_eq!(second.next_text().await, "TUBE NUM=1 MIN=5 HOUR=120");
}

#[tokio::test]
async fn test_closed_session_is_unregistered() {
    // Arrange
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;
    let (client, _) = WsClient::connect(gw.addr).await;
    wait_until(|| gw.state.ctx.session_count() == 1).await;

    // Act
    drop(client);

    // Assert
    wait_until(|| gw.state.ctx.session_count() == 0).await;
}

#[tokio::test]
async fn test_websocket_refused_in_setup_mode() {
    // Arrange: nothing stored, so the bridge boots into setup mode
    let gw = start_gateway(None, joined()).await;

    // Act
    let response = http(
        gw.addr,
        &format!("GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {WS_KEY}\r\n\r\n"),
    )
    .await;

    // Assert
    assert!(response.starts_with("HTTP/1.1 403 "));
    assert_eq!(body(&response), "Setup mode");
    assert_eq!(gw.state.ctx.session_count(), 0);
}

// ── REST ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rest_reads_return_cached_lines() {
    // Arrange
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;
    gw.state.ctx.handle_device_line("STATE VOL=7");

    // Act
    let state = http(gw.addr, "GET /api/state HTTP/1.1\r\n\r\n").await;
    let labels = http(gw.addr, "GET /api/labels HTTP/1.1\r\n\r\n").await;

    // Assert
    assert!(state.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(state.contains("Cache-Control: no-store, no-cache, must-revalidate, max-age=0\r\n"));
    assert_eq!(body(&state), "STATE VOL=7");
    assert_eq!(body(&labels), "");
}

#[tokio::test]
async fn test_rest_command_is_queued() {
    // Arrange
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;

    // Act
    let ok = http(gw.addr, "POST /api/cmd HTTP/1.1\r\nContent-Length: 9\r\n\r\nGET STATE").await;
    let bad = http(gw.addr, "POST /api/cmd HTTP/1.1\r\nContent-Length: 3\r\n\r\n???").await;

    // Assert
    assert_eq!(body(&ok), "OK");
    assert!(bad.starts_with("HTTP/1.1 400 "));
    assert_eq!(body(&bad), "BAD_CMD");
    assert_eq!(gw.state.ctx.pending_commands(), vec!["GET STATE".to_string()]);
}

#[tokio::test]
async fn test_index_served_from_web_root_when_joined() {
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;

    let response = http(gw.addr, "GET /?tab=tubes HTTP/1.1\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body(&response), "<h1>preamp</h1>");
}

// ── Setup flow ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_setup_mode_serves_portal_at_root() {
    let gw = start_gateway(None, joined()).await;

    let page = http(gw.addr, "GET / HTTP/1.1\r\n\r\n").await;
    let unknown = http(gw.addr, "GET /generate_204 HTTP/1.1\r\n\r\n").await;

    assert!(page.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(body(&page).contains("action=\"/save\""));
    assert!(unknown.starts_with("HTTP/1.1 404 "));
}

#[tokio::test]
async fn test_save_persists_credentials_and_joins() {
    // Arrange
    let gw = start_gateway(None, joined()).await;
    let form = "ssid=Living+Room&password=s%26cret";

    // Act
    let response = http(
        gw.addr,
        &format!(
            "POST /save HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{form}",
            form.len()
        ),
    )
    .await;

    // Assert
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    let saved = gw.state.store.load().unwrap().unwrap();
    assert_eq!(saved, NetworkCredentials::new("Living Room", "s&cret"));
    wait_until(|| gw.state.supervisor.status_line() == "CONNECTED 10.0.0.42").await;
    assert!(!gw.state.supervisor.is_setup_mode_active());
    assert_eq!(gw.radio.last_ssid().as_deref(), Some("Living Room"));
}

#[tokio::test]
async fn test_failed_boot_join_falls_back_to_portal() {
    // Arrange: stored network rejects the password
    let gw = start_gateway(
        Some(NetworkCredentials::new("home", "wrong")),
        SimulatedOutcome::Fail(preamp_bridge::domain::StationStatus::WrongPassword),
    )
    .await;

    // Act
    let status = http(gw.addr, "GET /status HTTP/1.1\r\n\r\n").await;
    let page = http(gw.addr, "GET / HTTP/1.1\r\n\r\n").await;

    // Assert
    assert!(gw.state.supervisor.is_setup_mode_active());
    assert!(body(&status).starts_with("FAILED") || body(&status) == "CONNECTING");
    assert!(body(&page).contains("value=\"home\""));
}

#[tokio::test]
async fn test_clear_removes_credentials_and_requests_restart() {
    // Arrange
    let gw = start_gateway(Some(NetworkCredentials::new("home", "pw")), joined()).await;
    gw.state.store.save(&NetworkCredentials::new("home", "pw")).unwrap();

    // Act
    let response = http(gw.addr, "POST /clear HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;

    // Assert
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(gw.state.store.load().unwrap(), None);
    wait_until(|| gw.restarts.load(Ordering::SeqCst) == 1).await;
}
