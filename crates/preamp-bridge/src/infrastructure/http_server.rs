//! HTTP gateway: accept loop, request parsing, routing and responses.
//!
//! Every connection carries exactly one request.  The response always ends
//! with `Connection: close` and the socket is shut down afterwards, except
//! for WebSocket upgrades, which hand the connection to [`run_ws_session`].
//!
//! # Routes
//!
//! | Method | Path                         | Response                              |
//! |--------|------------------------------|---------------------------------------|
//! | any    | `Upgrade: websocket`         | 101 and a session; 403 in setup mode  |
//! | POST   | `/save`                      | setup page; saves and joins           |
//! | POST   | `/api/cmd`                   | `OK` or 400 `BAD_CMD`                 |
//! | POST   | `/retry`                     | setup page; retries stored network    |
//! | POST   | `/clear`                     | notice; clears and restarts           |
//! | GET    | `/status`                    | `IDLE` / `CONNECTING` / ...           |
//! | GET    | `/api/state` and friends     | cached device lines                   |
//! | GET    | `/`, `/index.html`           | setup page or `index.html`            |
//! | GET    | `/app.js`, `/style.css`      | static assets                         |
//!
//! Any other method gets 405 and any other path 404.
//!
//! # Benign disconnects
//!
//! Phones reset connections all the time when the browser is backgrounded.
//! [`is_benign_disconnect`] recognises those errors; they are logged at
//! `debug` and otherwise ignored.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use preamp_core::command::normalize_command;
use preamp_core::websocket::accept_key;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::{BridgeContext, NetworkSupervisor};
use crate::domain::{BridgeConfig, NetworkCredentials};
use crate::infrastructure::setup_page::{render_setup_page, CLEARED_PAGE};
use crate::infrastructure::storage::CredentialStore;
use crate::infrastructure::ws_session::run_ws_session;

/// Longest request or header line accepted.
const MAX_LINE_BYTES: u64 = 8 * 1024;
/// Most header lines read before giving up on a request.
const MAX_HEADER_LINES: usize = 64;
/// Largest POST body accepted.
const MAX_BODY_BYTES: usize = 16 * 1024;
/// Pause between answering `POST /clear` and restarting.
const RESTART_DELAY: Duration = Duration::from_millis(200);

const CACHE_HEADERS: &str = "Cache-Control: no-store, no-cache, must-revalidate, max-age=0\r\n\
                             Pragma: no-cache\r\n\
                             Expires: 0\r\n";

/// Called after `POST /clear` has been answered.
pub type RestartHook = Arc<dyn Fn() + Send + Sync>;

/// Everything a request handler can touch.
pub struct GatewayState {
    pub ctx: Arc<BridgeContext>,
    pub supervisor: Arc<NetworkSupervisor>,
    pub store: CredentialStore,
    pub config: Arc<BridgeConfig>,
    pub restart: RestartHook,
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Binds `config.http_bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, or no
/// permission to bind port 80).
pub async fn run_server(state: Arc<GatewayState>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let addr = state.config.http_bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;

    info!("HTTP / WebSocket gateway listening on {addr}");
    serve(listener, state, running).await;
    Ok(())
}

/// Accepts connections on an already bound listener until `running` is
/// cleared.  Each connection is handled on its own task.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping HTTP accept loop");
            break;
        }

        // Short timeout so the running flag is rechecked regularly.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_connection(stream, peer, state).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Handles one connection and logs how it ended.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, state: Arc<GatewayState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = run_connection(stream, peer, state).await {
        match e.downcast_ref::<io::Error>() {
            Some(io_err) if is_benign_disconnect(io_err) => {
                debug!("connection {peer}: peer went away: {io_err}")
            }
            _ => warn!("connection {peer}: {e:#}"),
        }
    }
}

/// One parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Path with any query string and fragment removed.
    pub path: String,
    /// Header names are lowercased; values are trimmed.
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }
}

async fn run_connection<S>(stream: S, peer: SocketAddr, state: Arc<GatewayState>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = BufReader::new(stream);
    let Some(request) = read_request(&mut conn).await? else {
        return Ok(());
    };
    debug!("HTTP {} {} from {peer}", request.method, request.path);

    if request.is_websocket_upgrade() {
        return upgrade(conn, peer, &request, &state).await;
    }

    let chunk = state.config.http_chunk_size;
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/save") => {
            let form = parse_form(&read_body(&mut conn, &request).await?);
            let ssid = form.get("ssid").cloned().unwrap_or_default();
            if ssid.is_empty() {
                return send_text(&mut conn, 400, "Missing SSID", chunk).await;
            }
            let password = form.get("password").cloned().unwrap_or_default();
            let credentials = NetworkCredentials::new(ssid, password);
            if let Err(e) = state.store.save(&credentials) {
                warn!("failed to save Wi-Fi credentials: {e}");
            }
            let page = render_setup_page(&credentials.ssid);
            send_response(&mut conn, 200, "text/html", page.as_bytes(), chunk).await?;
            state.supervisor.start_background_join(credentials);
            Ok(())
        }
        ("POST", "/api/cmd") => {
            let body = read_body(&mut conn, &request).await?;
            let line = String::from_utf8(body).unwrap_or_default();
            match normalize_command(&line) {
                Some(command) => {
                    state.ctx.submit_command(&command);
                    send_text(&mut conn, 200, "OK", chunk).await
                }
                None => send_text(&mut conn, 400, "BAD_CMD", chunk).await,
            }
        }
        ("POST", "/retry") => {
            let page = render_setup_page(&state.supervisor.setup_page_ssid());
            send_response(&mut conn, 200, "text/html", page.as_bytes(), chunk).await?;
            match state.store.load() {
                Ok(Some(credentials)) => {
                    state.supervisor.start_background_join(credentials);
                }
                Ok(None) => debug!("retry requested without stored credentials"),
                Err(e) => warn!("cannot retry: {e}"),
            }
            Ok(())
        }
        ("POST", "/clear") => {
            if let Err(e) = state.store.clear() {
                warn!("failed to clear Wi-Fi credentials: {e}");
            }
            let result =
                send_response(&mut conn, 200, "text/html", CLEARED_PAGE.as_bytes(), chunk).await;
            tokio::time::sleep(RESTART_DELAY).await;
            (state.restart)();
            result
        }
        ("GET", path) => serve_get(&mut conn, path, &state).await,
        _ => send_text(&mut conn, 405, "Method Not Allowed", chunk).await,
    }
}

async fn serve_get<W>(conn: &mut W, path: &str, state: &GatewayState) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let chunk = state.config.http_chunk_size;
    let web_root = &state.config.web_root;
    match path {
        "/status" => send_text(conn, 200, &state.supervisor.status_line(), chunk).await,
        "/api/state" => send_text(conn, 200, &state.ctx.state_line(), chunk).await,
        "/api/labels" => send_text(conn, 200, &state.ctx.labels_line(), chunk).await,
        "/api/amp_states" => send_text(conn, 200, &state.ctx.amp_states_line(), chunk).await,
        "/api/tubes" => send_text(conn, 200, &state.ctx.tubes_text(), chunk).await,
        "/" | "/index.html" => {
            if state.supervisor.is_setup_mode_active() {
                debug!("serving setup page");
                let page = render_setup_page(&state.supervisor.setup_page_ssid());
                send_response(conn, 200, "text/html", page.as_bytes(), chunk).await
            } else {
                send_file(conn, &web_root.join("index.html"), "text/html", chunk).await
            }
        }
        "/app.js" => {
            send_file(conn, &web_root.join("app.js"), "application/javascript", chunk).await
        }
        "/style.css" => send_file(conn, &web_root.join("style.css"), "text/css", chunk).await,
        _ => send_text(conn, 404, "Not Found", chunk).await,
    }
}

/// Completes the WebSocket handshake and runs the session.
async fn upgrade<S>(
    mut conn: BufReader<S>,
    peer: SocketAddr,
    request: &Request,
    state: &GatewayState,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if state.supervisor.is_setup_mode_active() {
        return send_text(&mut conn, 403, "Setup mode", state.config.http_chunk_size).await;
    }
    let Some(key) = request.header("sec-websocket-key") else {
        debug!("WebSocket upgrade from {peer} without key; closing");
        let _ = conn.shutdown().await;
        return Ok(());
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    conn.write_all(response.as_bytes()).await?;
    conn.flush().await?;
    debug!("WebSocket upgrade accepted for {}", request.path);

    run_ws_session(
        conn,
        peer,
        Arc::clone(&state.ctx),
        state.config.max_frame_payload,
    )
    .await;
    Ok(())
}

// ── Request parsing ───────────────────────────────────────────────────────────

/// Reads the request line and headers.
///
/// Returns `Ok(None)` when the peer closed the connection before sending a
/// request line.  A request line that cannot be parsed yields an empty method,
/// which routes to 405.
pub async fn read_request<R>(reader: &mut R) -> io::Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(request_line) = read_line(reader).await? else {
        return Ok(None);
    };
    let (method, path) = parse_request_line(&request_line);

    let mut headers = HashMap::new();
    for _ in 0..MAX_HEADER_LINES {
        let line = match read_line(reader).await? {
            Some(line) if !line.is_empty() => line,
            _ => {
                return Ok(Some(Request {
                    method,
                    path,
                    headers,
                }))
            }
        };
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Err(io::Error::new(ErrorKind::InvalidData, "too many header lines"))
}

/// Reads one line without its terminator.  `None` means end of stream.
async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    if !raw.ends_with(b"\n") && n as u64 == MAX_LINE_BYTES {
        return Err(io::Error::new(ErrorKind::InvalidData, "request line too long"));
    }
    let text = String::from_utf8_lossy(&raw);
    Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
}

/// Splits `GET /path?query HTTP/1.1` into method and bare path.
pub fn parse_request_line(line: &str) -> (String, String) {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => {
            let path = target
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string();
            (method.to_string(), path)
        }
        _ => (String::new(), String::new()),
    }
}

async fn read_body<R>(reader: &mut R, request: &Request) -> anyhow::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let length = request.content_length();
    if length > MAX_BODY_BYTES {
        anyhow::bail!("request body of {length} bytes exceeds {MAX_BODY_BYTES}");
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Decodes an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    text.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (url_decode(key), url_decode(value)))
        .collect()
}

/// Form URL decoding: `+` becomes a space, `%XX` becomes the byte `XX`.
/// Malformed escapes are kept literally.
pub fn url_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ── Responses ─────────────────────────────────────────────────────────────────

pub fn status_text(code: u16) -> &'static str {
    match code {
        101 => "Switching Protocols",
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "OK",
    }
}

fn response_head(code: u16, content_type: &str, length: u64) -> String {
    format!(
        "HTTP/1.1 {code} {}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {length}\r\n\
         {CACHE_HEADERS}\
         Connection: close\r\n\r\n",
        status_text(code)
    )
}

async fn send_text<W>(conn: &mut W, code: u16, body: &str, chunk: usize) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_response(conn, code, "text/plain", body.as_bytes(), chunk).await
}

/// Writes a full response, the body in pieces of at most `chunk` bytes, then
/// shuts the connection down.
pub async fn send_response<W>(
    conn: &mut W,
    code: u16,
    content_type: &str,
    body: &[u8],
    chunk: usize,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    conn.write_all(response_head(code, content_type, body.len() as u64).as_bytes())
        .await?;
    for piece in body.chunks(chunk.max(1)) {
        conn.write_all(piece).await?;
    }
    conn.flush().await?;
    let _ = conn.shutdown().await;
    Ok(())
}

/// Streams a file from disk; a missing file is answered with 404.
async fn send_file<W>(conn: &mut W, path: &Path, content_type: &str, chunk: usize) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("cannot open {}: {e}", path.display());
            return send_text(conn, 404, "Not Found", chunk).await;
        }
    };
    let length = file
        .metadata()
        .await
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();

    conn.write_all(response_head(200, content_type, length).as_bytes())
        .await?;
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        if n == 0 {
            break;
        }
        conn.write_all(&buf[..n]).await?;
    }
    conn.flush().await?;
    let _ = conn.shutdown().await;
    Ok(())
}

/// Whether `err` is a peer reset or close that needs no attention.
pub fn is_benign_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
    ) || matches!(err.raw_os_error(), Some(32 | 54 | 104 | 128))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    use tokio::io::duplex;
    use uuid::Uuid;

    use super::*;
    use crate::application::SupervisorSettings;
    use crate::infrastructure::radio::SimulatedRadio;

    struct Harness {
        state: Arc<GatewayState>,
        radio: Arc<SimulatedRadio>,
        restarts: Arc<AtomicUsize>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn harness(setup_mode: bool) -> Harness {
        let dir = std::env::temp_dir().join(format!("preamp-http-{}", Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("web")).unwrap();
        let config = BridgeConfig {
            web_root: dir.join("web"),
            credentials_path: dir.join("wifi.json"),
            http_chunk_size: 16,
            ..BridgeConfig::default()
        };
        let radio = Arc::new(SimulatedRadio::new(Ipv4Addr::new(192, 168, 4, 1)));
        let supervisor = Arc::new(NetworkSupervisor::new(
            Arc::clone(&radio) as Arc<dyn crate::application::WifiRadio>,
            SupervisorSettings::from(&config),
        ));
        let stored = (!setup_mode).then(|| NetworkCredentials::new("home", "pw"));
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
        Harness {
            state,
            radio,
            restarts,
            dir,
        }
    }

    /// Sends `request` and returns everything the server wrote.
    async fn exchange(state: &Arc<GatewayState>, request: &str) -> String {
        let (mut client, server) = duplex(64 * 1024);
        let handler = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:40000".parse().unwrap(),
            Arc::clone(state),
        ));
        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        handler.await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn body(response: &str) -> &str {
        response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
    }

    #[tokio::test]
    async fn test_status_reports_connected_address() {
        // Arrange
        let h = harness(false).await;

        // Act
        let response = exchange(&h.state, "GET /status HTTP/1.1\r\nHost: x\r\n\r\n").await;

        // Assert
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/plain\r\n"));
        assert!(response.contains("Cache-Control: no-store, no-cache, must-revalidate, max-age=0\r\n"));
        assert!(response.contains("Pragma: no-cache\r\n"));
        assert!(response.contains("Expires: 0\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert_eq!(body(&response), "CONNECTED 127.0.0.1");
    }

    #[tokio::test]
    async fn test_api_reads_return_cached_lines() {
        let h = harness(false).await;
        h.state.ctx.handle_device_line("STATE VOL=20 BAL=0");
        h.state.ctx.handle_device_line("TUBE NUM=2 MIN=1 HOUR=3");

        let state = exchange(&h.state, "GET /api/state HTTP/1.1\r\n\r\n").await;
        let labels = exchange(&h.state, "GET /api/labels HTTP/1.1\r\n\r\n").await;
        let tubes = exchange(&h.state, "GET /api/tubes HTTP/1.1\r\n\r\n").await;

        assert_eq!(body(&state), "STATE VOL=20 BAL=0");
        assert!(labels.contains("Content-Length: 0\r\n"));
        assert_eq!(body(&tubes), "TUBE NUM=2 MIN=1 HOUR=3");
    }

    #[tokio::test]
    async fn test_api_cmd_accepts_shorthand_and_rejects_garbage() {
        let h = harness(false).await;

        let ok = exchange(&h.state, "POST /api/cmd HTTP/1.1\r\nContent-Length: 5\r\n\r\nVOL 5").await;
        let bad = exchange(&h.state, "POST /api/cmd HTTP/1.1\r\nContent-Length: 4\r\n\r\nnope").await;

        assert_eq!(body(&ok), "OK");
        assert!(bad.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(body(&bad), "BAD_CMD");
        assert_eq!(h.state.ctx.pending_commands(), vec!["SET VOL 5"]);
    }

    #[tokio::test]
    async fn test_api_cmd_rejects_bare_verb() {
        let h = harness(false).await;

        let bare = exchange(&h.state, "POST /api/cmd HTTP/1.1\r\nContent-Length: 3\r\n\r\nGET").await;

        assert!(bare.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(body(&bare), "BAD_CMD");
        assert!(h.state.ctx.pending_commands().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_and_malformed_line_get_405() {
        let h = harness(false).await;

        let put = exchange(&h.state, "PUT /status HTTP/1.1\r\n\r\n").await;
        let junk = exchange(&h.state, "garbage\r\n\r\n").await;

        assert!(put.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(junk.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[tokio::test]
    async fn test_unknown_path_gets_404() {
        let h = harness(false).await;
        let response = exchange(&h.state, "GET /missing HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(body(&response), "Not Found");
    }

    #[tokio::test]
    async fn test_query_and_fragment_are_ignored_for_routing() {
        let h = harness(false).await;
        let response = exchange(&h.state, "GET /status?t=123#top HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn test_index_serves_setup_page_in_setup_mode() {
        let h = harness(true).await;

        let response = exchange(&h.state, "GET / HTTP/1.1\r\n\r\n").await;

        assert!(response.contains("Content-Type: text/html\r\n"));
        assert!(body(&response).contains("Wi-Fi Setup"));
    }

    #[tokio::test]
    async fn test_index_serves_web_root_file_when_connected() {
        // Arrange: a body longer than the 16-byte chunk size
        let h = harness(false).await;
        let html = "<html><body>preamp control</body></html>";
        std::fs::write(h.state.config.web_root.join("index.html"), html).unwrap();

        // Act
        let response = exchange(&h.state, "GET /index.html HTTP/1.1\r\n\r\n").await;

        // Assert
        assert!(response.contains(&format!("Content-Length: {}\r\n", html.len())));
        assert_eq!(body(&response), html);
    }

    #[tokio::test]
    async fn test_static_assets_have_content_types() {
        let h = harness(false).await;
        std::fs::write(h.state.config.web_root.join("app.js"), "console.log(1);").unwrap();
        std::fs::write(h.state.config.web_root.join("style.css"), "body{}").unwrap();

        let js = exchange(&h.state, "GET /app.js HTTP/1.1\r\n\r\n").await;
        let css = exchange(&h.state, "GET /style.css HTTP/1.1\r\n\r\n").await;

        assert!(js.contains("Content-Type: application/javascript\r\n"));
        assert!(css.contains("Content-Type: text/css\r\n"));
        assert_eq!(body(&css), "body{}");
    }

    #[tokio::test]
    async fn test_missing_static_file_gets_404() {
        let h = harness(false).await;
        let response = exchange(&h.state, "GET /app.js HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_websocket_upgrade_rejected_in_setup_mode() {
        let h = harness(true).await;

        let response = exchange(
            &h.state,
            "GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert_eq!(body(&response), "Setup mode");
        assert_eq!(h.state.ctx.session_count(), 0);
    }

    #[tokio::test]
    async fn test_websocket_upgrade_without_key_closes_silently() {
        let h = harness(false).await;
        let response = exchange(&h.state, "GET /ws HTTP/1.1\r\nUpgrade: WebSocket\r\n\r\n").await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_websocket_upgrade_returns_accept_key() {
        // Arrange
        let h = harness(false).await;
        let (mut client, server) = duplex(4096);
        let handler = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:40001".parse().unwrap(),
            Arc::clone(&h.state),
        ));

        // Act
        client
            .write_all(
                b"GET /ws HTTP/1.1\r\nupgrade: websocket\r\nsec-websocket-key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();
        let mut head = vec![0u8; 512];
        let n = client.read(&mut head).await.unwrap();
        let head = String::from_utf8_lossy(&head[..n]).to_string();
        drop(client);
        handler.await.unwrap();

        // Assert
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn test_save_persists_credentials_and_starts_join() {
        // Arrange
        let h = harness(true).await;
        let form = "ssid=My+Net&password=p%40ss";
        let request = format!(
            "POST /save HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{form}",
            form.len()
        );

        // Act
        let response = exchange(&h.state, &request).await;
        for _ in 0..100 {
            if h.state.supervisor.state().is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Assert
        assert!(body(&response).contains(r#"value="My Net""#));
        assert_eq!(
            h.state.store.load().unwrap(),
            Some(NetworkCredentials::new("My Net", "p@ss"))
        );
        assert_eq!(h.radio.last_ssid().as_deref(), Some("My Net"));
        assert!(h.state.supervisor.state().is_connected());
        assert!(!h.state.supervisor.is_setup_mode_active());
    }

    #[tokio::test]
    async fn test_save_without_ssid_is_rejected() {
        let h = harness(true).await;

        let response = exchange(
            &h.state,
            "POST /save HTTP/1.1\r\nContent-Length: 11\r\n\r\npassword=x1",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(body(&response), "Missing SSID");
        assert_eq!(h.state.store.load().unwrap(), None);
        assert_eq!(h.radio.join_attempts(), 0);
    }

    #[tokio::test]
    async fn test_retry_uses_stored_credentials() {
        let h = harness(true).await;
        h.state.store.save(&NetworkCredentials::new("attic", "pw")).unwrap();

        let response = exchange(&h.state, "POST /retry HTTP/1.1\r\n\r\n").await;
        for _ in 0..100 {
            if h.radio.join_attempts() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(body(&response).contains("Try Existing Credentials"));
        assert_eq!(h.radio.last_ssid().as_deref(), Some("attic"));
    }

    #[tokio::test]
    async fn test_retry_without_stored_credentials_only_serves_page() {
        let h = harness(true).await;

        let response = exchange(&h.state, "POST /retry HTTP/1.1\r\n\r\n").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(h.radio.join_attempts(), 0);
    }

    #[tokio::test]
    async fn test_clear_removes_credentials_and_restarts() {
        let h = harness(false).await;
        h.state.store.save(&NetworkCredentials::new("home", "pw")).unwrap();

        let response = exchange(&h.state, "POST /clear HTTP/1.1\r\n\r\n").await;

        assert_eq!(body(&response), CLEARED_PAGE);
        assert_eq!(h.state.store.load().unwrap(), None);
        assert_eq!(h.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_connection_is_closed_without_response() {
        let h = harness(false).await;
        assert!(exchange(&h.state, "").await.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_lowercases_header_names() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"GET /api/state?x=1 HTTP/1.1\r\nX-Custom:  Value \r\n\r\n")
            .build();
        let mut reader = BufReader::new(&mut reader);

        let request = read_request(&mut reader).await.unwrap().unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/api/state");
        assert_eq!(request.header("x-custom"), Some("Value"));
    }

    #[test]
    fn test_parse_request_line_variants() {
        assert_eq!(
            parse_request_line("POST /save HTTP/1.1"),
            ("POST".to_string(), "/save".to_string())
        );
        assert_eq!(parse_request_line("GET"), (String::new(), String::new()));
        assert_eq!(parse_request_line("GET /#frag"), ("GET".to_string(), "/".to_string()));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("My+Net"), "My Net");
        assert_eq!(url_decode("p%40ss%21"), "p@ss!");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
    }

    #[test]
    fn test_parse_form_skips_pairs_without_equals() {
        let form = parse_form(b"ssid=home&flag&password=");
        assert_eq!(form.get("ssid").map(String::as_str), Some("home"));
        assert_eq!(form.get("password").map(String::as_str), Some(""));
        assert!(!form.contains_key("flag"));
    }

    #[test]
    fn test_benign_disconnects() {
        assert!(is_benign_disconnect(&io::Error::from(ErrorKind::ConnectionReset)));
        assert!(is_benign_disconnect(&io::Error::from(ErrorKind::BrokenPipe)));
        assert!(is_benign_disconnect(&io::Error::from_raw_os_error(104)));
        assert!(!is_benign_disconnect(&io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(403), "Forbidden");
        assert_eq!(status_text(405), "Method Not Allowed");
    }
}
