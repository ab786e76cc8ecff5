//! WebSocket session lifecycle after a successful upgrade.
//!
//! Each session runs two halves:
//!
//! - **Reader** (this task): accumulates bytes from the browser, decodes
//!   frames, submits text commands, answers pings and watches for close.
//! - **Writer** (spawned task): drains the session's outbound queue onto the
//!   socket.  The queue is fed by replay, broadcasts and pong replies.
//!
//! ```text
//!  browser ──frames──► read_inbound ──► BridgeContext::submit_command
//!                           │ ping
//!                           ▼
//!  browser ◄──frames── write_outbound ◄── outbound queue ◄── broadcast / replay
//! ```
//!
//! The session ends when either half finishes.  Unregistering drops the
//! queue's sender, which lets the writer send a best-effort close frame and
//! shut the socket down.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use preamp_core::command::normalize_command;
use preamp_core::websocket::{
    classify, close_frame, decode_frame, encode_frame, text_frame, FrameError, FrameEvent, Opcode,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::{BridgeContext, Outbound, SessionHandle, SessionId};
use crate::infrastructure::http_server::is_benign_disconnect;

/// How long the writer gets to flush its close frame after the reader ends.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Debug)]
pub enum EndReason {
    /// The browser sent a close frame, with its status code if present.
    ClosedByPeer(Option<u16>),
    /// The transport reached end-of-file.
    Eof,
    /// A frame declared a payload above the configured limit.
    FrameTooLarge { declared: u64, limit: usize },
    /// Reading from the transport failed.
    ReadFailed(std::io::Error),
    /// The writer half stopped (socket error or the session was dropped by
    /// the broadcaster).
    WriterStopped,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::ClosedByPeer(Some(code)) => write!(f, "closed by peer (code {code})"),
            EndReason::ClosedByPeer(None) => f.write_str("closed by peer"),
            EndReason::Eof => f.write_str("connection closed"),
            EndReason::FrameTooLarge { declared, limit } => {
                write!(f, "frame of {declared} bytes exceeds limit {limit}")
            }
            EndReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            EndReason::WriterStopped => f.write_str("writer stopped"),
        }
    }
}

// ── Session lifecycle ─────────────────────────────────────────────────────────

/// Runs one upgraded connection until it ends, then unregisters it.
///
/// The session is registered (and the cached device state queued for it)
/// before any frame is read.
pub async fn run_ws_session<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<BridgeContext>,
    max_payload: usize,
) -> EndReason
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let SessionHandle { id, outbound } = ctx.register_session();
    info!("session {id}: WebSocket client {peer} connected");

    let (read_half, write_half) = tokio::io::split(stream);
    let mut writer_task = tokio::spawn(write_outbound(write_half, outbound, id));
    let mut writer_done = false;

    let reason = tokio::select! {
        reason = read_inbound(read_half, &ctx, id, max_payload) => reason,
        result = &mut writer_task => {
            writer_done = true;
            match result {
                Ok(Err(e)) if !is_benign_disconnect(&e) => warn!("session {id}: write failed: {e}"),
                Ok(Err(e)) => debug!("session {id}: peer went away while writing: {e}"),
                Ok(Ok(())) => {}
                Err(e) => warn!("session {id}: writer task failed: {e}"),
            }
            EndReason::WriterStopped
        }
    };

    ctx.unregister_session(id);

    if !writer_done && timeout(WRITER_SHUTDOWN_GRACE, &mut writer_task).await.is_err() {
        debug!("session {id}: writer did not finish in time; aborting");
        writer_task.abort();
    }

    info!("session {id}: {peer} disconnected: {reason}");
    reason
}

/// Reads and dispatches frames until the session should end.
async fn read_inbound<R>(
    mut read_half: ReadHalf<R>,
    ctx: &BridgeContext,
    id: SessionId,
    max_payload: usize,
) -> EndReason
where
    R: AsyncRead + AsyncWrite + Unpin,
{
    // A single read may deliver part of a frame or several frames at once.
    let mut recv_buf: Vec<u8> = Vec::with_capacity(1024);
    let mut read_tmp = vec![0u8; 1024];

    loop {
        loop {
            match decode_frame(&recv_buf, max_payload) {
                Ok((frame, consumed)) => {
                    recv_buf.drain(..consumed);
                    if let Some(reason) = dispatch(classify(frame), ctx, id) {
                        return reason;
                    }
                }
                Err(FrameError::Incomplete { .. }) => break,
                Err(FrameError::TooLarge { declared, limit }) => {
                    warn!("session {id}: frame of {declared} bytes exceeds limit {limit}");
                    return EndReason::FrameTooLarge { declared, limit };
                }
            }
        }

        match read_half.read(&mut read_tmp).await {
            Ok(0) => return EndReason::Eof,
            Ok(n) => recv_buf.extend_from_slice(&read_tmp[..n]),
            Err(e) => {
                if is_benign_disconnect(&e) {
                    debug!("session {id}: connection reset: {e}");
                }
                return EndReason::ReadFailed(e);
            }
        }
    }
}

/// Handles one decoded frame.  `Some` ends the session.
fn dispatch(event: FrameEvent, ctx: &BridgeContext, id: SessionId) -> Option<EndReason> {
    match event {
        FrameEvent::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            match normalize_command(text) {
                Some(command) => {
                    ctx.submit_command(&command);
                }
                None => debug!("session {id}: ignoring non-command {text:?}"),
            }
            None
        }
        FrameEvent::Ping(payload) => {
            if ctx.send_to_session(id, Outbound::Pong(payload)) {
                None
            } else {
                Some(EndReason::WriterStopped)
            }
        }
        FrameEvent::Close(code) => {
            if let Some(code) = code {
                debug!("session {id}: close frame with code {code}");
            }
            Some(EndReason::ClosedByPeer(code))
        }
        FrameEvent::Ignored(opcode) => {
            debug!("session {id}: ignoring {opcode:?} frame");
            None
        }
    }
}

/// Drains the outbound queue onto the socket until the queue closes.
async fn write_outbound<W>(
    mut write_half: WriteHalf<W>,
    mut outbound: mpsc::Receiver<Outbound>,
    id: SessionId,
) -> std::io::Result<()>
where
    W: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let bytes = match message {
            Outbound::Text(line) => text_frame(&line),
            Outbound::Pong(payload) => encode_frame(Opcode::Pong, &payload),
        };
        write_half.write_all(&bytes).await?;
        write_half.flush().await?;
    }

    // Best effort: the peer may already be gone.
    if let Err(e) = write_half.write_all(&close_frame(None)).await {
        debug!("session {id}: close frame not sent: {e}");
    }
    let _ = write_half.shutdown().await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
