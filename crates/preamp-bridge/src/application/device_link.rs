//! Serial reader and writer activities.
//!
//! The serial port itself is owned by the infrastructure layer.  This module
//! only sees a stream of received byte chunks (reader side) and a [`LineSink`]
//! to write encoded commands into (writer side), so both loops can be driven
//! from tests without hardware.
//!
//! ```text
//!  serial bytes ──► run_reader ──► UartFramer ──► BridgeContext::handle_device_line
//!
//!  BridgeContext::wait_for_command ──► run_writer ──► LineSink (serial port)
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use preamp_core::command::{encode_line, DEDUP_COMMANDS};
use preamp_core::framer::{FramerLimits, UartFramer};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::bridge_service::BridgeContext;

/// Something an encoded command line can be written to.
pub trait LineSink: Send + 'static {
    fn send_line(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<W: Write + Send + 'static> LineSink for W {
    fn send_line(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }
}

/// Feeds received serial chunks through the framer until the channel closes.
///
/// When no bytes arrive for `idle_flush`, whatever is buffered is flushed as a
/// final line.  Remaining bytes are flushed the same way on shutdown.
pub async fn run_reader(
    ctx: Arc<BridgeContext>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    limits: FramerLimits,
    idle_flush: Duration,
) {
    let mut framer = UartFramer::new(limits);

    loop {
        match timeout(idle_flush, chunks.recv()).await {
            Ok(Some(chunk)) => {
                for line in framer.feed(&chunk) {
                    ctx.handle_device_line(&line);
                }
            }
            Ok(None) => break,
            Err(_) => {
                for line in framer.flush() {
                    ctx.handle_device_line(&line);
                }
            }
        }
    }

    for line in framer.flush() {
        ctx.handle_device_line(&line);
    }
    info!("serial reader stopped");
}

/// Writes queued commands to `sink` in FIFO order, one line at a time.
///
/// Writes run on the blocking pool because real serial ports block.  A failed
/// write is logged and the loop moves on to the next command.
pub async fn run_writer<S: LineSink>(ctx: Arc<BridgeContext>, sink: S, pacing: Duration) {
    let mut sink = sink;

    loop {
        let line = ctx.wait_for_command().await;
        let bytes = encode_line(&line);

        let joined = tokio::task::spawn_blocking(move || {
            let result = sink.send_line(&bytes);
            (sink, result)
        })
        .await;

        match joined {
            Ok((returned, result)) => {
                sink = returned;
                match result {
                    Ok(()) => debug!("serial -> {line}"),
                    Err(e) => warn!("serial write of {line:?} failed: {e}"),
                }
            }
            Err(e) => {
                error!("serial writer task failed: {e}");
                return;
            }
        }

        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }
}

/// After `delay`, queues the four state reads so the cache fills on boot.
pub fn spawn_startup_sync(ctx: Arc<BridgeContext>, delay: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        for command in DEDUP_COMMANDS {
            ctx.submit_command(command);
        }
        info!("startup sync queued");
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
