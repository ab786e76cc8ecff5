//! The UART link to the preamp controller.
//!
//! The port is opened once and split into two handles: a reader that runs on
//! a dedicated OS thread (serial reads block) and a writer handed to
//! [`run_writer`](crate::application::run_writer).  Received bytes are passed
//! to the async side over an mpsc channel, the same way the discovery
//! responder forwards datagrams.

use std::io::{ErrorKind, Read};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// How long one blocking read waits before rechecking the running flag.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Errors opening the serial link.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to clone serial port handle: {0}")]
    Clone(#[source] serialport::Error),

    #[error("failed to spawn serial reader thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// An open serial port, split into reader and writer handles.
pub struct SerialLink {
    pub reader: Box<dyn serialport::SerialPort>,
    pub writer: Box<dyn serialport::SerialPort>,
}

/// Opens `path` at `baud` (8N1, no flow control).
///
/// # Errors
///
/// [`SerialError::Open`] if the device cannot be opened, [`SerialError::Clone`]
/// if a second handle cannot be created.
pub fn open(path: &str, baud: u32) -> Result<SerialLink, SerialError> {
    let reader = serialport::new(path, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|source| SerialError::Open {
            path: path.to_string(),
            source,
        })?;
    let writer = reader.try_clone().map_err(SerialError::Clone)?;
    info!("serial port {path} open at {baud} baud");
    Ok(SerialLink { reader, writer })
}

/// Spawns the blocking reader thread.  Chunks arrive on the returned channel;
/// the channel closes when the thread stops.
///
/// # Errors
///
/// [`SerialError::Thread`] if the OS refuses to create the thread.
pub fn spawn_reader<R>(
    port: R,
    running: Arc<AtomicBool>,
) -> Result<mpsc::Receiver<Vec<u8>>, SerialError>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("preamp-serial-rx".to_string())
        .spawn(move || read_loop(port, tx, running))
        .map_err(SerialError::Thread)?;
    Ok(rx)
}

fn read_loop<R: Read>(mut port: R, tx: mpsc::Sender<Vec<u8>>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 256];

    while running.load(Ordering::Relaxed) {
        let n = match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("serial read failed: {e}");
                break;
            }
        };

        if tx.blocking_send(buf[..n].to_vec()).is_err() {
            // Receiver dropped: the bridge is shutting down.
            break;
        }
    }
    debug!("serial reader thread exiting");
}
