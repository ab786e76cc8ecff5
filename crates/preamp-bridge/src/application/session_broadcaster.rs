//! Registry of live WebSocket sessions and line fan-out.
//!
//! Each session owns a bounded outbound channel; the registry only keeps the
//! sending half.  The session's writer task drains the receiving half onto the
//! socket.  A session whose channel is full (a stalled browser) or closed (the
//! writer is gone) is treated as dead and removed after the broadcast pass.
//! Dropping its sender then lets the writer task finish.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// Identifier of one accepted WebSocket connection.
pub type SessionId = Uuid;

/// A message queued for one session's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A device line to send as a text frame.
    Text(String),
    /// Reply to a client ping, echoing its payload.
    Pong(Vec<u8>),
}

/// The set of sessions currently able to receive device lines.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, mpsc::Sender<Outbound>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session.  A previous entry with the same id is replaced.
    pub fn register(&mut self, id: SessionId, sender: mpsc::Sender<Outbound>) {
        self.sessions.insert(id, sender);
    }

    /// Removes a session; returns `false` if it was not registered.
    pub fn unregister(&mut self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Queues `message` for a single session.
    ///
    /// Returns `false` when the session is unknown or its channel cannot take
    /// the message; in the latter case the session is removed.
    pub fn send_to(&mut self, id: SessionId, message: Outbound) -> bool {
        let Some(sender) = self.sessions.get(&id) else {
            return false;
        };
        if sender.try_send(message).is_ok() {
            return true;
        }
        self.sessions.remove(&id);
        false
    }

    /// Sends `line` to every registered session.
    ///
    /// Failed sessions are collected during the pass and removed only after it
    /// completes.  Returns the number of sessions removed.
    pub fn broadcast(&mut self, line: &str) -> usize {
        let mut dead = Vec::new();
        for (id, sender) in &self.sessions {
            match sender.try_send(Outbound::Text(line.to_string())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("session {id}: outbound queue full; dropping session");
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("session {id}: writer gone; dropping session");
                    dead.push(*id);
                }
            }
        }
        for id in &dead {
            self.sessions.remove(id);
        }
        dead.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
