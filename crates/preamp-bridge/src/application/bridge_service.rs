//! The shared bridge context: device cache, command queue and session registry.
//!
//! Every activity of the bridge (serial reader, serial writer, HTTP handlers,
//! WebSocket sessions) works on one [`BridgeContext`] shared behind an `Arc`.
//! Each structure sits behind its own `std::sync::Mutex`; no lock is ever held
//! across an `.await`.
//!
//! # Ordering guarantees
//!
//! - Device lines are applied to the cache and broadcast while the session
//!   registry lock is held, so broadcast order equals serial order and a
//!   session registering concurrently sees either the old cache plus the new
//!   broadcast, or the new cache without it; never a gap or a duplicate.
//! - When both locks are needed the order is always registry, then cache.
//! - Dedup evaluation and enqueueing happen under one lock acquisition.

use std::sync::{Mutex, MutexGuard, PoisonError};

use preamp_core::command::{is_tube_cycle_request, CommandQueue, SubmitOutcome};
use preamp_core::device::{AppliedLine, DeviceStateCache};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::session_broadcaster::{Outbound, SessionId, SessionRegistry};
use crate::domain::BridgeConfig;

/// A freshly registered session: its id and the queue its writer drains.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub outbound: mpsc::Receiver<Outbound>,
}

/// State shared by all bridge activities.
#[derive(Debug)]
pub struct BridgeContext {
    cache: Mutex<DeviceStateCache>,
    commands: Mutex<CommandQueue>,
    command_ready: Notify,
    sessions: Mutex<SessionRegistry>,
    session_queue_len: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BridgeContext {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            cache: Mutex::new(DeviceStateCache::new()),
            commands: Mutex::new(CommandQueue::new(config.dedup_window())),
            command_ready: Notify::new(),
            sessions: Mutex::new(SessionRegistry::new()),
            session_queue_len: config.session_queue_len.max(1),
        }
    }

    // ── Command gateway ───────────────────────────────────────────────────────

    /// Queues an already normalized command for the device.
    ///
    /// A `GET TUBES` starts a new tube cycle first, whether or not the request
    /// itself ends up throttled.
    pub fn submit_command(&self, line: &str) -> SubmitOutcome {
        if is_tube_cycle_request(line) {
            lock(&self.cache).begin_tube_cycle();
        }
        let now = tokio::time::Instant::now().into_std();
        let outcome = lock(&self.commands).submit(line, now);
        match outcome {
            SubmitOutcome::Queued => self.command_ready.notify_one(),
            other => debug!("command {line:?} not queued: {other:?}"),
        }
        outcome
    }

    /// Takes the oldest queued command without waiting.
    pub fn next_command(&self) -> Option<String> {
        lock(&self.commands).pop_front()
    }

    /// Waits until a command is queued and takes it.
    pub async fn wait_for_command(&self) -> String {
        loop {
            if let Some(line) = self.next_command() {
                return line;
            }
            self.command_ready.notified().await;
        }
    }

    pub fn pending_commands(&self) -> Vec<String> {
        lock(&self.commands).iter().map(str::to_string).collect()
    }

    // ── Device lines ──────────────────────────────────────────────────────────

    /// Applies one framed device line and broadcasts whatever it emits.
    pub fn handle_device_line(&self, line: &str) -> AppliedLine {
        let mut sessions = lock(&self.sessions);
        let applied = lock(&self.cache).apply(line);
        debug!("serial <- {line} ({})", applied.category.as_str());
        for out in &applied.emitted {
            sessions.broadcast(out);
        }
        applied
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Registers a new session and queues the cached state for it.
    ///
    /// Replay order: labels, state, amp states, then each tube line.
    pub fn register_session(&self) -> SessionHandle {
        let mut sessions = lock(&self.sessions);
        let replay = lock(&self.cache).replay_lines();

        let (tx, rx) = mpsc::channel(self.session_queue_len.max(replay.len() + 1));
        for line in replay {
            // Capacity covers the whole replay, so this cannot fail.
            let _ = tx.try_send(Outbound::Text(line));
        }

        let id = Uuid::new_v4();
        sessions.register(id, tx);
        info!("session {id}: registered; sessions={}", sessions.len());
        SessionHandle { id, outbound: rx }
    }

    pub fn unregister_session(&self, id: SessionId) -> bool {
        let mut sessions = lock(&self.sessions);
        let removed = sessions.unregister(id);
        if removed {
            info!("session {id}: unregistered; sessions={}", sessions.len());
        }
        removed
    }

    /// Queues a message for one session.  `false` means the session is gone.
    pub fn send_to_session(&self, id: SessionId, message: Outbound) -> bool {
        lock(&self.sessions).send_to(id, message)
    }

    pub fn is_session_registered(&self, id: SessionId) -> bool {
        lock(&self.sessions).contains(id)
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    // ── REST reads ────────────────────────────────────────────────────────────

    pub fn state_line(&self) -> String {
        lock(&self.cache).state().unwrap_or_default().to_string()
    }

    pub fn labels_line(&self) -> String {
        lock(&self.cache).labels().unwrap_or_default().to_string()
    }

    pub fn amp_states_line(&self) -> String {
        lock(&self.cache).amp_states().unwrap_or_default().to_string()
    }

    pub fn tubes_text(&self) -> String {
        lock(&self.cache).render_tubes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
