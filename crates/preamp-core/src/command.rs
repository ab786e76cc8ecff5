//! Client command normalization, read-command deduplication and the write FIFO.
//!
//! Browsers poll the device by sending the same handful of `GET` commands over
//! and over.  A slow UART cannot keep up with several open tabs doing that, so
//! the four read commands in [`DEDUP_COMMANDS`] are throttled and coalesced.
//! Everything else (`SET`, `ADD`, `DEL`) is queued unconditionally: dropping a
//! write would silently lose a user action.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Read commands subject to throttling and coalescing.
pub const DEDUP_COMMANDS: [&str; 4] = [
    "GET STATE",
    "GET SELECTOR_LABELS",
    "GET AMP_STATES",
    "GET TUBES",
];

/// Keys accepted in the bare `<KEY> <VALUE>` shorthand.
pub const SHORTHAND_KEYS: [&str; 6] = ["VOL", "BAL", "INP", "MUTE", "BRI", "STBY"];

/// Verbs that mark an already complete command.
pub const COMMAND_VERBS: [&str; 4] = ["GET", "SET", "ADD", "DEL"];

/// Terminator appended to every line written to the device.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Command that starts a new tube report cycle.
pub const GET_TUBES: &str = "GET TUBES";

/// Turns a client-supplied command into its canonical form.
///
/// Returns `None` when the input is neither a full command nor a whitelisted
/// shorthand pair.
///
/// ```rust
/// use preamp_core::command::normalize_command;
///
/// assert_eq!(normalize_command("get state").as_deref(), Some("get state"));
/// assert_eq!(normalize_command("VOL 20").as_deref(), Some("SET VOL 20"));
/// assert_eq!(normalize_command("hello"), None);
/// ```
pub fn normalize_command(raw: &str) -> Option<String> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    if is_full_command(line) {
        return Some(line.to_string());
    }

    let mut parts = line.split_whitespace();
    let head = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let key = head.to_ascii_uppercase();
    if SHORTHAND_KEYS.contains(&key.as_str()) {
        Some(format!("SET {key} {value}"))
    } else {
        None
    }
}

/// A full command is a verb, one space, then arguments.
fn is_full_command(line: &str) -> bool {
    let (Some(verb), Some(b' ')) = (line.get(..3), line.as_bytes().get(3)) else {
        return false;
    };
    COMMAND_VERBS.iter().any(|known| verb.eq_ignore_ascii_case(known))
}

/// Returns `true` when `line` asks for a fresh tube report.
pub fn is_tube_cycle_request(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(GET_TUBES)
}

/// Returns the upper-cased key used for dedup comparisons, or `None` when the
/// command is not one of the four throttled reads.
pub fn dedup_key(line: &str) -> Option<String> {
    let key = line.trim().to_ascii_uppercase();
    DEDUP_COMMANDS.contains(&key.as_str()).then_some(key)
}

/// Appends the device line terminator.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
    bytes
}

// ── Dedup window ──────────────────────────────────────────────────────────────

/// Remembers when each throttled read was last accepted.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    interval: Duration,
    last_sent: HashMap<String, Instant>,
}

impl DedupWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: HashMap::new(),
        }
    }

    /// Returns `true` if `key` was accepted less than one interval before `now`.
    pub fn is_throttled(&self, key: &str, now: Instant) -> bool {
        self.last_sent
            .get(key)
            .is_some_and(|sent| now.saturating_duration_since(*sent) < self.interval)
    }

    /// Records `key` as accepted at `now`.
    pub fn record(&mut self, key: String, now: Instant) {
        self.last_sent.insert(key, now);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

// ── Command queue ─────────────────────────────────────────────────────────────

/// What [`CommandQueue::submit`] did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended to the write FIFO.
    Queued,
    /// Dropped: an equal read command is already waiting in the queue.
    Coalesced,
    /// Dropped: the same read command was accepted within the dedup window.
    Throttled,
    /// Dropped: the command was blank.
    Empty,
}

impl SubmitOutcome {
    pub fn is_queued(self) -> bool {
        self == SubmitOutcome::Queued
    }
}

/// FIFO of trimmed commands waiting to be written to the device.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    pending: VecDeque<String>,
    dedup: DedupWindow,
}

impl CommandQueue {
    pub fn new(dedup_interval: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            dedup: DedupWindow::new(dedup_interval),
        }
    }

    /// Evaluates dedup rules for `line` and enqueues it if allowed.
    ///
    /// Coalescing is checked before the time window, and a throttled or
    /// coalesced command does not refresh the recorded timestamp.
    pub fn submit(&mut self, line: &str, now: Instant) -> SubmitOutcome {
        let line = line.trim();
        if line.is_empty() {
            return SubmitOutcome::Empty;
        }

        if let Some(key) = dedup_key(line) {
            if self.pending.iter().any(|queued| queued.eq_ignore_ascii_case(&key)) {
                return SubmitOutcome::Coalesced;
            }
            if self.dedup.is_throttled(&key, now) {
                return SubmitOutcome::Throttled;
            }
            self.dedup.record(key, now);
        }

        self.pending.push_back(line.to_string());
        SubmitOutcome::Queued
    }

    /// Takes the oldest queued command.
    pub fn pop_front(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterates the queued commands, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }
}
