//! Resynchronising line framer for the preamp controller's serial stream.
//!
//! The controller speaks a line-oriented ASCII protocol, but the UART link is
//! far from clean in practice:
//!
//! - Lines may end in `\r`, `\n`, `\r\n`, or nothing at all when the sender
//!   pushes two tokens back to back (`STATE VOL=20 ...TUBE NUM=1 ...`).
//! - Power-up noise and framing errors leave garbage bytes in front of the
//!   first real token.
//! - A single `read()` may deliver half a line, or several lines at once.
//!
//! # How resynchronisation works
//!
//! Every meaningful line starts with one of a fixed set of [`MARKERS`].  The
//! framer discards everything before the earliest marker, then cuts the line
//! at whichever comes first: the next newline, or the start of the next
//! marker.  Text after the last complete line is kept for the next call so a
//! line split across two reads is reassembled.
//!
//! ```text
//! buffer:   "\x00\x7f~STATE VOL=20\r\nTUBE NUM=1 MIN=5 HOUR=2ACK SET VO"
//!            └─noise─┘└──line 1───┘  └───────line 2─────┘└─remainder─┘
//! ```
//!
//! # Memory bound
//!
//! A stuck or babbling producer could otherwise grow the pending buffer
//! without limit.  Once the unconsumed remainder exceeds
//! [`FramerLimits::buffer_cap`] bytes it is cut down to its most recent
//! [`FramerLimits::retained_tail`] bytes.

use tracing::debug;

/// Literal tokens that may start a protocol line.
///
/// The order is irrelevant: the framer always anchors at the *earliest*
/// occurrence of any of them.
pub const MARKERS: [&str; 9] = [
    "STATE ",
    "SELECTOR_LABELS",
    "AMP_STATES",
    "TUBE ",
    "ACK ",
    "DONE SAVE",
    "ERR ",
    "END TUBES",
    "TUBES_END",
];

/// Size limits applied to the framer's pending buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerLimits {
    /// Maximum number of unconsumed bytes kept between calls.
    pub buffer_cap: usize,
    /// Number of trailing bytes kept when `buffer_cap` is exceeded.
    pub retained_tail: usize,
}

impl Default for FramerLimits {
    fn default() -> Self {
        Self {
            buffer_cap: 1024,
            retained_tail: 256,
        }
    }
}

/// Stateful wrapper around [`extract_lines`] that owns the pending buffer.
///
/// # Example
///
/// ```rust
/// use preamp_core::framer::UartFramer;
///
/// let mut framer = UartFramer::default();
/// assert!(framer.feed(b"STATE VOL=2").is_empty());
/// assert_eq!(framer.feed(b"0 BAL=0\r\n"), vec!["STATE VOL=20 BAL=0".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct UartFramer {
    pending: String,
    limits: FramerLimits,
}

impl UartFramer {
    /// Creates an empty framer with the given limits.
    pub fn new(limits: FramerLimits) -> Self {
        Self {
            pending: String::new(),
            limits,
        }
    }

    /// Appends freshly received bytes and returns every complete line.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the protocol is ASCII
    /// and a corrupted byte must not stall the stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let (lines, remainder) = extract_lines(&self.pending, false);
        self.pending = remainder;
        self.enforce_cap();
        lines
    }

    /// Emits whatever is left in the buffer as a best-effort final line.
    ///
    /// Called when the link has been idle long enough that the trailing text
    /// is not going to be completed.
    pub fn flush(&mut self) -> Vec<String> {
        let (lines, _) = extract_lines(&self.pending, true);
        self.pending.clear();
        lines
    }

    /// Returns the unconsumed text carried over to the next call.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Returns `true` when nothing is waiting in the buffer.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn enforce_cap(&mut self) {
        if self.pending.len() <= self.limits.buffer_cap {
            return;
        }
        let mut start = self.pending.len().saturating_sub(self.limits.retained_tail);
        while !self.pending.is_char_boundary(start) {
            start += 1;
        }
        debug!(
            "serial buffer over {} bytes; keeping last {}",
            self.limits.buffer_cap,
            self.pending.len() - start
        );
        self.pending.drain(..start);
    }
}

// ── Pure extraction ───────────────────────────────────────────────────────────

/// Splits `buffer` into protocol lines.
///
/// Returns the extracted lines (trimmed, never empty) and the remainder that
/// could not yet be framed.  With `flush_incomplete` set, any trailing text is
/// emitted as a final line and the remainder is always empty.
pub fn extract_lines(buffer: &str, flush_incomplete: bool) -> (Vec<String>, String) {
    let normalized = buffer.replace('\r', "\n");
    let mut text: &str = &normalized;
    let mut lines = Vec::new();

    loop {
        text = text.trim_start_matches(|c| matches!(c, '\n' | '\t' | ' '));
        if text.is_empty() {
            return (lines, String::new());
        }

        let Some(first) = next_marker_index(text, 0) else {
            return finish(lines, text, flush_incomplete);
        };
        // Noise in front of the first marker is dropped.
        text = &text[first..];

        let next_marker = next_marker_index(text, 1);
        let newline = text.get(1..).and_then(|rest| rest.find('\n')).map(|i| i + 1);

        let (cut, at_newline) = match (newline, next_marker) {
            (Some(nl), Some(marker)) if nl < marker => (nl, true),
            (Some(nl), None) => (nl, true),
            (_, Some(marker)) => (marker, false),
            (None, None) => return finish(lines, text, flush_incomplete),
        };

        push_trimmed(&mut lines, &text[..cut]);
        text = if at_newline {
            &text[cut + 1..]
        } else {
            &text[cut..]
        };
    }
}

/// Returns the byte index of the earliest marker at or after `start`.
pub fn next_marker_index(text: &str, start: usize) -> Option<usize> {
    let haystack = text.get(start..)?;
    MARKERS
        .iter()
        .filter_map(|marker| haystack.find(marker))
        .min()
        .map(|idx| idx + start)
}

fn finish(mut lines: Vec<String>, rest: &str, flush_incomplete: bool) -> (Vec<String>, String) {
    if flush_incomplete {
        push_trimmed(&mut lines, rest);
        (lines, String::new())
    } else {
        (lines, rest.to_string())
    }
}

fn push_trimmed(lines: &mut Vec<String>, raw: &str) {
    let line = raw.trim();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
