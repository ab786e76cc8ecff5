//! In-memory cache of the most recent device state lines.
//!
//! The preamp controller reports its state as whole text lines.  The bridge
//! never interprets the individual fields of a `STATE` line; it only needs to
//! remember the latest one so it can answer REST queries and bring newly
//! connected browsers up to date.
//!
//! # Two kinds of state
//!
//! - **Snapshot slots** ([`DeviceStateSnapshot`]): one slot each for the latest
//!   `STATE`, `SELECTOR_LABELS` and `AMP_STATES` line.  A new line replaces its
//!   slot completely (last value wins, no merging).
//! - **Tube telemetry** ([`TubeTelemetry`]): one `TUBE` line per tube number,
//!   reported in bursts that end with an `END TUBES` marker.

use std::collections::{BTreeMap, HashMap};

/// Line emitted to clients when a tube report burst is complete.
pub const END_TUBES_LINE: &str = "END TUBES";

/// Alternate spelling of the end-of-tubes marker used by older firmware.
pub const TUBES_END_ALT: &str = "TUBES_END";

/// The kind of line passed to [`DeviceStateCache::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCategory {
    State,
    Labels,
    AmpStates,
    Tube,
    TubesEnd,
    /// Acknowledgements, errors and anything else; logged, never cached.
    Other,
}

impl LineCategory {
    /// Short lowercase name used in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            LineCategory::State => "state",
            LineCategory::Labels => "labels",
            LineCategory::AmpStates => "amp_states",
            LineCategory::Tube => "tube",
            LineCategory::TubesEnd => "tubes_end",
            LineCategory::Other => "other",
        }
    }
}

/// Result of applying one device line to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedLine {
    pub category: LineCategory,
    /// Lines to forward to connected clients, in order.  May be empty when an
    /// invalid tube line was dropped.
    pub emitted: Vec<String>,
}

/// The three last-value-wins slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStateSnapshot {
    pub state: Option<String>,
    pub labels: Option<String>,
    pub amp_states: Option<String>,
}

/// Latest metrics line per tube number, plus the end-of-burst flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TubeTelemetry {
    lines: BTreeMap<u32, String>,
    terminated: bool,
}

impl TubeTelemetry {
    /// Stores `line` as the latest report for tube `num`.
    pub fn insert(&mut self, num: u32, line: String) {
        self.lines.insert(num, line);
    }

    /// Drops every tube entry and clears the terminated flag.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.terminated = false;
    }

    /// Records that an end-of-tubes marker was seen.
    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the stored line for tube `num`.
    pub fn get(&self, num: u32) -> Option<&str> {
        self.lines.get(&num).map(String::as_str)
    }

    /// Returns the tube lines in ascending tube-number order, followed by
    /// [`END_TUBES_LINE`] when the burst is complete and non-empty.
    pub fn lines(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lines.values().cloned().collect();
        if self.terminated && !out.is_empty() {
            out.push(END_TUBES_LINE.to_string());
        }
        out
    }

    /// Renders [`lines`](Self::lines) joined with `\n`.
    pub fn render(&self) -> String {
        self.lines().join("\n")
    }
}

/// Cache of everything the bridge remembers about the device.
#[derive(Debug, Clone, Default)]
pub struct DeviceStateCache {
    snapshot: DeviceStateSnapshot,
    tubes: TubeTelemetry,
}

impl DeviceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one framed device line and returns what should be broadcast.
    ///
    /// # Dispatch rules
    ///
    /// | Prefix            | Effect                                  |
    /// |-------------------|-----------------------------------------|
    /// | `STATE `          | replaces the state slot                 |
    /// | `SELECTOR_LABELS` | replaces the labels slot                |
    /// | `AMP_STATES`      | replaces the amp-states slot            |
    /// | `TUBE `           | stored by `NUM=` if valid, else dropped |
    /// | `END TUBES`       | sets the terminated flag                |
    /// | anything else     | passed through, no cache effect         |
    pub fn apply(&mut self, line: &str) -> AppliedLine {
        if line.starts_with("STATE ") {
            self.snapshot.state = Some(line.to_string());
            return AppliedLine::single(LineCategory::State, line);
        }
        if line.starts_with("SELECTOR_LABELS") {
            self.snapshot.labels = Some(line.to_string());
            return AppliedLine::single(LineCategory::Labels, line);
        }
        if line.starts_with("AMP_STATES") {
            self.snapshot.amp_states = Some(line.to_string());
            return AppliedLine::single(LineCategory::AmpStates, line);
        }

        let (clean, saw_end) = strip_embedded_tubes_end(line);

        if line.starts_with("TUBE ") {
            let mut emitted = Vec::new();
            if let Some(num) = valid_tube_number(&clean) {
                self.tubes.insert(num, clean.clone());
                emitted.push(clean);
            }
            if saw_end {
                self.tubes.mark_terminated();
                emitted.push(END_TUBES_LINE.to_string());
            }
            return AppliedLine {
                category: LineCategory::Tube,
                emitted,
            };
        }

        if saw_end || clean == END_TUBES_LINE || clean == TUBES_END_ALT {
            self.tubes.mark_terminated();
            return AppliedLine::single(LineCategory::TubesEnd, END_TUBES_LINE);
        }

        AppliedLine::single(LineCategory::Other, line)
    }

    /// Starts a fresh tube report cycle (a `GET TUBES` was issued).
    pub fn begin_tube_cycle(&mut self) {
        self.tubes.clear();
    }

    /// Tube lines sorted by number, joined by newline.
    pub fn render_tubes(&self) -> String {
        self.tubes.render()
    }

    /// Lines a newly connected client needs, in replay order: labels, state,
    /// amp states, then the tube table.
    pub fn replay_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.snapshot.labels.iter().cloned());
        out.extend(self.snapshot.state.iter().cloned());
        out.extend(self.snapshot.amp_states.iter().cloned());
        out.extend(self.tubes.lines());
        out
    }

    pub fn snapshot(&self) -> &DeviceStateSnapshot {
        &self.snapshot
    }

    pub fn tubes(&self) -> &TubeTelemetry {
        &self.tubes
    }

    pub fn state(&self) -> Option<&str> {
        self.snapshot.state.as_deref()
    }

    pub fn labels(&self) -> Option<&str> {
        self.snapshot.labels.as_deref()
    }

    pub fn amp_states(&self) -> Option<&str> {
        self.snapshot.amp_states.as_deref()
    }
}

impl AppliedLine {
    fn single(category: LineCategory, line: &str) -> Self {
        Self {
            category,
            emitted: vec![line.to_string()],
        }
    }
}

// ── Tube line parsing ─────────────────────────────────────────────────────────

/// Splits `KEY=VALUE` tokens of a line into a map.  Tokens without `=` are
/// ignored; a repeated key keeps its last value.
pub fn parse_fields(line: &str) -> HashMap<&str, &str> {
    line.split_whitespace()
        .filter_map(|part| part.split_once('='))
        .collect()
}

/// Returns the tube number when the line carries all-digit `NUM`, `MIN` and
/// `HOUR` fields.
pub fn valid_tube_number(line: &str) -> Option<u32> {
    let fields = parse_fields(line);
    let all_digits = ["NUM", "MIN", "HOUR"].iter().all(|key| {
        fields
            .get(key)
            .is_some_and(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
    });
    if !all_digits {
        return None;
    }
    fields.get("NUM")?.parse().ok()
}

fn strip_embedded_tubes_end(line: &str) -> (String, bool) {
    for marker in [END_TUBES_LINE, TUBES_END_ALT] {
        if line.contains(marker) {
            return (line.replace(marker, "").trim().to_string(), true);
        }
    }
    (line.to_string(), false)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
