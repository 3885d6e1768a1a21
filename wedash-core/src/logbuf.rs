//! Bounded log buffer and the per-unit log session.

use std::collections::VecDeque;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::unit::UnitId;

/// One buffered log line with its arrival time.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub at: SystemTime,
    pub text: String,
}

/// Fixed-capacity line buffer. When the producer outruns the consumer the
/// oldest lines are dropped; the newest are always retained.
#[derive(Debug)]
pub struct LogBuffer {
    cap: usize,
    lines: VecDeque<LogLine>,
    dropped: u64,
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            lines: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: LogLine) {
        self.lines.push_back(line);
        while self.lines.len() > self.cap {
            self.lines.pop_front();
            self.dropped += 1;
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Lines dropped since the buffer was last cleared.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// The newest `n` lines, oldest first.
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip)
    }
}

/// How a log session reads its source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// Continuous tail starting at end-of-content.
    Follow,
    /// Up to N most recent lines, then done.
    LastN,
    /// Bounded time window from the journal.
    JournalWindow,
}

impl SessionMode {
    pub fn label(&self) -> &'static str {
        match self {
            SessionMode::Follow => "follow",
            SessionMode::LastN => "last",
            SessionMode::JournalWindow => "journal",
        }
    }
}

/// The active tail bound to one unit. At most one exists at a time.
#[derive(Debug)]
pub struct LogSession {
    pub unit_identity: UnitId,
    pub mode: SessionMode,
    pub buffer: LogBuffer,
    /// Terminal sub-state: the source went away and a notice line was
    /// appended. No further lines are accepted.
    pub closed: bool,
}

impl LogSession {
    pub fn new(unit_identity: UnitId, mode: SessionMode, cap: usize) -> Self {
        Self {
            unit_identity,
            mode,
            buffer: LogBuffer::new(cap),
            closed: false,
        }
    }

    pub fn is_for(&self, id: &str) -> bool {
        self.unit_identity == id
    }

    pub fn push_line(&mut self, at: SystemTime, text: String) {
        if self.closed {
            return;
        }
        self.buffer.push(LogLine { at, text });
    }

    /// Reuse the session for a re-request: keep the handle upstream, start
    /// the visible buffer fresh.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.closed = false;
    }

    /// Surface a single synthetic notice line and close. Idempotent.
    pub fn mark_unavailable(&mut self, at: SystemTime, reason: &str) {
        if self.closed {
            return;
        }
        self.buffer.push(LogLine {
            at,
            text: format!("-- log unavailable: {} --", reason),
        });
        self.closed = true;
    }
}
