//! In-memory console capture for the supervised server.
//!
//! [`ConsoleBuffer`] keeps the most recent N lines emitted by the child
//! process. One writer (the output reader task of the live child) appends,
//! many readers take snapshots. All access goes through a single short
//! critical section, so a writer never waits on a slow reader and a
//! snapshot is always a consistent copy.
//!
//! Lines carry the [`ServerId`] generation that produced them: a reader task
//! left over from a previous child is refused once a newer generation has
//! been started, so stale output can never leak into the fresh console.

use crate::server::ServerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A timestamped line of console output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// When the line was captured
    pub timestamp: DateTime<Utc>,
    /// The line text, without its terminator
    pub text: String,
}

impl LogLine {
    fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
        }
    }
}

struct ConsoleInner {
    lines: VecDeque<LogLine>,
    generation: Option<ServerId>,
}

/// Bounded FIFO of console lines, safe for concurrent readers and writers.
///
/// # Examples
///
/// ```
/// use server_warden::console::ConsoleBuffer;
///
/// let console = ConsoleBuffer::new(2);
/// console.append("one");
/// console.append("two");
/// console.append("three");
///
/// let texts: Vec<String> = console.snapshot().into_iter().map(|l| l.text).collect();
/// assert_eq!(texts, vec!["two", "three"]);
/// ```
pub struct ConsoleBuffer {
    capacity: usize,
    inner: Mutex<ConsoleInner>,
}

impl ConsoleBuffer {
    /// Creates an empty buffer holding at most `capacity` lines.
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(ConsoleInner {
                lines: VecDeque::with_capacity(capacity),
                generation: None,
            }),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, ConsoleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of retained lines.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a line, evicting the oldest one when full.
    pub fn append(&self, text: impl Into<String>) {
        let line = LogLine::now(text);
        let mut inner = self.lock();
        push_bounded(&mut inner.lines, self.capacity, line);
    }

    /// Appends a line on behalf of a specific child generation.
    ///
    /// Returns `false` without appending when `generation` is no longer the
    /// current one; the caller should stop reading at that point.
    pub fn append_for(&self, generation: ServerId, text: impl Into<String>) -> bool {
        let line = LogLine::now(text);
        let mut inner = self.lock();
        if inner.generation != Some(generation) {
            return false;
        }
        push_bounded(&mut inner.lines, self.capacity, line);
        true
    }

    /// Clears the buffer and makes `generation` the only accepted writer.
    pub fn begin_generation(&self, generation: ServerId) {
        let mut inner = self.lock();
        inner.lines.clear();
        inner.generation = Some(generation);
    }

    /// Returns a copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lock().lines.iter().cloned().collect()
    }

    /// Empties the buffer.
    pub fn clear(&self) {
        self.lock().lines.clear();
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    /// Whether the buffer holds no lines.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push_bounded(lines: &mut VecDeque<LogLine>, capacity: usize, line: LogLine) {
    while lines.len() >= capacity {
        lines.pop_front();
    }
    lines.push_back(line);
}
