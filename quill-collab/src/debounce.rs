//! Trailing debounce with a max-wait bound.
//!
//! The upstream writer must coalesce bursts of edits but still flush at
//! least once while activity is continuous: firing happens `wait` after
//! the last mark or `max_wait` after the first unflushed mark, whichever
//! comes first.

use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debounce {
    wait: Duration,
    max_wait: Duration,
    first_mark: Option<Instant>,
    last_mark: Option<Instant>,
}

impl Debounce {
    pub fn new(wait: Duration, max_wait: Duration) -> Self {
        Self {
            wait,
            max_wait,
            first_mark: None,
            last_mark: None,
        }
    }

    /// Record activity.
    pub fn mark(&mut self) {
        let now = Instant::now();
        self.first_mark.get_or_insert(now);
        self.last_mark = Some(now);
    }

    /// When the pending flush is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        let first = self.first_mark?;
        let last = self.last_mark?;
        Some((last + self.wait).min(first + self.max_wait))
    }

    /// True when something is waiting to flush.
    pub fn is_pending(&self) -> bool {
        self.first_mark.is_some()
    }

    /// Reset after a flush.
    pub fn clear(&mut self) {
        self.first_mark = None;
        self.last_mark = None;
    }
}
