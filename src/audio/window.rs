//! # Window Scheduler
//!
//! Decides when the session buffer has crossed the next analysis boundary.
//! Boundaries sit at every multiple of one window's worth of bytes
//! (3s, 6s, 9s, ... of audio) and each window covers the buffer from byte 0.
//!
//! Firing is data-driven: the scheduler is consulted after every inbound chunk,
//! never on a timer, so a slow sender simply delays the next window.

use std::ops::Range;

/// Tracks the next byte threshold at which a window should be analyzed.
#[derive(Debug, Clone)]
pub struct WindowScheduler {
    /// Bytes added to the threshold after each fired window
    increment: usize,

    /// Buffer length that fires the next window
    next_threshold: usize,

    /// Number of windows fired so far
    fired: usize,
}

impl WindowScheduler {
    /// Create a scheduler whose first threshold is one increment.
    ///
    /// ## Panics:
    /// An increment of zero would fire forever; it is rejected up front.
    pub fn new(increment: usize) -> Self {
        assert!(increment > 0, "window increment must be non-zero");
        Self {
            increment,
            next_threshold: increment,
            fired: 0,
        }
    }

    /// Check the buffer length against the next threshold.
    ///
    /// ## Returns:
    /// - **Some(0..threshold)**: A boundary was crossed; analyze this prefix.
    ///   The threshold advances by one increment before returning.
    /// - **None**: Not enough audio yet.
    ///
    /// Call this repeatedly until it returns `None`: a single large chunk can cross
    /// several boundaries, and each one must fire once, in increasing order.
    pub fn check(&mut self, buffer_len: usize) -> Option<Range<usize>> {
        if buffer_len < self.next_threshold {
            return None;
        }

        let window = 0..self.next_threshold;
        self.next_threshold += self.increment;
        self.fired += 1;
        Some(window)
    }

    /// Buffer length that fires the next window.
    pub fn next_threshold(&self) -> usize {
        self.next_threshold
    }

    /// Number of windows fired so far.
    pub fn fired(&self) -> usize {
        self.fired
    }
}
