//! # Session Frame Buffer
//!
//! Append-only accumulator for the raw PCM bytes a streaming session has received.
//! Every analysis window is a prefix of this buffer starting at byte 0, so nothing
//! is ever discarded while the session lives.
//!
//! ## Key Features:
//! - **Append-only**: Length never decreases within a session
//! - **Non-destructive reads**: `prefix(n)` borrows without consuming
//! - **Single owner**: Owned by the session task, so no locking is needed

use crate::audio::format::PcmFormat;

/// Growing byte accumulator for one streaming session.
///
/// ## Memory Management:
/// Memory grows with the total audio received. Sessions are bounded by their
/// total timeout, which bounds the buffer as well.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    /// Raw PCM bytes in arrival order
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Append a chunk of raw PCM data.
    ///
    /// Chunks are taken as-is: arbitrary sizes, including empty chunks and chunks
    /// that split a sample, are valid. Amortized O(1) per byte.
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Number of bytes received so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if no audio has been received yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the first `n` bytes without mutating the buffer.
    ///
    /// ## Panics:
    /// Callers only ask for prefixes the scheduler has confirmed are available;
    /// asking for more than `len()` bytes is a logic error and panics.
    pub fn prefix(&self, n: usize) -> &[u8] {
        &self.data[..n]
    }

    /// Duration of the buffered audio in seconds for the given format.
    pub fn duration_seconds(&self, format: &PcmFormat) -> f64 {
        format.duration_seconds(self.len())
    }
}
