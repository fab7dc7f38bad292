//! Frame extraction from a motion-JPEG byte stream.
//!
//! A motion-JPEG elementary stream is a sequence of independent JPEG
//! images concatenated back-to-back, with no framing beyond each image's
//! own start/end-of-image markers. The extractor accumulates arbitrarily
//! chunked bytes and slices out complete images.
use bytes::{Buf, Bytes, BytesMut};

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xff, 0xd8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xff, 0xd9];

/// Buffered bytes tolerated without a complete frame before resyncing.
pub const DEFAULT_MAX_BUFFER: usize = 2 * 1024 * 1024;

/// Accumulates raw bytes and yields complete JPEG frames.
///
/// Bytes preceding an accepted start marker are dropped together with the
/// extracted frame, so the buffer cannot grow without bound under
/// sustained throughput. If no frame completes before the buffer exceeds
/// its maximum, the extractor resynchronizes on the last start-marker
/// candidate instead of growing forever.
pub struct FrameExtractor {
    buf: BytesMut,
    max_buffer: usize,
    resyncs: u64,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_buffer,
            resyncs: 0,
        }
    }

    /// Append a newly read chunk. Chunks may be empty, may split a marker
    /// across calls, and carry no alignment guarantees.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, inclusive of both markers.
    ///
    /// Returns `None` if the buffered bytes do not yet contain a start
    /// marker followed by an end marker; callers append more bytes and
    /// retry. Call repeatedly to drain multiple buffered frames.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        match self.extract() {
            Some(frame) => Some(frame),
            None => {
                self.enforce_max_buffer();
                None
            }
        }
    }

    /// Number of times the buffer overflowed and was resynchronized.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    fn extract(&mut self) -> Option<Bytes> {
        let start = find_marker(&self.buf, SOI)?;
        // The end marker only counts after the start marker.
        let end = start + 2 + find_marker(&self.buf[start + 2..], EOI)?;

        // Split off everything through the end marker; leading garbage
        // before the start marker goes with it.
        let mut consumed = self.buf.split_to(end + 2);
        Some(consumed.split_off(start).freeze())
    }

    fn enforce_max_buffer(&mut self) {
        if self.buf.len() <= self.max_buffer {
            return;
        }
        self.resyncs += 1;

        let dropped = match rfind_marker(&self.buf, SOI) {
            // Keep the tail from the last start-marker candidate.
            Some(pos) if pos > 0 => {
                self.buf.advance(pos);
                pos
            }
            // No candidate to resync on, or a single oversized in-flight
            // frame: flush, retaining a trailing 0xff in case a marker is
            // split across the flush.
            _ => {
                let keep = usize::from(self.buf.last() == Some(&0xff));
                let len = self.buf.len() - keep;
                self.buf.advance(len);
                len
            }
        };

        log::warn!(
            "frame buffer exceeded {} bytes without a complete frame, \
             dropped {} bytes to resynchronize (total resyncs: {})",
            self.max_buffer,
            dropped,
            self.resyncs
        );
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|pair| pair == marker)
}

fn rfind_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).rposition(|pair| pair == marker)
}
