//! Async JPEG frame source over an arbitrary byte reader.
//!
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::extract::FrameExtractor;

/// Bytes pulled from the reader per iteration.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Pulls chunks from a byte reader and yields complete JPEG frames.
///
/// The reader is typically a camera subprocess stdout, but anything
/// readable works; extraction does not depend on how the bytes are
/// chunked.
pub struct JpegFrameSource<R> {
    reader: R,
    extractor: FrameExtractor,
    chunk: Box<[u8; READ_CHUNK_SIZE]>,
}

impl<R> JpegFrameSource<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            extractor: FrameExtractor::new(),
            chunk: Box::new([0; READ_CHUNK_SIZE]),
        }
    }

    /// Next complete frame, or `Ok(None)` once the byte source ends.
    ///
    /// Blocks (asynchronously) until the reader has produced enough bytes
    /// for a complete frame. A trailing partial frame at EOF is never
    /// emitted.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.extractor.next_frame() {
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut self.chunk[..]).await?;
            if read == 0 {
                return Ok(None);
            }
            self.extractor.push_bytes(&self.chunk[..read]);
        }
    }
}
