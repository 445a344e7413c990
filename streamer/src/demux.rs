use bytes::{Bytes, BytesMut};
use camwatch_common::frame::{EOI_MARKER, SOI_MARKER};
use tracing::warn;

use crate::error::FrameError;

const INITIAL_CAPACITY: usize = 256 * 1024;

/// Splits an arbitrarily chunked byte stream into JPEG frames.
///
/// Framing relies only on the JPEG start (`FF D8`) and end (`FF D9`) markers;
/// multipart boundary strings and part headers are treated as noise and
/// dropped together with any other bytes that precede a start marker.
pub struct FrameDemuxer {
    buffer: BytesMut,
    /// Start marker located in `buffer`, if any.
    soi: Option<usize>,
    /// Offset at which the pending marker search resumes.
    resume: usize,
    max_buffer_bytes: Option<usize>,
}

impl FrameDemuxer {
    pub fn new(max_buffer_bytes: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            soi: None,
            resume: 0,
            max_buffer_bytes,
        }
    }

    /// Append a chunk of stream bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, or `None` if more bytes are needed.
    ///
    /// Everything up to and including the frame's end marker is removed from
    /// the buffer, including garbage in front of the start marker.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let soi = match self.soi {
            Some(pos) => pos,
            None => match find_marker(&self.buffer, self.resume, SOI_MARKER) {
                Some(pos) => {
                    self.soi = Some(pos);
                    self.resume = pos + SOI_MARKER.len();
                    pos
                }
                None => {
                    // A trailing 0xFF may pair with the next chunk.
                    self.resume = self.buffer.len().saturating_sub(1);
                    return None;
                }
            },
        };

        match find_marker(&self.buffer, self.resume, EOI_MARKER) {
            Some(eoi) => {
                let mut consumed = self.buffer.split_to(eoi + EOI_MARKER.len());
                let frame = consumed.split_off(soi).freeze();
                self.soi = None;
                self.resume = 0;
                Some(frame)
            }
            None => {
                self.resume = (soi + SOI_MARKER.len()).max(self.buffer.len().saturating_sub(1));
                None
            }
        }
    }

    /// Drain every complete frame currently buffered, in arrival order.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Discard the buffer if it grew past the configured cap.
    ///
    /// Call after draining, so the buffer holds no complete frame.
    pub fn enforce_limit(&mut self) -> Result<(), FrameError> {
        let Some(limit) = self.max_buffer_bytes else {
            return Ok(());
        };
        if self.buffer.len() <= limit {
            return Ok(());
        }
        let discarded = self.buffer.len();
        warn!(limit, discarded, "frame buffer overflow, discarding buffered bytes");
        self.clear();
        Err(FrameError::BufferOverflow { limit, discarded })
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.soi = None;
        self.resume = 0;
    }
}

/// Find the first occurrence of a two-byte `marker` at or after `from`.
fn find_marker(haystack: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|pos| pos + from)
}
