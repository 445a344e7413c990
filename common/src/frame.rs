use bytes::Bytes;
use chrono::{DateTime, Utc};

/// JPEG start-of-image marker.
pub const SOI_MARKER: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI_MARKER: [u8; 2] = [0xFF, 0xD9];

/// One complete JPEG image cut out of a camera byte stream.
///
/// `data` spans from the start marker through the end marker inclusive.
/// It is a cheap reference-counted slice of the stream buffer, so cloning
/// a frame never copies the image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    /// Position of this frame within its session, starting at 0.
    pub seq: u64,
    /// Wall-clock receive time, Unix millis.
    pub received_at_ms: i64,
}

impl Frame {
    pub fn new(data: Bytes, seq: u64, received_at_ms: i64) -> Self {
        Self {
            data,
            seq,
            received_at_ms,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn payload_size(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is bounded by the JPEG start and end markers.
    pub fn has_jpeg_markers(&self) -> bool {
        self.data.len() >= 4 && self.data.starts_with(&SOI_MARKER) && self.data.ends_with(&EOI_MARKER)
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.received_at_ms).unwrap_or_else(Utc::now)
    }
}

/// Per-frame change measurement between two consecutive rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSample {
    /// `changed / total`.
    pub ratio: f32,
    pub changed: u32,
    pub total: u32,
}

impl MetricsSample {
    pub fn new(changed: u32, total: u32) -> Self {
        let ratio = if total == 0 {
            0.0
        } else {
            changed as f32 / total as f32
        };
        Self {
            ratio,
            changed,
            total,
        }
    }
}
