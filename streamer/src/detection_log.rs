use std::collections::VecDeque;

use chrono::{DateTime, Local};

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub at: DateTime<Local>,
    /// Change ratio of the last metrics sample before the detection.
    pub ratio: f32,
}

impl Detection {
    pub fn line(&self) -> String {
        format!(
            "[{}] Motion detected (ratio={:.3})",
            self.at.format("%H:%M:%S"),
            self.ratio
        )
    }
}

/// Most recent motion detections, oldest dropped first.
pub struct DetectionLog {
    entries: VecDeque<Detection>,
    capacity: usize,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_ENTRIES)),
            capacity,
        }
    }

    pub fn record(&mut self, at: DateTime<Local>, ratio: f32) -> &Detection {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Detection { at, ratio });
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Detection> {
        self.entries.iter()
    }
}
