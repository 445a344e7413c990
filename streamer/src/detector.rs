use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use camwatch_common::config::SessionConfig;
use camwatch_common::frame::{Frame, MetricsSample};
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader, RgbImage};
use tracing::debug;

use crate::error::FrameError;

/// Result of feeding one raster to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// No previous raster; this one became the baseline.
    Baseline,
    Compared { metrics: MetricsSample, motion: bool },
}

#[derive(Default)]
struct DetectorState {
    previous: Option<RgbImage>,
    last_detection: Option<Instant>,
}

/// Frame-to-frame motion detector.
///
/// Each frame is decoded, downscaled and compared pixel by pixel against
/// the raster of the immediately preceding frame. A pixel counts as changed
/// when any RGB channel differs by strictly more than the channel threshold.
/// Motion fires when the changed ratio reaches the ratio threshold and more
/// than the cooldown has passed since the last detection.
///
/// The previous raster and the last detection instant live behind one lock
/// so a session can release them while the worker is running. Decoding and
/// resizing happen outside the lock.
pub struct MotionDetector {
    config: SessionConfig,
    state: Mutex<DetectorState>,
}

impl MotionDetector {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DetectorState::default()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Decode, downscale and compare one frame.
    pub fn process(&self, frame: &Frame) -> Result<Outcome, FrameError> {
        let raster = self.rasterize(frame)?;
        Ok(self.compare(raster, Instant::now()))
    }

    /// Decode a JPEG frame and downscale it to the configured size.
    ///
    /// Axes already smaller than the configured size keep their source size.
    pub fn rasterize(&self, frame: &Frame) -> Result<RgbImage, FrameError> {
        let seq = frame.seq;
        let img = ImageReader::with_format(Cursor::new(frame.as_bytes()), ImageFormat::Jpeg)
            .decode()
            .map_err(|source| FrameError::Decode { seq, source })?;

        if img.width() == 0 || img.height() == 0 {
            return Err(FrameError::EmptyImage { seq });
        }

        let width = self.config.downscale_width.min(img.width());
        let height = self.config.downscale_height.min(img.height());
        if (width, height) == (img.width(), img.height()) {
            return Ok(img.to_rgb8());
        }
        Ok(img.resize_exact(width, height, FilterType::Nearest).to_rgb8())
    }

    /// Compare `raster` against the previous one and store it in its place.
    ///
    /// `now` must come from a monotonic clock.
    pub fn compare(&self, raster: RgbImage, now: Instant) -> Outcome {
        let mut state = self.lock();

        let total = raster.width() * raster.height();
        let changed = match state.previous.take() {
            Some(prev) if prev.dimensions() == raster.dimensions() => {
                count_changed(&prev, &raster, self.config.channel_threshold)
            }
            Some(prev) => {
                // Nothing comparable: every pixel of the new size counts as changed.
                debug!(
                    previous = ?prev.dimensions(),
                    current = ?raster.dimensions(),
                    "raster size changed, resetting baseline"
                );
                total
            }
            None => {
                debug!("first frame, storing baseline");
                state.previous = Some(raster);
                return Outcome::Baseline;
            }
        };
        let metrics = MetricsSample::new(changed, total);

        let cooled_down = state
            .last_detection
            .map_or(true, |last| now.saturating_duration_since(last) > self.config.cooldown());
        let motion = metrics.ratio >= self.config.ratio_threshold && cooled_down;
        if motion {
            state.last_detection = Some(now);
        }
        state.previous = Some(raster);

        debug!(
            ratio = format!("{:.4}", metrics.ratio),
            changed = metrics.changed,
            total = metrics.total,
            threshold = self.config.ratio_threshold,
            motion,
            "frame comparison"
        );

        Outcome::Compared { metrics, motion }
    }

    /// Release the retained raster and forget the last detection.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.previous = None;
        state.last_detection = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.lock().previous.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Count pixels where any channel differs by more than `threshold`.
fn count_changed(previous: &RgbImage, current: &RgbImage, threshold: u8) -> u32 {
    previous
        .pixels()
        .zip(current.pixels())
        .filter(|(p, c)| {
            p.0.iter()
                .zip(c.0.iter())
                .any(|(&a, &b)| a.abs_diff(b) > threshold)
        })
        .count() as u32
}
