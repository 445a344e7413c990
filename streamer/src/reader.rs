use std::sync::Arc;

use bytes::Bytes;
use camwatch_common::frame::Frame;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::USER_AGENT;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelListener;
use crate::demux::FrameDemuxer;
use crate::detector::{MotionDetector, Outcome};
use crate::error::StreamError;
use crate::observer::Notifier;

/// Largest slice of body bytes handed to the demuxer in one step.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// The camera closed the stream.
    Ended,
    Cancelled,
}

/// Reads an MJPEG HTTP response and runs every extracted frame through
/// the motion detector, notifying the observer along the way.
pub(crate) struct StreamReader {
    client: reqwest::Client,
    user_agent: String,
    demuxer: FrameDemuxer,
    detector: Arc<MotionDetector>,
    notifier: Notifier,
    next_seq: u64,
}

impl StreamReader {
    pub(crate) fn new(
        client: reqwest::Client,
        user_agent: String,
        detector: Arc<MotionDetector>,
        notifier: Notifier,
    ) -> Self {
        let demuxer = FrameDemuxer::new(detector.config().max_buffer_bytes);
        Self {
            client,
            user_agent,
            demuxer,
            detector,
            notifier,
            next_seq: 0,
        }
    }

    /// Stream until the camera closes the connection, a transport error
    /// occurs or cancellation is requested. Transport errors, including a
    /// cancellation that interrupts a pending connect or read, are reported
    /// to the observer exactly once.
    pub(crate) async fn run(mut self, url: &str, mut cancel: CancelListener) -> Option<ReadOutcome> {
        info!(url, "connecting to MJPEG stream");
        match self.read_stream(url, &mut cancel).await {
            Ok(outcome) => {
                info!(
                    url,
                    ?outcome,
                    frames = self.next_seq,
                    buffered = self.demuxer.buffered_len(),
                    "MJPEG stream finished"
                );
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, url, frames = self.next_seq, "MJPEG stream failed");
                self.notifier.error(&e.to_string());
                None
            }
        }
    }

    async fn read_stream(
        &mut self,
        url: &str,
        cancel: &mut CancelListener,
    ) -> Result<ReadOutcome, StreamError> {
        let request = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str())
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            response = request => response.map_err(StreamError::HttpConnect)?,
        };

        if !response.status().is_success() {
            return Err(StreamError::HttpStatus(response.status().as_u16()));
        }

        info!(status = %response.status(), "connected to MJPEG stream");

        let mut byte_stream = response.bytes_stream();
        loop {
            // Cancellation seen between reads ends the stream quietly.
            if cancel.is_cancelled() {
                return Ok(ReadOutcome::Cancelled);
            }

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                chunk = byte_stream.next() => chunk,
            };

            match chunk {
                Some(chunk) => {
                    let chunk = chunk.map_err(StreamError::HttpStream)?;
                    self.ingest(&chunk);
                }
                None => return Ok(ReadOutcome::Ended),
            }
        }
    }

    /// Feed body bytes through the demuxer and process every completed frame.
    pub(crate) fn ingest(&mut self, chunk: &[u8]) {
        for piece in chunk.chunks(READ_CHUNK_SIZE) {
            self.demuxer.push(piece);
            for data in self.demuxer.drain_frames() {
                self.handle_frame(data);
            }
            if let Err(e) = self.demuxer.enforce_limit() {
                self.notifier.error(&e.to_string());
            }
        }
    }

    fn handle_frame(&mut self, data: Bytes) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = Frame::new(data, seq, Utc::now().timestamp_millis());

        debug_assert!(frame.has_jpeg_markers());
        debug!(seq, bytes = frame.payload_size(), "frame extracted");
        self.notifier.frame(&frame);

        let detector = &self.detector;
        match run_cpu_bound(|| detector.process(&frame)) {
            Ok(Outcome::Baseline) => {}
            Ok(Outcome::Compared { metrics, motion }) => {
                self.notifier.metrics(metrics);
                if motion {
                    info!(seq, ratio = format!("{:.3}", metrics.ratio), "motion detected");
                    self.notifier.motion();
                }
            }
            Err(e) => {
                warn!(error = %e, seq, "skipping undecodable frame");
                self.notifier.error(&e.to_string());
            }
        }
    }
}

/// Run CPU-heavy work without starving other tasks on a multi-threaded
/// runtime. Current-thread runtimes and plain threads run it inline.
fn run_cpu_bound<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
