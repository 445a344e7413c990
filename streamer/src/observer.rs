use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use camwatch_common::frame::{Frame, MetricsSample};
use tokio::sync::mpsc;
use tracing::warn;

/// Receiver of session notifications.
///
/// Every method is called synchronously on the session's worker task, in
/// stream order. Implementations that need another execution context must
/// hand the data off themselves.
pub trait StreamObserver: Send + Sync {
    /// A complete JPEG frame was extracted from the stream.
    fn on_frame(&self, _frame: &Frame) {}

    /// Change measurement for every frame after the first.
    fn on_metrics(&self, _sample: MetricsSample) {}

    /// Motion crossed the ratio threshold with the cooldown elapsed.
    fn on_motion(&self) {}

    /// Transport failure (ends the session) or per-frame failure (does not).
    fn on_error(&self, _message: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame(Frame),
    Metrics(MetricsSample),
    Motion,
    Error(String),
}

/// Forwards notifications into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: StreamEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl StreamObserver for ChannelObserver {
    fn on_frame(&self, frame: &Frame) {
        self.send(StreamEvent::Frame(frame.clone()));
    }

    fn on_metrics(&self, sample: MetricsSample) {
        self.send(StreamEvent::Metrics(sample));
    }

    fn on_motion(&self) {
        self.send(StreamEvent::Motion);
    }

    fn on_error(&self, message: &str) {
        self.send(StreamEvent::Error(message.to_string()));
    }
}

/// Delivers notifications to an observer, isolating the worker from
/// panics raised inside observer callbacks.
#[derive(Clone)]
pub(crate) struct Notifier {
    observer: Arc<dyn StreamObserver>,
}

impl Notifier {
    pub(crate) fn new(observer: Arc<dyn StreamObserver>) -> Self {
        Self { observer }
    }

    pub(crate) fn frame(&self, frame: &Frame) {
        self.dispatch("frame", |o| o.on_frame(frame));
    }

    pub(crate) fn metrics(&self, sample: MetricsSample) {
        self.dispatch("metrics", |o| o.on_metrics(sample));
    }

    pub(crate) fn motion(&self) {
        self.dispatch("motion", |o| o.on_motion());
    }

    pub(crate) fn error(&self, message: &str) {
        self.dispatch("error", |o| o.on_error(message));
    }

    fn dispatch(&self, kind: &'static str, f: impl FnOnce(&dyn StreamObserver)) {
        let observer = self.observer.as_ref();
        if panic::catch_unwind(AssertUnwindSafe(|| f(observer))).is_err() {
            warn!(kind, "observer panicked, notification dropped");
        }
    }
}
