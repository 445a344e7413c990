use std::sync::Arc;

use camwatch_common::config::{CameraConfig, SessionConfig};
use reqwest::Url;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cancel::{cancel_pair, CancelHandle, CompletionGuard};
use crate::detector::MotionDetector;
use crate::error::SessionError;
use crate::observer::{Notifier, StreamObserver};
use crate::reader::StreamReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// The worker ended on its own (stream closed or transport error).
    Stopped,
}

struct Worker {
    url: String,
    cancel: CancelHandle,
    done: watch::Receiver<bool>,
}

impl Worker {
    fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    async fn wait(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|d| *d).await;
    }
}

/// Owns the background worker that streams one camera URL.
///
/// At most one worker is tracked at a time. Notifications are delivered
/// to the observer on the worker task.
pub struct StreamSession {
    client: reqwest::Client,
    user_agent: String,
    detector: Arc<MotionDetector>,
    notifier: Notifier,
    worker: Option<Worker>,
}

impl StreamSession {
    pub fn new(
        camera: &CameraConfig,
        config: SessionConfig,
        observer: Arc<dyn StreamObserver>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(camera.connect_timeout())
            .build()
            .map_err(SessionError::HttpClient)?;
        Ok(Self {
            client,
            user_agent: camera.user_agent.clone(),
            detector: Arc::new(MotionDetector::new(config)),
            notifier: Notifier::new(observer),
            worker: None,
        })
    }

    /// Start streaming `url` on a new background task.
    ///
    /// A worker that is still running is cancelled but not awaited; use
    /// [`StreamSession::restart`] to wait for it first.
    pub fn start(&mut self, url: &str) -> Result<(), SessionError> {
        let url = validate_url(url)?;

        if let Some(previous) = self.worker.take() {
            debug!(url = previous.url, "cancelling previous worker");
            previous.cancel.cancel();
        }

        let (cancel, listener) = cancel_pair();
        let (guard, done) = CompletionGuard::new();
        let reader = StreamReader::new(
            self.client.clone(),
            self.user_agent.clone(),
            Arc::clone(&self.detector),
            self.notifier.clone(),
        );

        let task_url = url.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            reader.run(&task_url, listener).await;
        });

        info!(url = %url, "session started");
        self.worker = Some(Worker {
            url: url.to_string(),
            cancel,
            done,
        });
        Ok(())
    }

    /// Cancel the worker, wait for it to finish and release the retained
    /// raster. A no-op when idle.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.cancel();
        worker.wait().await;
        self.detector.reset();
        info!(url = worker.url, "session stopped");
    }

    /// Stop and release everything the session holds.
    pub async fn dispose(mut self) {
        self.stop().await;
    }

    /// Fully stop any running worker, then start streaming `url`.
    pub async fn restart(&mut self, url: &str) -> Result<(), SessionError> {
        validate_url(url)?;
        self.stop().await;
        self.start(url)
    }

    /// Resolves when the current worker has finished. Returns at once when idle.
    pub async fn finished(&self) {
        if let Some(worker) = &self.worker {
            worker.wait().await;
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.worker {
            None => SessionState::Idle,
            Some(worker) if worker.is_done() => SessionState::Stopped,
            Some(_) => SessionState::Running,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.worker.as_ref().map(|w| w.url.as_str())
    }

    pub fn detector(&self) -> &MotionDetector {
        &self.detector
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

fn validate_url(url: &str) -> Result<Url, SessionError> {
    let invalid = |reason: String| SessionError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(invalid("URL is empty".into()));
    }
    let parsed = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{other}', expected http(s)"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::observer::{ChannelObserver, StreamEvent};
    use crate::test_support::{encode_jpeg, fake_camera, next_event, test_config, CameraBody};
    use camwatch_common::frame::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (StreamSession, UnboundedReceiver<StreamEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let camera = CameraConfig {
            user_agent: "camwatch-test/1.0 (MJPEG)".into(),
            ..CameraConfig::default()
        };
        let session = StreamSession::new(&camera, test_config(), Arc::new(observer)).unwrap();
        (session, rx)
    }

    fn cancelled() -> StreamEvent {
        StreamEvent::Error(StreamError::Cancelled.to_string())
    }

    async fn next_skipping_cancel(rx: &mut UnboundedReceiver<StreamEvent>) -> StreamEvent {
        loop {
            let event = next_event(rx).await;
            if event != cancelled() {
                return event;
            }
        }
    }

    async fn finished(session: &StreamSession) {
        tokio::time::timeout(Duration::from_secs(5), session.finished())
            .await
            .expect("worker did not finish");
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let (mut session, _rx) = session();
        assert_eq!(session.state(), SessionState::Idle);
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.url().is_none());
    }

    #[tokio::test]
    async fn start_rejects_invalid_urls() {
        let (mut session, _rx) = session();
        for url in ["", "   ", "not a url", "rtsp://camera/stream"] {
            assert!(matches!(
                session.start(url),
                Err(SessionError::InvalidUrl { .. })
            ));
        }
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let (observer, _rx) = ChannelObserver::new();
        let config = SessionConfig {
            downscale_height: 0,
            ..SessionConfig::default()
        };
        let result = StreamSession::new(&CameraConfig::default(), config, Arc::new(observer));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn session_runs_until_stream_ends() {
        let dark = encode_jpeg(32, 24, [0, 0, 0]);
        let bright = encode_jpeg(32, 24, [255, 255, 255]);
        let camera = fake_camera("200 OK", CameraBody::closing(vec![dark, bright])).await;

        let (mut session, mut rx) = session();
        session.start(&camera.url).unwrap();
        assert_eq!(session.url(), Some(camera.url.as_str()));
        finished(&session).await;
        assert_eq!(session.state(), SessionState::Stopped);

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Frame(f) if f.seq == 0));
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Frame(f) if f.seq == 1));
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Metrics(m) if m.total == 16 * 12));
        assert_eq!(next_event(&mut rx).await, StreamEvent::Motion);
        assert!(rx.try_recv().is_err());

        // A finished session still owns its baseline until stopped.
        assert!(session.detector().has_baseline());
        session.stop().await;
        assert!(!session.detector().has_baseline());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn transport_error_stops_session() {
        let camera = fake_camera("503 Service Unavailable", CameraBody::closing(vec![])).await;
        let (mut session, mut rx) = session();
        session.start(&camera.url).unwrap();
        finished(&session).await;

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Error("HTTP status 503".into())
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_cancels_open_stream_and_releases_baseline() {
        let camera = fake_camera(
            "200 OK",
            CameraBody::held_open(vec![encode_jpeg(32, 24, [70, 70, 70])]),
        )
        .await;
        let (mut session, mut rx) = session();
        session.start(&camera.url).unwrap();

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Frame(_)));
        // The baseline is stored right after the frame notification.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !session.detector().has_baseline() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(session.state(), SessionState::Running);

        tokio::time::timeout(Duration::from_secs(5), session.stop())
            .await
            .expect("stop did not complete");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.detector().has_baseline());
        // The interrupted read is reported once.
        assert_eq!(rx.try_recv().ok(), Some(cancelled()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_replaces_running_worker() {
        let first = fake_camera(
            "200 OK",
            CameraBody::held_open(vec![encode_jpeg(32, 24, [0, 0, 0])]),
        )
        .await;
        let second = fake_camera(
            "200 OK",
            CameraBody::held_open(vec![encode_jpeg(32, 24, [0, 0, 0])]),
        )
        .await;

        let (mut session, mut rx) = session();
        session.start(&first.url).unwrap();
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Frame(f) if f.seq == 0));

        session.start(&second.url).unwrap();
        assert_eq!(session.url(), Some(second.url.as_str()));
        // The new worker numbers its frames from zero again and compares
        // against the baseline left by the previous one. The replaced
        // worker's cancellation report may interleave.
        assert!(matches!(next_skipping_cancel(&mut rx).await, StreamEvent::Frame(f) if f.seq == 0));
        assert!(matches!(next_skipping_cancel(&mut rx).await, StreamEvent::Metrics(m) if m.changed == 0));

        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn restart_waits_for_previous_worker() {
        let first = fake_camera(
            "200 OK",
            CameraBody::held_open(vec![encode_jpeg(32, 24, [0, 0, 0])]),
        )
        .await;
        let second = fake_camera(
            "200 OK",
            CameraBody::closing(vec![encode_jpeg(32, 24, [255, 255, 255])]),
        )
        .await;

        let (mut session, mut rx) = session();
        session.start(&first.url).unwrap();
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Frame(_)));

        session.restart(&second.url).await.unwrap();
        finished(&session).await;
        // The first worker reported its cancellation before the second began.
        assert_eq!(next_event(&mut rx).await, cancelled());
        // The old baseline was released, so the bright frame is a new baseline.
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Frame(f) if f.seq == 0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_observer_does_not_stop_worker() {
        struct PanicsOnFrame {
            metrics: AtomicUsize,
        }

        impl StreamObserver for PanicsOnFrame {
            fn on_frame(&self, _frame: &Frame) {
                panic!("render failed");
            }

            fn on_metrics(&self, _sample: camwatch_common::frame::MetricsSample) {
                self.metrics.fetch_add(1, Ordering::SeqCst);
            }
        }

        let jpeg = encode_jpeg(32, 24, [10, 20, 30]);
        let camera = fake_camera(
            "200 OK",
            CameraBody::closing(vec![jpeg.clone(), jpeg.clone(), jpeg]),
        )
        .await;

        let observer = Arc::new(PanicsOnFrame {
            metrics: AtomicUsize::new(0),
        });
        let mut session =
            StreamSession::new(&CameraConfig::default(), test_config(), observer.clone()).unwrap();
        session.start(&camera.url).unwrap();
        finished(&session).await;

        assert_eq!(observer.metrics.load(Ordering::SeqCst), 2);
        session.dispose().await;
    }
}
