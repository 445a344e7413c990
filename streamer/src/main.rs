mod detection_log;

use camwatch_common::config::Config;
use camwatch_streamer::{run_supervised, Backoff, ChannelObserver, StreamEvent, StreamSession};
use chrono::Local;
use detection_log::DetectionLog;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Headless consumer of session events: logs them and keeps the detection log.
struct Monitor {
    log: DetectionLog,
    last_ratio: f32,
}

impl Monitor {
    fn new() -> Self {
        Self {
            log: DetectionLog::new(),
            last_ratio: 0.0,
        }
    }

    fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Frame(frame) => {
                debug!(
                    seq = frame.seq,
                    bytes = frame.payload_size(),
                    received_at = %frame.received_at(),
                    "frame received"
                );
            }
            StreamEvent::Metrics(sample) => {
                self.last_ratio = sample.ratio;
                debug!(
                    ratio = format!("{:.3}", sample.ratio),
                    changed = sample.changed,
                    total = sample.total,
                    "metrics"
                );
            }
            StreamEvent::Motion => {
                let entry = self.log.record(Local::now(), self.last_ratio);
                info!(detections = self.log.len(), "{}", entry.line());
            }
            StreamEvent::Error(message) => {
                error!(error = message, "stream error");
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let url_override = args.next();

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let url = url_override.unwrap_or_else(|| config.camera.url.clone());

    info!(
        url,
        width = config.session.downscale_width,
        height = config.session.downscale_height,
        ratio_threshold = config.session.ratio_threshold,
        channel_threshold = config.session.channel_threshold,
        cooldown_ms = config.session.cooldown_ms,
        "starting camwatch"
    );

    let (observer, mut events) = ChannelObserver::new();
    let mut session =
        match StreamSession::new(&config.camera, config.session.clone(), Arc::new(observer)) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to create session");
                std::process::exit(1);
            }
        };

    if let Err(e) = session.start(&url) {
        error!(error = %e, "failed to start session");
        std::process::exit(1);
    }

    let mut backoff = Backoff::from_config(&config.restart);
    let mut monitor = Monitor::new();
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("interrupted, shutting down");
    };

    if let Err(e) = run_supervised(
        &mut session,
        &url,
        &mut events,
        &mut backoff,
        shutdown,
        |event| monitor.handle(event),
    )
    .await
    {
        error!(error = %e, "failed to restart session");
    }

    session.dispose().await;
    for entry in monitor.log.entries() {
        debug!("{}", entry.line());
    }
    info!(detections = monitor.log.len(), "camwatch stopped");
}
