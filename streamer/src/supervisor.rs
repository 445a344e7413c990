use std::future::Future;
use std::time::Duration;

use camwatch_common::config::RestartConfig;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::observer::StreamEvent;
use crate::session::{SessionState, StreamSession};

/// Exponential restart delay: starts at `initial`, doubles per attempt up to
/// `max`, and returns to `initial` after a session that delivered frames.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    pub fn from_config(config: &RestartConfig) -> Self {
        Self::new(
            Duration::from_secs(config.initial_backoff_secs),
            Duration::from_secs(config.max_backoff_secs),
        )
    }

    /// The delay to wait now; the following one is doubled.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.max, |d| d.min(self.max));
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Drive `session` until `shutdown` resolves, handing every event to
/// `handle` and restarting the worker with `backoff` each time it ends on
/// its own.
///
/// The session must already be started on `url`. Fails only when a
/// restart is rejected.
pub async fn run_supervised<S, H>(
    session: &mut StreamSession,
    url: &str,
    events: &mut UnboundedReceiver<StreamEvent>,
    backoff: &mut Backoff,
    shutdown: S,
    mut handle: H,
) -> Result<(), SessionError>
where
    S: Future<Output = ()>,
    H: FnMut(StreamEvent),
{
    tokio::pin!(shutdown);
    let mut progressed = false;
    let mut dispatch = |event: StreamEvent, progressed: &mut bool| {
        *progressed |= matches!(event, StreamEvent::Frame(_));
        handle(event);
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            event = events.recv() => match event {
                Some(event) => dispatch(event, &mut progressed),
                None => return Ok(()),
            },
            _ = session.finished(), if session.state() != SessionState::Idle => {
                // The worker may have queued events right before ending.
                while let Ok(event) = events.try_recv() {
                    dispatch(event, &mut progressed);
                }
                if std::mem::take(&mut progressed) {
                    backoff.reset();
                }
                let delay = backoff.next_delay();
                warn!(url, ?delay, "stream ended, restarting");
                tokio::select! {
                    _ = &mut shutdown => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
                session.start(url)?;
                info!(url, "stream restarted");
            }
        }
    }
}
