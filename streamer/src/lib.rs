//! MJPEG camera streaming with frame-difference motion detection.
//!
//! A [`StreamSession`] reads a camera's HTTP response body on a background
//! task, cuts JPEG frames out of it by their start and end markers, and
//! compares each frame with the previous one. Results reach the caller
//! through a [`StreamObserver`].

mod cancel;
pub mod demux;
pub mod detector;
pub mod error;
pub mod observer;
mod reader;
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use camwatch_common::config::SessionConfig;
pub use camwatch_common::frame::{Frame, MetricsSample};
pub use detector::{MotionDetector, Outcome};
pub use error::{FrameError, SessionError, StreamError};
pub use observer::{ChannelObserver, StreamEvent, StreamObserver};
pub use reader::READ_CHUNK_SIZE;
pub use session::{SessionState, StreamSession};
pub use supervisor::{run_supervised, Backoff};
