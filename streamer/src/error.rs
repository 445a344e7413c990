/// Failures that end a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    /// Cancellation interrupted a pending connect or body read.
    #[error("stream cancelled")]
    Cancelled,
}

/// Failures confined to a single frame; streaming continues afterwards.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to decode frame {seq}: {source}")]
    Decode {
        seq: u64,
        #[source]
        source: image::ImageError,
    },
    #[error("decoded frame {seq} has no pixels")]
    EmptyImage { seq: u64 },
    #[error("frame buffer exceeded {limit} bytes without an end marker; discarded {discarded} bytes")]
    BufferOverflow { limit: usize, discarded: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid camera URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("config error: {0}")]
    Config(#[from] camwatch_common::config::ConfigError),
}
