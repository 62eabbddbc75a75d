//! Frame-level errors raised before a frame reaches the hook pipeline.

use thiserror::Error;

/// Why an inbound text frame could not become a command payload.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON at all. The connection is closed.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("frame is not a JSON object")]
    NotObject,

    /// Object without a string `cmd` field.
    #[error("frame has no string `cmd` field")]
    MissingCommand,
}

impl FrameError {
    /// Malformed JSON closes the socket; shape errors are dropped silently.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
