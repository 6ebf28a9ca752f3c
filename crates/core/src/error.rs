//! Error types for the messaging layer

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::Messaging`] operations.
///
/// Decode failures are not represented here: the bus carries opaque bytes
/// and payload decoding belongs to the caller.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No reply arrived within the per-call deadline
    #[error("request to {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    /// Local transport failure (connection lost, no responders, ...)
    #[error("bus transport error: {0}")]
    Transport(String),

    /// The connection has been drained or closed
    #[error("bus connection closed")]
    Closed,
}

impl MessagingError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MessagingError::Timeout { .. })
    }
}
