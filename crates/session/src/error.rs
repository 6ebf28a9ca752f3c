//! Error types for the session router core

use parallax_core::MessagingError;
use thiserror::Error;

/// Errors that can terminate a session stream or fail a handler.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bus request or publish failed
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    /// A bus payload did not decode as the expected schema
    #[error("failed to decode bus payload: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The client half of the stream is gone
    #[error("client stream closed")]
    StreamClosed,

    /// The client transport reported an error
    #[error("client transport error: {0}")]
    Stream(#[from] tonic::Status),
}

impl SessionError {
    /// True for the ordinary end of a stream, as opposed to a failure.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, SessionError::StreamClosed)
    }
}
