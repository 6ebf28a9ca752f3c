//! Stream sinks: the serialized write path to the client.
//!
//! Handlers, listeners and the bus fan-in all write to the same client
//! stream, so every write goes through one mpsc channel whose receiver is
//! the response stream. Relays (see the login handler) wrap a sink to
//! react to certain envelope types before forwarding.

use async_trait::async_trait;
use parallax_proto::SessionMessageResponse;
use tokio::sync::mpsc;

use crate::error::SessionError;

#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn send(&self, msg: SessionMessageResponse) -> Result<(), SessionError>;
}

/// The channel backing a session's gRPC response stream.
pub type ResponseSender = mpsc::Sender<Result<SessionMessageResponse, tonic::Status>>;

/// Sink writing into the session's response channel. A failed send means
/// the client half is gone; the failure is also reported on the router's
/// send-error channel so the stream tears down.
pub struct GrpcStreamSink {
    tx: ResponseSender,
    send_errors: mpsc::Sender<SessionError>,
}

impl GrpcStreamSink {
    pub fn new(tx: ResponseSender, send_errors: mpsc::Sender<SessionError>) -> Self {
        Self { tx, send_errors }
    }
}

#[async_trait]
impl StreamSink for GrpcStreamSink {
    async fn send(&self, msg: SessionMessageResponse) -> Result<(), SessionError> {
        if self.tx.send(Ok(msg)).await.is_err() {
            let _ = self.send_errors.try_send(SessionError::StreamClosed);
            return Err(SessionError::StreamClosed);
        }
        Ok(())
    }
}
