//! The bus abstraction the session router core is written against.
//!
//! Request/reply is synchronous from the caller's perspective with a
//! per-call deadline; subscriptions are pull-based streams the caller
//! drains from its own task. Trace context rides on message headers in
//! both directions.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::MessagingError;

mod nats;

pub use nats::NatsMessaging;

/// Flattened message headers. One value per key is all the gateway needs;
/// the W3C trace context keys are injected and extracted through
/// [`crate::telemetry`].
pub type BusHeaders = HashMap<String, String>;

/// A message received from the bus, either as a reply or on a
/// subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: BusHeaders,
}

#[async_trait]
pub trait Messaging: Send + Sync {
    /// Request/reply with a per-call deadline. The current trace context
    /// is injected into the outbound headers.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<BusMessage, MessagingError>;

    /// Fire-and-forget publish. Errors only reflect local failures, not
    /// delivery.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), MessagingError>;

    /// Publish carrying a reply subject for out-of-band responses.
    async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), MessagingError>;

    /// Subscribe to a subject. The caller owns the returned subscription
    /// and must drain it from its own task.
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, MessagingError>;

    /// Drain the connection. In-flight subscriptions end after their
    /// buffered messages are delivered.
    async fn shutdown(&self);
}

#[async_trait]
pub trait Subscription: Send {
    /// Next message, or `None` once the subscription has ended.
    async fn next(&mut self) -> Option<BusMessage>;

    /// Stop receiving. Idempotent.
    async fn unsubscribe(&mut self) -> Result<(), MessagingError>;
}
