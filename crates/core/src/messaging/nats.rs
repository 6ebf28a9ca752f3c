//! NATS-backed implementation of the [`Messaging`] trait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::instrument;

use crate::error::MessagingError;
use crate::telemetry;

use super::{BusHeaders, BusMessage, Messaging, Subscription};

/// Bus client over a single NATS connection.
pub struct NatsMessaging {
    client: async_nats::Client,
}

impl NatsMessaging {
    /// Connect to the endpoint named by `NATS_ENDPOINT` / `--nats-endpoint`.
    pub async fn connect(endpoint: &str) -> Result<Self, MessagingError> {
        let client = async_nats::connect(endpoint)
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn outbound_headers() -> async_nats::HeaderMap {
        let mut headers = BusHeaders::new();
        telemetry::inject_current_context(&mut headers);
        let mut map = async_nats::HeaderMap::new();
        for (name, value) in &headers {
            map.insert(name.as_str(), value.as_str());
        }
        map
    }
}

fn convert_message(msg: async_nats::Message) -> BusMessage {
    let mut headers = BusHeaders::new();
    if let Some(header_map) = &msg.headers {
        for (name, values) in header_map.iter() {
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }
    BusMessage {
        subject: msg.subject.to_string(),
        payload: msg.payload,
        headers,
    }
}

#[async_trait]
impl Messaging for NatsMessaging {
    #[instrument(skip(self, payload), fields(nats.subject = subject))]
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<BusMessage, MessagingError> {
        let headers = Self::outbound_headers();
        let fut = self
            .client
            .request_with_headers(subject.to_string(), headers, payload);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(reply)) => Ok(convert_message(reply)),
            Ok(Err(e)) => Err(MessagingError::Transport(e.to_string())),
            Err(_) => Err(MessagingError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    #[instrument(skip(self, payload), fields(nats.subject = subject))]
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), MessagingError> {
        let headers = Self::outbound_headers();
        self.client
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))
    }

    #[instrument(skip(self, payload), fields(nats.subject = subject, nats.reply = reply))]
    async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), MessagingError> {
        let headers = Self::outbound_headers();
        self.client
            .publish_with_reply_and_headers(
                subject.to_string(),
                reply.to_string(),
                headers,
                payload,
            )
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, MessagingError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        Ok(Box::new(NatsSubscription { subscriber }))
    }

    async fn shutdown(&self) {
        if let Err(e) = self.client.drain().await {
            tracing::warn!(error = %e, "failed to drain NATS connection");
        }
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        self.subscriber.next().await.map(convert_message)
    }

    async fn unsubscribe(&mut self) -> Result<(), MessagingError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))
    }
}
