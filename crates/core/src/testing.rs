//! Scripted in-memory bus for exercising the session router core.
//!
//! Tests program request handlers per subject, push messages into live
//! subscriptions, and assert on the recorded traffic — including how many
//! subscriptions are still active, which is how listener-leak properties
//! are checked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::MessagingError;
use crate::messaging::{BusHeaders, BusMessage, Messaging, Subscription};

type RequestHandler = Arc<dyn Fn(Bytes) -> Result<Bytes, MessagingError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub subject: String,
    pub payload: Bytes,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

#[derive(Default)]
struct MockState {
    handlers: HashMap<String, RequestHandler>,
    requests: Vec<RecordedRequest>,
    publishes: Vec<RecordedPublish>,
    subscriptions: HashMap<u64, SubEntry>,
    subscribe_log: Vec<String>,
    unsubscribe_log: Vec<String>,
    next_id: u64,
}

struct SubEntry {
    subject: String,
    tx: mpsc::UnboundedSender<BusMessage>,
}

pub struct MockMessaging {
    state: Arc<Mutex<MockState>>,
}

impl MockMessaging {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(MockState::default())),
        })
    }

    /// Script the reply for a request subject.
    pub fn handle_request<F>(&self, subject: &str, handler: F)
    where
        F: Fn(Bytes) -> Result<Bytes, MessagingError> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        state
            .handlers
            .insert(subject.to_string(), Arc::new(handler));
    }

    /// Deliver a message to every live subscriber of `subject`. Returns
    /// the number of subscriptions it reached.
    pub fn push(&self, subject: &str, payload: Bytes) -> usize {
        let state = self.state.lock().unwrap();
        let mut delivered = 0;
        for entry in state.subscriptions.values() {
            if entry.subject == subject {
                let msg = BusMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                    headers: BusHeaders::new(),
                };
                if entry.tx.send(msg).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self, subject: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.subject == subject)
            .count()
    }

    pub fn publishes(&self) -> Vec<RecordedPublish> {
        self.state.lock().unwrap().publishes.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }

    pub fn active_subscriptions_for(&self, subject: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.subject == subject)
            .count()
    }

    pub fn subscribe_log(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribe_log.clone()
    }

    pub fn unsubscribe_log(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribe_log.clone()
    }
}

#[async_trait]
impl Messaging for MockMessaging {
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<BusMessage, MessagingError> {
        let handler = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(RecordedRequest {
                subject: subject.to_string(),
                payload: payload.clone(),
                timeout,
            });
            state.handlers.get(subject).cloned()
        };
        let handler = handler.ok_or_else(|| {
            MessagingError::Transport(format!("no responder scripted for {subject}"))
        })?;
        let reply = handler(payload)?;
        Ok(BusMessage {
            subject: subject.to_string(),
            payload: reply,
            headers: BusHeaders::new(),
        })
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), MessagingError> {
        let mut state = self.state.lock().unwrap();
        state.publishes.push(RecordedPublish {
            subject: subject.to_string(),
            reply: None,
            payload,
        });
        Ok(())
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), MessagingError> {
        let mut state = self.state.lock().unwrap();
        state.publishes.push(RecordedPublish {
            subject: subject.to_string(),
            reply: Some(reply.to_string()),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, MessagingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribe_log.push(subject.to_string());
            state.subscriptions.insert(
                id,
                SubEntry {
                    subject: subject.to_string(),
                    tx,
                },
            );
            id
        };
        Ok(Box::new(MockSubscription {
            id,
            subject: subject.to_string(),
            rx,
            state: Arc::clone(&self.state),
        }))
    }

    async fn shutdown(&self) {
        self.state.lock().unwrap().subscriptions.clear();
    }
}

struct MockSubscription {
    id: u64,
    subject: String,
    rx: mpsc::UnboundedReceiver<BusMessage>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Subscription for MockSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<(), MessagingError> {
        let mut state = self.state.lock().unwrap();
        if state.subscriptions.remove(&self.id).is_some() {
            state.unsubscribe_log.push(self.subject.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_request_replies_and_records() {
        let bus = MockMessaging::new();
        bus.handle_request("REQ.TEST", |payload| Ok(payload));

        let reply = bus
            .request("REQ.TEST", Bytes::from_static(b"ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"ping"));
        assert_eq!(bus.request_count("REQ.TEST"), 1);
        assert_eq!(bus.requests()[0].timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unscripted_request_fails() {
        let bus = MockMessaging::new();
        let err = bus
            .request("REQ.NONE", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Transport(_)));
    }

    #[tokio::test]
    async fn push_reaches_live_subscribers_until_unsubscribe() {
        let bus = MockMessaging::new();
        let mut sub = bus.subscribe("LIVE.X").await.unwrap();
        assert_eq!(bus.active_subscriptions(), 1);

        assert_eq!(bus.push("LIVE.X", Bytes::from_static(b"a")), 1);
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.payload, Bytes::from_static(b"a"));

        sub.unsubscribe().await.unwrap();
        sub.unsubscribe().await.unwrap(); // idempotent
        assert_eq!(bus.active_subscriptions(), 0);
        assert_eq!(bus.push("LIVE.X", Bytes::from_static(b"b")), 0);
        assert_eq!(bus.unsubscribe_log(), vec!["LIVE.X".to_string()]);
    }
}
