//! Inbound message dispatch registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use parallax_proto::{SessionMessageRequest, SessionMessageType};

use crate::error::SessionError;

pub type HandlerFuture = BoxFuture<'static, Result<(), SessionError>>;

/// A registered handler for one envelope type. Handlers receive the whole
/// envelope and own their reply path; a returned error terminates the
/// session stream.
pub type DispatchHandler = Arc<dyn Fn(SessionMessageRequest) -> HandlerFuture + Send + Sync>;

/// Registry mapping envelope type to handler. Re-registering a type is
/// last-writer-wins; lookups are point-in-time.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<SessionMessageType, DispatchHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, message_type: SessionMessageType, handler: DispatchHandler) {
        self.handlers.lock().unwrap().insert(message_type, handler);
    }

    pub fn clear(&self, message_type: SessionMessageType) {
        self.handlers.lock().unwrap().remove(&message_type);
    }

    pub fn get(&self, message_type: SessionMessageType) -> Option<DispatchHandler> {
        self.handlers.lock().unwrap().get(&message_type).cloned()
    }
}
