//! Process-wide session registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parallax_core::Messaging;

use crate::router::SessionRouter;

/// Maps session ids to their routers. Removal and shutdown share one
/// critical section so lookups never observe a half-removed session.
pub struct SessionManager {
    messaging: Arc<dyn Messaging>,
    sessions: Mutex<HashMap<String, Arc<SessionRouter>>>,
}

impl SessionManager {
    pub fn new(messaging: Arc<dyn Messaging>) -> Arc<Self> {
        Arc::new(Self {
            messaging,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Construct and register a router for a freshly started session. A
    /// duplicate session id displaces the previous router, which is shut
    /// down; the new registration wins.
    pub fn add(
        &self,
        session_id: &str,
        subscribe_subject: &str,
        publish_subject: &str,
        character_id: i32,
    ) -> Arc<SessionRouter> {
        let router = SessionRouter::new(
            Arc::clone(&self.messaging),
            session_id,
            subscribe_subject,
            publish_subject,
            character_id,
        );
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(displaced) = sessions.insert(session_id.to_string(), Arc::clone(&router)) {
            tracing::warn!(session_id, "duplicate session id, shutting down previous router");
            displaced.shutdown();
        }
        router
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionRouter>> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Deregister and shut down `router`. If the id has since been taken
    /// over by a newer router, only `router` itself is shut down.
    pub fn remove(&self, router: &Arc<SessionRouter>) {
        let mut sessions = self.sessions.lock().unwrap();
        let registered = sessions
            .get(router.session_id())
            .is_some_and(|current| Arc::ptr_eq(current, router));
        if registered {
            sessions.remove(router.session_id());
        }
        router.shutdown();
    }

    /// Shut down every active router and clear the registry. Idempotent.
    pub fn shutdown(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        for router in sessions.values() {
            router.shutdown();
        }
        sessions.clear();
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
