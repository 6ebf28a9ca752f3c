//! Outbound chat publisher.
//!
//! Chat fanned out to other clients comes back through the chatter
//! listener; this handler only pushes the client's own messages onto the
//! per-system chat subject, which it discovers and caches per system.

use std::sync::Arc;

use futures::FutureExt;
use parallax_core::{subjects, Messaging};
use parallax_proto::{
    ChatterTopicRequest, ChatterTopicResponse, SessionMessageRequest, SessionMessageType,
};
use prost::Message;
use tokio::sync::Mutex;

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::state::SessionState;

pub struct ChatterHandler {
    dispatcher: Arc<Dispatcher>,
}

#[derive(Default)]
struct ChatterRoute {
    system_id: i32,
    publish_subject: String,
}

struct ChatterInner {
    messaging: Arc<dyn Messaging>,
    state: Arc<SessionState>,
    route: Mutex<ChatterRoute>,
}

impl ChatterHandler {
    pub fn install(
        messaging: Arc<dyn Messaging>,
        state: Arc<SessionState>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let inner = Arc::new(ChatterInner {
            messaging,
            state,
            route: Mutex::new(ChatterRoute::default()),
        });

        let handler = Arc::clone(&inner);
        dispatcher.set(
            SessionMessageType::Chatter,
            Arc::new(move |msg| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_chatter(msg).await }.boxed()
            }),
        );

        Self { dispatcher }
    }

    pub async fn shutdown(&self) {
        self.dispatcher.clear(SessionMessageType::Chatter);
    }
}

impl ChatterInner {
    async fn handle_chatter(&self, msg: SessionMessageRequest) -> Result<(), SessionError> {
        if msg.r#type() != SessionMessageType::Chatter {
            return Ok(());
        }
        let Some(chatter) = msg.chatter else {
            return Ok(());
        };

        let mut route = self.route.lock().await;

        if route.system_id != chatter.system_id {
            let lookup = ChatterTopicRequest {
                system_id: chatter.system_id,
            };
            match self
                .messaging
                .request(
                    subjects::REQ_CHATTER_TOPIC,
                    lookup.encode_to_vec().into(),
                    subjects::REQUEST_TIMEOUT,
                )
                .await
                .map_err(SessionError::from)
                .and_then(|reply| Ok(ChatterTopicResponse::decode(reply.payload)?))
            {
                Ok(res) => {
                    if let Some(topics) = res.chatter_topics {
                        route.publish_subject = topics.publish_topic;
                        route.system_id = chatter.system_id;
                    }
                }
                Err(e) => {
                    tracing::warn!(system_id = chatter.system_id, error = %e, "chatter topic lookup failed");
                }
            }
        }

        // The character may have left the system between the client
        // composing the message and it arriving here; publish only while
        // cache, envelope and session state name the same system.
        let current = self.state.system_id();
        if route.system_id == current
            && current == chatter.system_id
            && !route.publish_subject.is_empty()
        {
            self.messaging
                .publish(&route.publish_subject, chatter.encode_to_vec().into())
                .await?;
        }

        Ok(())
    }
}
