//! Static-info request handlers (character, system).
//!
//! These are plain request/reply proxies: forward the lookup to the
//! backing service, answer on the stream with the same envelope type.
//! Failures never terminate the stream; the client gets `ok = false`.

use std::sync::Arc;

use futures::FutureExt;
use parallax_core::{subjects, Messaging};
use parallax_proto::{
    CharacterStaticInfoRequest, CharacterStaticInfoResponse, SessionMessageRequest,
    SessionMessageResponse, SessionMessageType, SystemStaticInfoRequest, SystemStaticInfoResponse,
};
use prost::Message;

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::sink::StreamSink;

pub struct InfoHandler {
    dispatcher: Arc<Dispatcher>,
}

struct InfoInner {
    messaging: Arc<dyn Messaging>,
    sink: Arc<dyn StreamSink>,
}

impl InfoHandler {
    pub fn install(
        messaging: Arc<dyn Messaging>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn StreamSink>,
    ) -> Self {
        let inner = Arc::new(InfoInner { messaging, sink });

        let handler = Arc::clone(&inner);
        dispatcher.set(
            SessionMessageType::CharacterStaticInfo,
            Arc::new(move |msg| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_character_static(msg).await }.boxed()
            }),
        );

        let handler = Arc::clone(&inner);
        dispatcher.set(
            SessionMessageType::SystemStaticInfo,
            Arc::new(move |msg| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_system_static(msg).await }.boxed()
            }),
        );

        Self { dispatcher }
    }

    pub async fn shutdown(&self) {
        self.dispatcher.clear(SessionMessageType::CharacterStaticInfo);
        self.dispatcher.clear(SessionMessageType::SystemStaticInfo);
    }
}

impl InfoInner {
    async fn handle_character_static(
        &self,
        msg: SessionMessageRequest,
    ) -> Result<(), SessionError> {
        let mut response = SessionMessageResponse {
            r#type: SessionMessageType::CharacterStaticInfo as i32,
            ..Default::default()
        };

        let request = CharacterStaticInfoRequest {
            character_id: msg.character_id,
        };
        match self
            .messaging
            .request(
                subjects::REQ_CHARACTER_STATIC,
                request.encode_to_vec().into(),
                subjects::REQUEST_TIMEOUT,
            )
            .await
            .map_err(SessionError::from)
            .and_then(|reply| Ok(CharacterStaticInfoResponse::decode(reply.payload)?))
        {
            Ok(res) => {
                response.ok = res.ok;
                response.character_static_info = res.character_static_info;
            }
            Err(e) => {
                tracing::warn!(character_id = msg.character_id, error = %e, "character static info failed");
            }
        }

        let _ = self.sink.send(response).await;
        Ok(())
    }

    async fn handle_system_static(&self, msg: SessionMessageRequest) -> Result<(), SessionError> {
        let mut response = SessionMessageResponse {
            r#type: SessionMessageType::SystemStaticInfo as i32,
            ..Default::default()
        };

        let request = SystemStaticInfoRequest {
            system_id: msg.system_id,
        };
        match self
            .messaging
            .request(
                subjects::REQ_SYSTEM_STATIC,
                request.encode_to_vec().into(),
                subjects::REQUEST_TIMEOUT,
            )
            .await
            .map_err(SessionError::from)
            .and_then(|reply| Ok(SystemStaticInfoResponse::decode(reply.payload)?))
        {
            Ok(res) => {
                response.ok = res.ok;
                response.system_static_info = res.system_static_info;
            }
            Err(e) => {
                tracing::warn!(system_id = msg.system_id, error = %e, "system static info failed");
            }
        }

        let _ = self.sink.send(response).await;
        Ok(())
    }
}
