//! Shared harness for session integration tests: a scripted world on the
//! mock bus and a recording stream sink.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parallax_core::subjects;
use parallax_core::testing::MockMessaging;
use parallax_proto::{
    CharacterLiveInfoMessage, CharacterLiveInfoRequest, CharacterLiveInfoResponse,
    CharacterLoginResponse, CharacterLogoutResponse, CharacterTopicRequest,
    CharacterTopicResponse, ChatterTopicRequest, ChatterTopicResponse, ChatterTopics,
    EntityTopics, SessionMessageRequest, SessionMessageResponse, SessionMessageType,
    SystemLiveInfoMessage, SystemLiveInfoRequest, SystemLiveInfoResponse, SystemTopicRequest,
    SystemTopicResponse,
};
use parallax_session::{SessionError, StreamSink};
use prost::Message;

pub const SELF_CHARACTER: i32 = 42;
pub const HOME_SYSTEM: i32 = 7;

pub const REQ_CHARACTER_LIVE: &str = "REQ.CHARACTER.LIVE";
pub const REQ_SYSTEM_LIVE: &str = "REQ.SYSTEM.LIVE";

pub fn character_feed(character_id: i32) -> String {
    format!("LIVE.CHAR.{character_id}")
}

pub fn system_feed(system_id: i32) -> String {
    format!("LIVE.SYS.{system_id}")
}

pub fn chatter_feed(system_id: i32) -> String {
    format!("CHAT.SUB.{system_id}")
}

/// Script the backend services character 42 needs: login/logout, topic
/// discovery for characters, systems and chatter, and live snapshots.
/// The character starts in [`HOME_SYSTEM`].
pub fn script_world(bus: &Arc<MockMessaging>) {
    bus.handle_request(subjects::REQ_CHARACTER_LOGIN, |_payload| {
        let response = CharacterLoginResponse {
            ok: true,
            character_id: SELF_CHARACTER,
            character_live_info: Some(CharacterLiveInfoMessage {
                character_id: SELF_CHARACTER,
                system_id: HOME_SYSTEM,
            }),
        };
        Ok(response.encode_to_vec().into())
    });

    bus.handle_request(subjects::REQ_CHARACTER_LOGOUT, |_payload| {
        let response = CharacterLogoutResponse { ok: true };
        Ok(response.encode_to_vec().into())
    });

    bus.handle_request(subjects::REQ_CHARACTER_TOPIC, |payload| {
        let request = CharacterTopicRequest::decode(payload).expect("character topic request");
        let response = CharacterTopicResponse {
            character_topics: Some(EntityTopics {
                subscribe_topic: character_feed(request.character_id),
                request_topic: REQ_CHARACTER_LIVE.to_string(),
            }),
        };
        Ok(response.encode_to_vec().into())
    });

    bus.handle_request(REQ_CHARACTER_LIVE, |payload| {
        let request = CharacterLiveInfoRequest::decode(payload).expect("character live request");
        let response = CharacterLiveInfoResponse {
            ok: true,
            character_live_info: Some(CharacterLiveInfoMessage {
                character_id: request.character_id,
                system_id: HOME_SYSTEM,
            }),
        };
        Ok(response.encode_to_vec().into())
    });

    bus.handle_request(subjects::REQ_SYSTEM_TOPIC, |payload| {
        let request = SystemTopicRequest::decode(payload).expect("system topic request");
        let response = SystemTopicResponse {
            system_topics: Some(EntityTopics {
                subscribe_topic: system_feed(request.system_id),
                request_topic: REQ_SYSTEM_LIVE.to_string(),
            }),
        };
        Ok(response.encode_to_vec().into())
    });

    bus.handle_request(REQ_SYSTEM_LIVE, |payload| {
        let request = SystemLiveInfoRequest::decode(payload).expect("system live request");
        let response = SystemLiveInfoResponse {
            ok: true,
            system_live_info: Some(SystemLiveInfoMessage {
                system_id: request.system_id,
                character_id: vec![],
            }),
        };
        Ok(response.encode_to_vec().into())
    });

    bus.handle_request(subjects::REQ_CHATTER_TOPIC, |payload| {
        let request = ChatterTopicRequest::decode(payload).expect("chatter topic request");
        let response = ChatterTopicResponse {
            chatter_topics: Some(ChatterTopics {
                subscribe_topic: chatter_feed(request.system_id),
                publish_topic: format!("CHAT.PUB.{}", request.system_id),
            }),
        };
        Ok(response.encode_to_vec().into())
    });
}

pub fn login_request() -> SessionMessageRequest {
    SessionMessageRequest {
        r#type: SessionMessageType::Login as i32,
        ..Default::default()
    }
}

pub fn logout_request() -> SessionMessageRequest {
    SessionMessageRequest {
        r#type: SessionMessageType::Logout as i32,
        ..Default::default()
    }
}

pub fn character_live_payload(character_id: i32, system_id: i32) -> bytes::Bytes {
    CharacterLiveInfoMessage {
        character_id,
        system_id,
    }
    .encode_to_vec()
    .into()
}

pub fn system_live_payload(system_id: i32, character_ids: &[i32]) -> bytes::Bytes {
    SystemLiveInfoMessage {
        system_id,
        character_id: character_ids.to_vec(),
    }
    .encode_to_vec()
    .into()
}

/// Sink that records every envelope instead of writing to a stream.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<SessionMessageResponse>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<SessionMessageResponse> {
        self.messages.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<SessionMessageType> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.r#type())
            .collect()
    }
}

#[async_trait]
impl StreamSink for RecordingSink {
    async fn send(&self, msg: SessionMessageResponse) -> Result<(), SessionError> {
        self.messages.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Poll until `condition` holds; panics after five seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(deadline.is_ok(), "timed out waiting for {what}");
}
