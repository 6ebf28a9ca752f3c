//! Live listeners: background subscribers to per-entity bus feeds.
//!
//! A listener is built in three steps: discover the entity's topics via a
//! `REQ.*.TOPIC` request, subscribe-and-forward the push feed if one was
//! returned, and fetch an initial snapshot over the returned request topic
//! if there is one. Construction is best-effort: a failed lookup still
//! yields a handle, just without a running forwarder.

use std::sync::Arc;

use bytes::Bytes;
use parallax_core::{subjects, telemetry, Messaging, Subscription};
use parallax_proto::{
    CharacterLiveInfoRequest, CharacterLiveInfoResponse, CharacterTopicRequest,
    CharacterTopicResponse, ChatterMessage, ChatterTopicRequest, ChatterTopicResponse,
    SessionMessageResponse, SessionMessageType, SystemLiveInfoRequest, SystemLiveInfoResponse,
    SystemTopicRequest, SystemTopicResponse,
};
use prost::Message;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::sink::StreamSink;

type DecodeFn = fn(Bytes) -> Result<SessionMessageResponse, prost::DecodeError>;

/// Handle to one running listener. Shutdown consumes the handle: it
/// cancels the forwarder, waits for the unsubscribe, and cannot be called
/// twice on the same listener.
pub struct LiveListener {
    entity_id: i32,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveListener {
    fn new(entity_id: i32, cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self {
            entity_id,
            cancel,
            task,
        }
    }

    pub fn entity_id(&self) -> i32 {
        self.entity_id
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(entity_id = self.entity_id, error = %e, "listener task join failed");
            }
        }
    }
}

async fn run_forward(
    mut sub: Box<dyn Subscription>,
    cancel: CancellationToken,
    sink: Arc<dyn StreamSink>,
    decode: DecodeFn,
    kind: &'static str,
    entity_id: i32,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = sub.next() => match maybe {
                Some(msg) => msg,
                None => break,
            },
        };

        let envelope = match decode(msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(kind, entity_id, error = %e, "dropping undecodable bus message");
                continue;
            }
        };

        let span = tracing::debug_span!("forward", kind, entity_id);
        telemetry::attach_context(&span, &msg.headers);
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sink.send(envelope).instrument(span) => result,
        };
        if sent.is_err() {
            break;
        }
    }

    if let Err(e) = sub.unsubscribe().await {
        tracing::debug!(kind, entity_id, error = %e, "unsubscribe failed");
    }
    tracing::debug!(kind, entity_id, "listener stopped");
}

async fn subscribe_and_forward(
    messaging: &Arc<dyn Messaging>,
    topic: &str,
    cancel: &CancellationToken,
    sink: &Arc<dyn StreamSink>,
    decode: DecodeFn,
    kind: &'static str,
    entity_id: i32,
) -> Option<JoinHandle<()>> {
    match messaging.subscribe(topic).await {
        Ok(sub) => Some(tokio::spawn(run_forward(
            sub,
            cancel.clone(),
            Arc::clone(sink),
            decode,
            kind,
            entity_id,
        ))),
        Err(e) => {
            tracing::warn!(kind, entity_id, topic, error = %e, "live feed subscribe failed");
            None
        }
    }
}

fn decode_character_live(payload: Bytes) -> Result<SessionMessageResponse, prost::DecodeError> {
    let info = parallax_proto::CharacterLiveInfoMessage::decode(payload)?;
    Ok(SessionMessageResponse {
        r#type: SessionMessageType::CharacterLiveInfo as i32,
        character_live_info: Some(info),
        ..Default::default()
    })
}

fn decode_system_live(payload: Bytes) -> Result<SessionMessageResponse, prost::DecodeError> {
    let info = parallax_proto::SystemLiveInfoMessage::decode(payload)?;
    Ok(SessionMessageResponse {
        r#type: SessionMessageType::SystemLiveInfo as i32,
        system_live_info: Some(info),
        ..Default::default()
    })
}

fn decode_chatter(payload: Bytes) -> Result<SessionMessageResponse, prost::DecodeError> {
    let chatter = ChatterMessage::decode(payload)?;
    Ok(SessionMessageResponse {
        r#type: SessionMessageType::Chatter as i32,
        chatter: Some(chatter),
        ..Default::default()
    })
}

/// Listener on a character's live-info feed, with an initial snapshot.
pub(crate) async fn spawn_character_listener(
    messaging: &Arc<dyn Messaging>,
    character_id: i32,
    sink: Arc<dyn StreamSink>,
) -> LiveListener {
    let cancel = CancellationToken::new();
    let mut task = None;
    let mut request_topic = String::new();

    let lookup = CharacterTopicRequest { character_id };
    match messaging
        .request(
            subjects::REQ_CHARACTER_TOPIC,
            lookup.encode_to_vec().into(),
            subjects::REQUEST_TIMEOUT,
        )
        .await
        .map_err(crate::error::SessionError::from)
        .and_then(|reply| Ok(CharacterTopicResponse::decode(reply.payload)?))
    {
        Ok(res) => {
            if let Some(topics) = res.character_topics {
                if !topics.subscribe_topic.is_empty() {
                    task = subscribe_and_forward(
                        messaging,
                        &topics.subscribe_topic,
                        &cancel,
                        &sink,
                        decode_character_live,
                        "character",
                        character_id,
                    )
                    .await;
                }
                request_topic = topics.request_topic;
            }
        }
        Err(e) => tracing::warn!(character_id, error = %e, "character topic lookup failed"),
    }

    if !request_topic.is_empty() {
        let snapshot = CharacterLiveInfoRequest { character_id };
        match messaging
            .request(
                &request_topic,
                snapshot.encode_to_vec().into(),
                subjects::REQUEST_TIMEOUT,
            )
            .await
            .map_err(crate::error::SessionError::from)
            .and_then(|reply| Ok(CharacterLiveInfoResponse::decode(reply.payload)?))
        {
            Ok(res) => {
                let _ = sink
                    .send(SessionMessageResponse {
                        r#type: SessionMessageType::CharacterLiveInfo as i32,
                        ok: res.ok,
                        character_live_info: res.character_live_info,
                        ..Default::default()
                    })
                    .await;
            }
            Err(e) => tracing::warn!(character_id, error = %e, "character live snapshot failed"),
        }
    }

    LiveListener::new(character_id, cancel, task)
}

/// Listener on a system's live-info feed, with an initial snapshot.
pub(crate) async fn spawn_system_listener(
    messaging: &Arc<dyn Messaging>,
    system_id: i32,
    sink: Arc<dyn StreamSink>,
) -> LiveListener {
    let cancel = CancellationToken::new();
    let mut task = None;
    let mut request_topic = String::new();

    let lookup = SystemTopicRequest { system_id };
    match messaging
        .request(
            subjects::REQ_SYSTEM_TOPIC,
            lookup.encode_to_vec().into(),
            subjects::REQUEST_TIMEOUT,
        )
        .await
        .map_err(crate::error::SessionError::from)
        .and_then(|reply| Ok(SystemTopicResponse::decode(reply.payload)?))
    {
        Ok(res) => {
            if let Some(topics) = res.system_topics {
                if !topics.subscribe_topic.is_empty() {
                    task = subscribe_and_forward(
                        messaging,
                        &topics.subscribe_topic,
                        &cancel,
                        &sink,
                        decode_system_live,
                        "system",
                        system_id,
                    )
                    .await;
                }
                request_topic = topics.request_topic;
            }
        }
        Err(e) => tracing::warn!(system_id, error = %e, "system topic lookup failed"),
    }

    if !request_topic.is_empty() {
        let snapshot = SystemLiveInfoRequest { system_id };
        match messaging
            .request(
                &request_topic,
                snapshot.encode_to_vec().into(),
                subjects::REQUEST_TIMEOUT,
            )
            .await
            .map_err(crate::error::SessionError::from)
            .and_then(|reply| Ok(SystemLiveInfoResponse::decode(reply.payload)?))
        {
            Ok(res) => {
                let _ = sink
                    .send(SessionMessageResponse {
                        r#type: SessionMessageType::SystemLiveInfo as i32,
                        ok: res.ok,
                        system_live_info: res.system_live_info,
                        ..Default::default()
                    })
                    .await;
            }
            Err(e) => tracing::warn!(system_id, error = %e, "system live snapshot failed"),
        }
    }

    LiveListener::new(system_id, cancel, task)
}

/// Listener on a system's chat fan-out feed. No snapshot exists for chat.
pub(crate) async fn spawn_chatter_listener(
    messaging: &Arc<dyn Messaging>,
    system_id: i32,
    sink: Arc<dyn StreamSink>,
) -> LiveListener {
    let cancel = CancellationToken::new();
    let mut task = None;

    let lookup = ChatterTopicRequest { system_id };
    match messaging
        .request(
            subjects::REQ_CHATTER_TOPIC,
            lookup.encode_to_vec().into(),
            subjects::REQUEST_TIMEOUT,
        )
        .await
        .map_err(crate::error::SessionError::from)
        .and_then(|reply| Ok(ChatterTopicResponse::decode(reply.payload)?))
    {
        Ok(res) => {
            if let Some(topics) = res.chatter_topics {
                if !topics.subscribe_topic.is_empty() {
                    task = subscribe_and_forward(
                        messaging,
                        &topics.subscribe_topic,
                        &cancel,
                        &sink,
                        decode_chatter,
                        "chatter",
                        system_id,
                    )
                    .await;
                }
            }
        }
        Err(e) => tracing::warn!(system_id, error = %e, "chatter topic lookup failed"),
    }

    LiveListener::new(system_id, cancel, task)
}
