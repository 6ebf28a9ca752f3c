//! Login/logout flows and the dynamic listener topology.
//!
//! After login the handler owns four kinds of live listeners: the
//! player's own character feed, the current system's live feed, the
//! current system's chat feed, and one character feed per co-located
//! character. The topology is re-shaped by data events: the player's own
//! `CHARACTER_LIVE_INFO` drives system changes, the system's
//! `SYSTEM_LIVE_INFO` drives the co-located set. Relays intercept those
//! envelopes on their way to the client and mutate the topology first.
//!
//! Each feed has a single forwarder task, so a given relay runs
//! sequentially; the listener-set lock is only contested across relays
//! and shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parallax_core::{subjects, Messaging};
use parallax_proto::{
    CharacterLoginRequest, CharacterLoginResponse, CharacterLogoutRequest,
    CharacterLogoutResponse, SessionMessageRequest, SessionMessageResponse, SessionMessageType,
    SystemLiveInfoMessage,
};
use prost::Message;
use tokio::sync::Mutex;

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::listener::{
    spawn_character_listener, spawn_chatter_listener, spawn_system_listener, LiveListener,
};
use crate::sink::StreamSink;
use crate::state::SessionState;

pub struct LoginHandler {
    inner: Arc<LoginInner>,
    dispatcher: Arc<Dispatcher>,
}

#[derive(Default)]
struct ListenerSet {
    character: Option<LiveListener>,
    system: Option<LiveListener>,
    system_chatter: Option<LiveListener>,
    local_characters: HashMap<i32, LiveListener>,
    // Once closed, no new listener may be stored; late arrivals from an
    // in-flight relay are shut down instead.
    closed: bool,
}

struct LoginInner {
    messaging: Arc<dyn Messaging>,
    state: Arc<SessionState>,
    sink: Arc<dyn StreamSink>,
    listeners: Mutex<ListenerSet>,
}

impl LoginHandler {
    pub fn install(
        messaging: Arc<dyn Messaging>,
        state: Arc<SessionState>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn StreamSink>,
    ) -> Self {
        let inner = Arc::new(LoginInner {
            messaging,
            state,
            sink,
            listeners: Mutex::new(ListenerSet::default()),
        });

        let handler = Arc::clone(&inner);
        dispatcher.set(
            SessionMessageType::Login,
            Arc::new(move |msg| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_login(msg).await }.boxed()
            }),
        );

        let handler = Arc::clone(&inner);
        dispatcher.set(
            SessionMessageType::Logout,
            Arc::new(move |msg| {
                let inner = Arc::clone(&handler);
                async move { inner.handle_logout(msg).await }.boxed()
            }),
        );

        Self { inner, dispatcher }
    }

    pub async fn shutdown(&self) {
        let drained = {
            let mut set = self.inner.listeners.lock().await;
            set.closed = true;
            drain_listeners(&mut set)
        };
        for listener in drained {
            listener.shutdown().await;
        }

        self.dispatcher.clear(SessionMessageType::Login);
        self.dispatcher.clear(SessionMessageType::Logout);
    }
}

fn drain_listeners(set: &mut ListenerSet) -> Vec<LiveListener> {
    let mut drained = Vec::new();
    drained.extend(set.system.take());
    drained.extend(set.system_chatter.take());
    drained.extend(set.character.take());
    drained.extend(set.local_characters.drain().map(|(_, listener)| listener));
    drained
}

impl LoginInner {
    async fn handle_login(
        self: Arc<Self>,
        _msg: SessionMessageRequest,
    ) -> Result<(), SessionError> {
        let mut response = SessionMessageResponse {
            r#type: SessionMessageType::Login as i32,
            ..Default::default()
        };

        let request = CharacterLoginRequest {
            character_id: self.state.character_id(),
        };
        match self
            .messaging
            .request(
                subjects::REQ_CHARACTER_LOGIN,
                request.encode_to_vec().into(),
                subjects::REQUEST_TIMEOUT,
            )
            .await
            .map_err(SessionError::from)
            .and_then(|reply| Ok(CharacterLoginResponse::decode(reply.payload)?))
        {
            Ok(res) => {
                response.ok = res.ok;
                response.character_live_info = res.character_live_info.clone();

                // The player's own feed runs through the character relay,
                // which keeps the system listeners on the character's
                // current system. The initial snapshot already flows
                // through it and builds the first topology.
                let relay: Arc<dyn StreamSink> = Arc::new(PlayerCharacterRelay {
                    inner: Arc::clone(&self),
                });
                let listener =
                    spawn_character_listener(&self.messaging, res.character_id, relay).await;
                self.store_character_listener(listener).await;
            }
            Err(e) => {
                tracing::warn!(character_id = request.character_id, error = %e, "character login failed");
            }
        }

        let relay = SystemRelay {
            inner: Arc::clone(&self),
        };
        let _ = relay.send(response).await;
        Ok(())
    }

    async fn handle_logout(
        self: Arc<Self>,
        _msg: SessionMessageRequest,
    ) -> Result<(), SessionError> {
        let mut response = SessionMessageResponse {
            r#type: SessionMessageType::Logout as i32,
            ..Default::default()
        };

        let request = CharacterLogoutRequest {
            character_id: self.state.character_id(),
        };
        match self
            .messaging
            .request(
                subjects::REQ_CHARACTER_LOGOUT,
                request.encode_to_vec().into(),
                subjects::REQUEST_TIMEOUT,
            )
            .await
            .map_err(SessionError::from)
            .and_then(|reply| Ok(CharacterLogoutResponse::decode(reply.payload)?))
        {
            Ok(res) => {
                response.ok = res.ok;
            }
            Err(e) => {
                tracing::warn!(character_id = request.character_id, error = %e, "character logout failed");
            }
        }

        if response.ok {
            // A confirmed logout returns the handler to its initial
            // listener set; a later LOGIN rebuilds the topology.
            let drained = {
                let mut set = self.listeners.lock().await;
                drain_listeners(&mut set)
            };
            for listener in drained {
                listener.shutdown().await;
            }
        }

        let relay = SystemRelay {
            inner: Arc::clone(&self),
        };
        let _ = relay.send(response).await;
        Ok(())
    }

    async fn store_character_listener(&self, listener: LiveListener) {
        let displaced = {
            let mut set = self.listeners.lock().await;
            if set.closed {
                Some(listener)
            } else {
                set.character.replace(listener)
            }
        };
        if let Some(listener) = displaced {
            listener.shutdown().await;
        }
    }

    /// Re-point the system and system-chatter listeners at `system_id`.
    /// Listeners bound to a different system are shut down before their
    /// replacements are built.
    async fn retarget_system_listeners(self: Arc<Self>, system_id: i32) {
        let (old_system, old_chatter, need_system, need_chatter) = {
            let mut set = self.listeners.lock().await;
            if set.closed {
                return;
            }
            let old_system = take_if_different(&mut set.system, system_id);
            let old_chatter = take_if_different(&mut set.system_chatter, system_id);
            (
                old_system,
                old_chatter,
                set.system.is_none(),
                set.system_chatter.is_none(),
            )
        };

        if let Some(listener) = old_system {
            listener.shutdown().await;
        }
        if let Some(listener) = old_chatter {
            listener.shutdown().await;
        }

        if need_system {
            tracing::debug!(system_id, "starting system listener");
            let relay: Arc<dyn StreamSink> = Arc::new(SystemRelay {
                inner: Arc::clone(&self),
            });
            let listener = spawn_system_listener(&self.messaging, system_id, relay).await;
            self.store_slot(listener, Slot::System).await;
        }

        if need_chatter {
            tracing::debug!(system_id, "starting system chatter listener");
            let relay: Arc<dyn StreamSink> = Arc::new(ChatterRelay {
                inner: Arc::clone(&self),
            });
            let listener = spawn_chatter_listener(&self.messaging, system_id, relay).await;
            self.store_slot(listener, Slot::SystemChatter).await;
        }
    }

    async fn store_slot(&self, listener: LiveListener, slot: Slot) {
        let leftover = {
            let mut set = self.listeners.lock().await;
            let closed = set.closed;
            let target = match slot {
                Slot::System => &mut set.system,
                Slot::SystemChatter => &mut set.system_chatter,
            };
            if closed || target.is_some() {
                Some(listener)
            } else {
                *target = Some(listener);
                None
            }
        };
        if let Some(listener) = leftover {
            listener.shutdown().await;
        }
    }

    /// Reconcile the co-located character listeners against the set of
    /// characters the system reports as present.
    async fn sync_local_characters(self: Arc<Self>, info: &SystemLiveInfoMessage) {
        let present: HashSet<i32> = info.character_id.iter().copied().collect();

        let (removed, to_add) = {
            let mut set = self.listeners.lock().await;
            if set.closed {
                return;
            }
            // Before login there is no self character to exclude; leave
            // the map alone.
            let Some(self_id) = set.character.as_ref().map(|l| l.entity_id()) else {
                return;
            };

            let stale: Vec<i32> = set
                .local_characters
                .keys()
                .copied()
                .filter(|id| !present.contains(id))
                .collect();
            let removed: Vec<LiveListener> = stale
                .iter()
                .filter_map(|id| set.local_characters.remove(id))
                .collect();

            let to_add: Vec<i32> = present
                .iter()
                .copied()
                .filter(|id| *id != self_id && !set.local_characters.contains_key(id))
                .collect();
            (removed, to_add)
        };

        for listener in removed {
            tracing::debug!(character_id = listener.entity_id(), "removing co-located character listener");
            listener.shutdown().await;
        }

        for character_id in to_add {
            tracing::debug!(character_id, "adding co-located character listener");
            // Other characters' feeds go straight to the client; only the
            // player's own feed re-shapes the topology.
            let listener =
                spawn_character_listener(&self.messaging, character_id, Arc::clone(&self.sink))
                    .await;
            let leftover = {
                let mut set = self.listeners.lock().await;
                if set.closed || set.local_characters.contains_key(&character_id) {
                    Some(listener)
                } else {
                    set.local_characters.insert(character_id, listener);
                    None
                }
            };
            if let Some(listener) = leftover {
                listener.shutdown().await;
            }
        }
    }
}

enum Slot {
    System,
    SystemChatter,
}

fn take_if_different(slot: &mut Option<LiveListener>, entity_id: i32) -> Option<LiveListener> {
    if slot.as_ref().is_some_and(|l| l.entity_id() != entity_id) {
        slot.take()
    } else {
        None
    }
}

/// Sink for the player's own character feed. A `CHARACTER_LIVE_INFO`
/// carries the authoritative system id: session state is updated and the
/// system listeners re-targeted before the envelope reaches the client.
struct PlayerCharacterRelay {
    inner: Arc<LoginInner>,
}

#[async_trait]
impl StreamSink for PlayerCharacterRelay {
    async fn send(&self, msg: SessionMessageResponse) -> Result<(), SessionError> {
        if msg.r#type() == SessionMessageType::CharacterLiveInfo {
            if let Some(info) = &msg.character_live_info {
                self.inner.state.set_system_id(info.system_id);
                Arc::clone(&self.inner)
                    .retarget_system_listeners(info.system_id)
                    .await;
            }
        }
        self.inner.sink.send(msg).await
    }
}

/// Sink for the current system's live feed. A `SYSTEM_LIVE_INFO` lists
/// every character in the system; the co-located listener map is diffed
/// against it before the envelope reaches the client.
struct SystemRelay {
    inner: Arc<LoginInner>,
}

#[async_trait]
impl StreamSink for SystemRelay {
    async fn send(&self, msg: SessionMessageResponse) -> Result<(), SessionError> {
        if msg.r#type() == SessionMessageType::SystemLiveInfo {
            if let Some(info) = &msg.system_live_info {
                Arc::clone(&self.inner).sync_local_characters(info).await;
            }
        }
        self.inner.sink.send(msg).await
    }
}

/// Sink for the current system's chat feed. Pure pass-through.
struct ChatterRelay {
    inner: Arc<LoginInner>,
}

#[async_trait]
impl StreamSink for ChatterRelay {
    async fn send(&self, msg: SessionMessageResponse) -> Result<(), SessionError> {
        self.inner.sink.send(msg).await
    }
}
