//! End-to-end router behavior over scripted streams: dispatch, bus
//! fan-in, STOP handling, failure modes and graceful shutdown.

mod support;

use std::sync::Arc;

use parallax_core::testing::MockMessaging;
use parallax_core::Messaging;
use parallax_proto::{SessionMessageRequest, SessionMessageResponse, SessionMessageType};
use parallax_session::{SessionManager, SessionRouter};
use prost::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use support::*;

const SUBSCRIBE_SUBJECT: &str = "S.sub.s1";

type InboundTx = mpsc::Sender<Result<SessionMessageRequest, Status>>;
type OutboundRx = mpsc::Receiver<Result<SessionMessageResponse, Status>>;

struct StreamHarness {
    bus: Arc<MockMessaging>,
    manager: Arc<SessionManager>,
    router: Arc<SessionRouter>,
    inbound: InboundTx,
    outbound: OutboundRx,
    task: JoinHandle<Result<(), parallax_session::SessionError>>,
}

fn start_stream() -> StreamHarness {
    let bus = MockMessaging::new();
    script_world(&bus);
    let messaging: Arc<dyn Messaging> = bus.clone();
    let manager = SessionManager::new(messaging);
    let router = manager.add("s1", SUBSCRIBE_SUBJECT, "S.pub.s1", SELF_CHARACTER);

    let (inbound, in_rx) = mpsc::channel(16);
    let (out_tx, outbound) = mpsc::channel(128);
    let streaming_router = Arc::clone(&router);
    let task = tokio::spawn(async move {
        streaming_router
            .stream(ReceiverStream::new(in_rx), out_tx)
            .await
    });

    StreamHarness {
        bus,
        manager,
        router,
        inbound,
        outbound,
        task,
    }
}

impl StreamHarness {
    async fn next_response(&mut self) -> SessionMessageResponse {
        self.outbound
            .recv()
            .await
            .expect("response stream ended early")
            .expect("response status")
    }
}

#[tokio::test]
async fn login_round_trip_and_clean_close() {
    let mut h = start_stream();

    h.inbound.send(Ok(login_request())).await.unwrap();

    assert_eq!(
        h.next_response().await.r#type(),
        SessionMessageType::SystemLiveInfo
    );
    assert_eq!(
        h.next_response().await.r#type(),
        SessionMessageType::CharacterLiveInfo
    );
    let login = h.next_response().await;
    assert_eq!(login.r#type(), SessionMessageType::Login);
    assert!(login.ok);

    // Client hangs up.
    drop(h.inbound);
    let result = h.task.await.unwrap();
    assert!(result.is_ok());

    // Fan-in subscription and every listener have been drained.
    assert_eq!(h.bus.active_subscriptions(), 0);
}

#[tokio::test]
async fn stop_envelope_ends_the_session() {
    let mut h = start_stream();
    wait_until("fan-in subscribed", || {
        h.bus.active_subscriptions_for(SUBSCRIBE_SUBJECT) == 1
    })
    .await;

    let stop = SessionMessageResponse {
        r#type: SessionMessageType::Stop as i32,
        ..Default::default()
    };
    assert_eq!(h.bus.push(SUBSCRIBE_SUBJECT, stop.encode_to_vec().into()), 1);

    // The STOP envelope is forwarded before the stream winds down.
    assert_eq!(h.next_response().await.r#type(), SessionMessageType::Stop);

    let result = h.task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(h.bus.active_subscriptions(), 0);
}

#[tokio::test]
async fn undecodable_fanin_payload_is_fatal() {
    let h = start_stream();
    wait_until("fan-in subscribed", || {
        h.bus.active_subscriptions_for(SUBSCRIBE_SUBJECT) == 1
    })
    .await;

    h.bus
        .push(SUBSCRIBE_SUBJECT, bytes::Bytes::from_static(&[0xff; 8]));

    let result = h.task.await.unwrap();
    assert!(matches!(
        result,
        Err(parallax_session::SessionError::Decode(_))
    ));
    assert_eq!(h.bus.active_subscriptions(), 0);
}

#[tokio::test]
async fn unhandled_envelope_types_are_ignored() {
    let mut h = start_stream();

    // No handler is registered for live-info envelopes from the client.
    h.inbound
        .send(Ok(SessionMessageRequest {
            r#type: SessionMessageType::CharacterLiveInfo as i32,
            ..Default::default()
        }))
        .await
        .unwrap();

    // The stream is still alive and dispatching.
    h.inbound.send(Ok(login_request())).await.unwrap();
    assert_eq!(
        h.next_response().await.r#type(),
        SessionMessageType::SystemLiveInfo
    );

    drop(h.inbound);
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn router_shutdown_terminates_an_active_stream() {
    let mut h = start_stream();

    h.inbound.send(Ok(login_request())).await.unwrap();
    let _ = h.next_response().await;
    let _ = h.next_response().await;
    let _ = h.next_response().await;

    h.router.shutdown();
    let result = h.task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(h.bus.active_subscriptions(), 0);
}

#[tokio::test]
async fn manager_shutdown_drains_every_router() {
    let mut h = start_stream();
    h.inbound.send(Ok(login_request())).await.unwrap();
    let _ = h.next_response().await;
    let _ = h.next_response().await;
    let _ = h.next_response().await;

    assert!(h.bus.active_subscriptions() > 0);
    h.manager.shutdown();

    let result = h.task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(h.bus.active_subscriptions(), 0);
    assert_eq!(h.manager.active_sessions(), 0);
}
