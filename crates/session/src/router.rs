//! The session router: owns one client stream end-to-end.
//!
//! Two tasks run for the lifetime of the stream: the receive loop
//! dispatching inbound envelopes to typed handlers, and the bus fan-in
//! forwarding everything published on the session's subscribe subject to
//! the client. Either side failing tears the whole stream down; handler
//! and listener shutdown runs on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parallax_core::Messaging;
use parallax_proto::{SessionMessageRequest, SessionMessageResponse, SessionMessageType};
use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::handlers::{ChatterHandler, InfoHandler, LoginHandler};
use crate::sink::{GrpcStreamSink, ResponseSender, StreamSink};
use crate::state::SessionState;

pub struct SessionRouter {
    messaging: Arc<dyn Messaging>,
    session_id: String,
    subscribe_subject: String,
    publish_subject: String,
    state: Arc<SessionState>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("session_id", &self.session_id)
            .field("subscribe_subject", &self.subscribe_subject)
            .field("publish_subject", &self.publish_subject)
            .finish_non_exhaustive()
    }
}

impl SessionRouter {
    pub fn new(
        messaging: Arc<dyn Messaging>,
        session_id: impl Into<String>,
        subscribe_subject: impl Into<String>,
        publish_subject: impl Into<String>,
        character_id: i32,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        Arc::new(Self {
            messaging,
            state: Arc::new(SessionState::new(session_id.clone(), character_id)),
            session_id,
            subscribe_subject: subscribe_subject.into(),
            publish_subject: publish_subject.into(),
            dispatcher: Arc::new(Dispatcher::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn publish_subject(&self) -> &str {
        &self.publish_subject
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Terminate an active stream. The stream call observes the
    /// cancellation, unwinds, and tears down its handlers and listeners.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the session stream until either side ends it. `inbound` is the
    /// client's envelope stream; `outbound` is the response channel whose
    /// receiver backs the gRPC response stream.
    ///
    /// Returns `Ok` for a clean close (client EOF or router shutdown) and
    /// the terminating error otherwise.
    pub async fn stream<S>(
        &self,
        inbound: S,
        outbound: ResponseSender,
    ) -> Result<(), SessionError>
    where
        S: Stream<Item = Result<SessionMessageRequest, tonic::Status>> + Send + Unpin + 'static,
    {
        let (send_err_tx, mut send_err_rx) = mpsc::channel::<SessionError>(1);
        let (recv_err_tx, mut recv_err_rx) = mpsc::channel::<SessionError>(1);

        let sink: Arc<dyn StreamSink> =
            Arc::new(GrpcStreamSink::new(outbound, send_err_tx.clone()));

        let info_handler = InfoHandler::install(
            Arc::clone(&self.messaging),
            Arc::clone(&self.dispatcher),
            Arc::clone(&sink),
        );
        let chatter_handler = ChatterHandler::install(
            Arc::clone(&self.messaging),
            Arc::clone(&self.state),
            Arc::clone(&self.dispatcher),
        );
        let login_handler = LoginHandler::install(
            Arc::clone(&self.messaging),
            Arc::clone(&self.state),
            Arc::clone(&self.dispatcher),
            Arc::clone(&sink),
        );

        let stream_cancel = self.cancel.child_token();
        let forwarded = Arc::new(AtomicU64::new(0));

        let recv_task = tokio::spawn(run_receive_loop(
            inbound,
            Arc::clone(&self.dispatcher),
            recv_err_tx,
            stream_cancel.clone(),
        ));
        let fanin_task = tokio::spawn(run_bus_fanin(
            Arc::clone(&self.messaging),
            self.subscribe_subject.clone(),
            Arc::clone(&sink),
            send_err_tx,
            stream_cancel.clone(),
            Arc::clone(&forwarded),
        ));

        let error = tokio::select! {
            maybe = recv_err_rx.recv() => maybe.unwrap_or(SessionError::StreamClosed),
            maybe = send_err_rx.recv() => maybe.unwrap_or(SessionError::StreamClosed),
            _ = self.cancel.cancelled() => SessionError::StreamClosed,
        };

        // Whichever side fired first, stop the other and drain both tasks
        // so nothing outlives the stream.
        stream_cancel.cancel();
        let _ = recv_task.await;
        let _ = fanin_task.await;

        login_handler.shutdown().await;
        chatter_handler.shutdown().await;
        info_handler.shutdown().await;

        tracing::info!(
            session_id = %self.session_id,
            events_forwarded = forwarded.load(Ordering::Relaxed),
            error = %error,
            "session stream ended"
        );

        if error.is_clean_close() {
            Ok(())
        } else {
            Err(error)
        }
    }
}

async fn run_receive_loop<S>(
    mut inbound: S,
    dispatcher: Arc<Dispatcher>,
    errors: mpsc::Sender<SessionError>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<SessionMessageRequest, tonic::Status>> + Send + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = inbound.next() => next,
        };
        match next {
            Some(Ok(msg)) => {
                let message_type = msg.r#type();
                match dispatcher.get(message_type) {
                    Some(handler) => {
                        if let Err(e) = handler(msg).await {
                            let _ = errors.try_send(e);
                            break;
                        }
                    }
                    None => tracing::debug!(?message_type, "no dispatch handler"),
                }
            }
            Some(Err(status)) => {
                let _ = errors.try_send(SessionError::Stream(status));
                break;
            }
            None => {
                let _ = errors.try_send(SessionError::StreamClosed);
                break;
            }
        }
    }
}

async fn run_bus_fanin(
    messaging: Arc<dyn Messaging>,
    subject: String,
    sink: Arc<dyn StreamSink>,
    errors: mpsc::Sender<SessionError>,
    cancel: CancellationToken,
    forwarded: Arc<AtomicU64>,
) {
    let mut sub = match messaging.subscribe(&subject).await {
        Ok(sub) => sub,
        Err(e) => {
            let _ = errors.try_send(e.into());
            return;
        }
    };

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = sub.next() => match maybe {
                Some(msg) => msg,
                None => break,
            },
        };

        // A bad payload on the session's own subject is a bus-side
        // contract violation and fatal for the session.
        let envelope = match SessionMessageResponse::decode(msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = errors.try_send(e.into());
                break;
            }
        };

        let stop = envelope.r#type() == SessionMessageType::Stop;
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sink.send(envelope) => result,
        };
        if sent.is_err() {
            break;
        }
        forwarded.fetch_add(1, Ordering::Relaxed);
        if stop {
            break;
        }
    }

    if let Err(e) = sub.unsubscribe().await {
        tracing::debug!(subject = %subject, error = %e, "fan-in unsubscribe failed");
    }
    // Fan-in ending ends the session: a STOP envelope or a dead
    // subscription reads as a clean close unless an error was already
    // reported above.
    let _ = errors.try_send(SessionError::StreamClosed);
}
