//! The `Gateway` gRPC service: unary proxies for universe and session
//! start, and the session stream handoff to the router.

use std::sync::Arc;
use std::time::Duration;

use parallax_core::{subjects, Messaging, MessagingError};
use parallax_proto::gateway_server::Gateway;
use parallax_proto::{
    ServiceStart, ServiceType, SessionMessageRequest, SessionMessageResponse, SessionStartRequest,
    SessionStartResponse, SessionStopRequest, UniverseRequest, UniverseResponse,
};
use parallax_session::{SessionManager, SessionRouter};
use prost::Message;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

pub struct GatewayService {
    messaging: Arc<dyn Messaging>,
    manager: Arc<SessionManager>,
}

impl GatewayService {
    pub fn new(messaging: Arc<dyn Messaging>, manager: Arc<SessionManager>) -> Self {
        Self { messaging, manager }
    }

    /// Announce this gateway instance on the bus. Best-effort.
    pub async fn announce_startup(&self) {
        let announcement = ServiceStart {
            r#type: ServiceType::GatewayService as i32,
            timestamp: Some(prost_types::Timestamp::from(std::time::SystemTime::now())),
        };
        if let Err(e) = self
            .messaging
            .publish(
                subjects::PUB_SERVICE_START,
                announcement.encode_to_vec().into(),
            )
            .await
        {
            tracing::warn!(error = %e, "startup announcement failed");
        }
    }

    fn router_from_metadata(
        &self,
        metadata: &MetadataMap,
    ) -> Result<Arc<SessionRouter>, Status> {
        let session_id = metadata
            .get("x-session-id")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Status::invalid_argument("missing x-session-id metadata"))?;
        self.manager
            .get(session_id)
            .ok_or_else(|| Status::not_found(format!("unknown session {session_id}")))
    }

    async fn bus_request<Req, Res>(
        &self,
        subject: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Res, Status>
    where
        Req: Message,
        Res: Message + Default,
    {
        let reply = self
            .messaging
            .request(subject, request.encode_to_vec().into(), timeout)
            .await
            .map_err(|e| status_from_messaging(subject, &e))?;
        Res::decode(reply.payload)
            .map_err(|e| Status::internal(format!("{subject}: undecodable reply: {e}")))
    }
}

fn status_from_messaging(subject: &str, err: &MessagingError) -> Status {
    if err.is_timeout() {
        Status::deadline_exceeded(format!("{subject}: {err}"))
    } else {
        Status::unavailable(format!("{subject}: {err}"))
    }
}

#[tonic::async_trait]
impl Gateway for GatewayService {
    async fn get_universe(
        &self,
        request: Request<UniverseRequest>,
    ) -> Result<Response<UniverseResponse>, Status> {
        let response: UniverseResponse = self
            .bus_request(
                subjects::REQ_UNIVERSE_STATIC,
                &request.into_inner(),
                subjects::LIFECYCLE_TIMEOUT,
            )
            .await?;
        Ok(Response::new(response))
    }

    async fn start_session(
        &self,
        request: Request<SessionStartRequest>,
    ) -> Result<Response<SessionStartResponse>, Status> {
        let response: SessionStartResponse = self
            .bus_request(
                subjects::REQ_SESSION_START,
                &request.into_inner(),
                subjects::LIFECYCLE_TIMEOUT,
            )
            .await?;

        if response.ok {
            match &response.session_topics {
                Some(topics) => {
                    self.manager.add(
                        &response.session_id,
                        &topics.subscribe_topic,
                        &topics.publish_topic,
                        response.character_id,
                    );
                    tracing::info!(
                        session_id = %response.session_id,
                        character_id = response.character_id,
                        "session started"
                    );
                }
                // The session service said ok but named no topics; hand
                // the response back without a router for it.
                None => tracing::warn!(
                    session_id = %response.session_id,
                    "session start response carries no topics"
                ),
            }
        }

        Ok(Response::new(response))
    }

    type StreamSessionStream = ReceiverStream<Result<SessionMessageResponse, Status>>;

    async fn stream_session(
        &self,
        request: Request<Streaming<SessionMessageRequest>>,
    ) -> Result<Response<Self::StreamSessionStream>, Status> {
        let router = self.router_from_metadata(request.metadata())?;
        let inbound = request.into_inner();

        let (tx, rx) = tokio::sync::mpsc::channel(128);
        let manager = Arc::clone(&self.manager);
        let messaging = Arc::clone(&self.messaging);

        tokio::spawn(async move {
            let result = router.stream(inbound, tx).await;
            manager.remove(&router);

            // Tell the session service the stream is gone. The reply
            // carries nothing we use; failure only gets logged.
            let stop = SessionStopRequest {
                session_id: router.session_id().to_string(),
            };
            match messaging
                .request(
                    subjects::REQ_SESSION_STOP,
                    stop.encode_to_vec().into(),
                    subjects::REQUEST_TIMEOUT,
                )
                .await
            {
                Ok(_) => {
                    tracing::debug!(session_id = router.session_id(), "session stop acknowledged")
                }
                Err(e) => tracing::warn!(
                    session_id = router.session_id(),
                    error = %e,
                    "session stop request failed"
                ),
            }

            if let Err(e) = result {
                tracing::warn!(session_id = router.session_id(), error = %e, "session stream failed");
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::testing::MockMessaging;
    use tonic::metadata::MetadataValue;

    fn service() -> (Arc<MockMessaging>, GatewayService) {
        let bus = MockMessaging::new();
        let messaging: Arc<dyn Messaging> = bus.clone();
        let manager = SessionManager::new(Arc::clone(&messaging));
        (bus, GatewayService::new(messaging, manager))
    }

    #[test]
    fn missing_session_metadata_is_invalid_argument() {
        let (_bus, service) = service();
        let metadata = MetadataMap::new();
        let err = service.router_from_metadata(&metadata).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let (_bus, service) = service();
        let mut metadata = MetadataMap::new();
        metadata.insert("x-session-id", MetadataValue::from_static("nope"));
        let err = service.router_from_metadata(&metadata).unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[test]
    fn known_session_resolves_to_its_router() {
        let (_bus, service) = service();
        let router = service.manager.add("s1", "S.sub.s1", "S.pub.s1", 42);
        let mut metadata = MetadataMap::new();
        metadata.insert("x-session-id", MetadataValue::from_static("s1"));
        let found = service.router_from_metadata(&metadata).unwrap();
        assert!(Arc::ptr_eq(&found, &router));
    }

    #[tokio::test]
    async fn bus_timeout_maps_to_deadline_exceeded() {
        let (bus, service) = service();
        bus.handle_request(subjects::REQ_UNIVERSE_STATIC, |_payload| {
            Err(MessagingError::Timeout {
                subject: subjects::REQ_UNIVERSE_STATIC.to_string(),
                timeout: subjects::LIFECYCLE_TIMEOUT,
            })
        });

        let err = service
            .get_universe(Request::new(UniverseRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn bus_transport_error_maps_to_unavailable() {
        let (_bus, service) = service();
        // Nothing scripted: the mock reports a transport failure.
        let err = service
            .get_universe(Request::new(UniverseRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn undecodable_reply_maps_to_internal() {
        let (bus, service) = service();
        bus.handle_request(subjects::REQ_UNIVERSE_STATIC, |_payload| {
            Ok(bytes::Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]))
        });

        let err = service
            .get_universe(Request::new(UniverseRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn start_session_installs_a_router_when_topics_present() {
        let (bus, service) = service();
        bus.handle_request(subjects::REQ_SESSION_START, |_payload| {
            let response = SessionStartResponse {
                ok: true,
                session_id: "s1".to_string(),
                character_id: 42,
                session_topics: Some(parallax_proto::SessionTopics {
                    subscribe_topic: "S.sub.s1".to_string(),
                    publish_topic: "S.pub.s1".to_string(),
                }),
            };
            Ok(response.encode_to_vec().into())
        });

        let response = service
            .start_session(Request::new(SessionStartRequest { character_id: 42 }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.ok);
        assert!(service.manager.get("s1").is_some());
    }

    #[tokio::test]
    async fn start_session_without_topics_installs_nothing() {
        let (bus, service) = service();
        bus.handle_request(subjects::REQ_SESSION_START, |_payload| {
            let response = SessionStartResponse {
                ok: true,
                session_id: "s1".to_string(),
                character_id: 42,
                session_topics: None,
            };
            Ok(response.encode_to_vec().into())
        });

        let response = service
            .start_session(Request::new(SessionStartRequest { character_id: 42 }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.ok);
        assert!(service.manager.get("s1").is_none());
        assert_eq!(service.manager.active_sessions(), 0);
    }
}
