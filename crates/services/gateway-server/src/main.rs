//! Gateway server binary.
//!
//! Terminates client gRPC connections on loopback and bridges them to the
//! NATS bus named by `NATS_ENDPOINT`.

mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use parallax_core::messaging::NatsMessaging;
use parallax_core::{telemetry, Messaging};
use parallax_proto::gateway_server::GatewayServer;
use parallax_session::SessionManager;
use tonic::transport::Server;
use tracing::info;

use crate::service::GatewayService;

#[derive(Parser, Debug)]
#[command(name = "gateway-server", about = "Parallax session gateway")]
struct Args {
    /// Port to listen on (loopback only)
    #[arg(long, default_value_t = 50051)]
    port: u16,

    /// NATS endpoint the gateway bridges to
    #[arg(long, env = "NATS_ENDPOINT", default_value = "nats://127.0.0.1:4222")]
    nats_endpoint: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = telemetry::init("parallax-gateway")?;

    let messaging: Arc<dyn Messaging> =
        Arc::new(NatsMessaging::connect(&args.nats_endpoint).await?);
    let manager = SessionManager::new(Arc::clone(&messaging));

    let service = GatewayService::new(Arc::clone(&messaging), Arc::clone(&manager));
    service.announce_startup().await;

    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();
    info!(%addr, nats_endpoint = %args.nats_endpoint, "starting gateway");

    Server::builder()
        .trace_fn(|_| tracing::info_span!("grpc_request"))
        .add_service(GatewayServer::new(service))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    manager.shutdown();
    messaging.shutdown().await;
    telemetry.shutdown();

    Ok(())
}
