//! Session router core for the Parallax gateway.
//!
//! One [`SessionRouter`] per connected client bridges a bidirectional
//! envelope stream to the message bus: inbound envelopes dispatch to typed
//! handlers, everything published on the session's subscribe subject fans
//! in to the client, and the login handler maintains a set of live
//! listeners that re-shapes itself as the character moves between systems.
//!
//! Shutdown cascades: manager → router → handlers → listeners. Every
//! spawned task has exactly one cancellation path and is drained before
//! its owner's shutdown returns.

pub mod dispatcher;
pub mod error;
pub mod handlers;
mod listener;
pub mod manager;
pub mod router;
pub mod sink;
pub mod state;

pub use dispatcher::Dispatcher;
pub use error::SessionError;
pub use listener::LiveListener;
pub use manager::SessionManager;
pub use router::SessionRouter;
pub use sink::{GrpcStreamSink, ResponseSender, StreamSink};
pub use state::SessionState;
