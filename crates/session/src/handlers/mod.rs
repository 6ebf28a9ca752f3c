//! Typed handlers for inbound session envelopes.
//!
//! Each handler registers itself against the router's dispatcher on
//! install and deregisters on shutdown. The login handler additionally
//! owns the session's live-listener topology.

mod chatter;
mod info;
mod login;

pub use chatter::ChatterHandler;
pub use info::InfoHandler;
pub use login::LoginHandler;
