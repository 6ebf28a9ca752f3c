//! Core abstractions for the Parallax gateway.
//!
//! The gateway talks to backend services exclusively through the
//! [`Messaging`] trait: request/reply with a per-call deadline, fire-and-
//! forget publish, and push subscriptions. [`messaging::NatsMessaging`] is
//! the production implementation; [`testing::MockMessaging`] is a scripted
//! in-memory double for driving the session router in tests.

pub mod error;
pub mod messaging;
pub mod subjects;
pub mod telemetry;
pub mod testing;

pub use error::MessagingError;
pub use messaging::{BusHeaders, BusMessage, Messaging, Subscription};
