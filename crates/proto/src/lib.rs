//! Generated protobuf types for the Parallax gateway.
//!
//! The envelope carried on the session stream is [`SessionMessageRequest`] /
//! [`SessionMessageResponse`], tagged by [`SessionMessageType`]. The same
//! prost types double as the payload schema for bus request/reply subjects.

#![allow(clippy::large_enum_variant)]

mod generated {
    include!(concat!(env!("OUT_DIR"), "/parallax.v1.rs"));
}

pub use generated::*;
