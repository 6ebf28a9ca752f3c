//! Well-known bus subjects and request deadlines.
//!
//! Per-entity subjects (a character's live feed, a system's chatter feed)
//! are not listed here; they are discovered at runtime through the
//! `REQ.*.TOPIC` lookups.

use std::time::Duration;

pub const REQ_UNIVERSE_STATIC: &str = "REQ.UNIVERSE.STATIC";

pub const REQ_SESSION_START: &str = "REQ.SESSION.START";
pub const REQ_SESSION_STOP: &str = "REQ.SESSION.STOP";

pub const REQ_CHARACTER_STATIC: &str = "REQ.CHARACTER.STATIC";
pub const REQ_SYSTEM_STATIC: &str = "REQ.SYSTEM.STATIC";

pub const REQ_CHARACTER_LOGIN: &str = "REQ.CHARACTER.LOGIN";
pub const REQ_CHARACTER_LOGOUT: &str = "REQ.CHARACTER.LOGOUT";

pub const REQ_CHARACTER_TOPIC: &str = "REQ.CHARACTER.TOPIC";
pub const REQ_SYSTEM_TOPIC: &str = "REQ.SYSTEM.TOPIC";
pub const REQ_CHATTER_TOPIC: &str = "REQ.CHATTER.TOPIC";

pub const PUB_SERVICE_START: &str = "PUB.SERVICE.START";

/// Deadline for session lifecycle requests (start, universe fetch).
pub const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for everything else (topic lookup, live info, login/logout,
/// stop, static info).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
