//! Per-session identity and last-known position.

use std::sync::Mutex;

/// Identity of one client session. `session_id` and `character_id` are
/// fixed at construction; `system_id` follows the character as it moves
/// and is the only concurrently mutated field.
#[derive(Debug)]
pub struct SessionState {
    session_id: String,
    character_id: i32,
    system_id: Mutex<i32>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, character_id: i32) -> Self {
        Self {
            session_id: session_id.into(),
            character_id,
            system_id: Mutex::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn character_id(&self) -> i32 {
        self.character_id
    }

    pub fn system_id(&self) -> i32 {
        *self.system_id.lock().unwrap()
    }

    pub fn set_system_id(&self, system_id: i32) {
        *self.system_id.lock().unwrap() = system_id;
    }
}
