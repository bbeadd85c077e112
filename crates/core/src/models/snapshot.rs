//! Locally cached session snapshot

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advisory copy of room facts kept for reload/resume.
///
/// Never a source of truth: the next authoritative message overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub room_id: Uuid,
    pub moderator: Option<String>,
    pub participants: Vec<String>,
}

impl SessionSnapshot {
    pub fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            moderator: None,
            participants: Vec::new(),
        }
    }
}
