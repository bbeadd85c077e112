//! Storage repository traits
//!
//! The session context talks to local persistence only through
//! [`SessionCache`], so tests and alternative backends can stand in for SQLite.

use uuid::Uuid;

use crate::error::Result;
use crate::models::{DeckConfig, Issue, SessionSnapshot};

/// Per-room cache of advisory session state
pub trait SessionCache {
    /// Persist the last known moderator and participants
    fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()>;

    fn load_snapshot(&self, room_id: Uuid) -> Result<Option<SessionSnapshot>>;

    /// Persist the full issue list
    fn save_issues(&self, room_id: Uuid, issues: &[Issue]) -> Result<()>;

    fn load_issues(&self, room_id: Uuid) -> Result<Vec<Issue>>;

    fn save_deck(&self, room_id: Uuid, config: &DeckConfig) -> Result<()>;

    fn load_deck(&self, room_id: Uuid) -> Result<Option<DeckConfig>>;

    /// Remove everything cached for a room
    fn clear_room(&self, room_id: Uuid) -> Result<()>;
}
