//! User preferences persistence
//!
//! Remembers who the user was and which room they were in so the next launch
//! can rejoin without asking.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse::{parse_uuid, OptionalExt};
use crate::error::Result;

const KEY_USER_NAME: &str = "user_name";
const KEY_USER_ROLE: &str = "user_role";
const KEY_LAST_ROOM: &str = "last_room";

/// Role the user last played in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Moderator,
    Participant,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Moderator => "moderator",
            UserRole::Participant => "participant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moderator" => Some(UserRole::Moderator),
            "participant" => Some(UserRole::Participant),
            _ => None,
        }
    }
}

/// User preferences
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPreferences {
    pub user_name: Option<String>,
    pub user_role: Option<UserRole>,
    pub last_room: Option<Uuid>,
}

/// Preferences store
pub struct PreferencesStore<'a> {
    conn: &'a Connection,
}

impl<'a> PreferencesStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(v) => self.conn.execute(
                "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
                params![key, v],
            )?,
            None => self
                .conn
                .execute("DELETE FROM preferences WHERE key = ?1", params![key])?,
        };
        Ok(())
    }

    /// Save user preferences; `None` fields are cleared
    pub fn save(&self, prefs: &UserPreferences) -> Result<()> {
        self.set(KEY_USER_NAME, prefs.user_name.as_deref())?;
        self.set(KEY_USER_ROLE, prefs.user_role.map(|r| r.as_str()))?;
        let last_room = prefs.last_room.map(|id| id.to_string());
        self.set(KEY_LAST_ROOM, last_room.as_deref())?;
        Ok(())
    }

    /// Load user preferences. Unparseable values read as unset.
    pub fn load(&self) -> Result<UserPreferences> {
        Ok(UserPreferences {
            user_name: self.get(KEY_USER_NAME)?,
            user_role: self.get(KEY_USER_ROLE)?.as_deref().and_then(UserRole::parse),
            last_room: self
                .get(KEY_LAST_ROOM)?
                .and_then(|s| parse_uuid(&s).ok()),
        })
    }

    /// Remember the room and role after a successful join
    pub fn set_last_room(&self, name: &str, role: UserRole, room_id: Uuid) -> Result<()> {
        self.save(&UserPreferences {
            user_name: Some(name.to_string()),
            user_role: Some(role),
            last_room: Some(room_id),
        })
    }

    /// Forget the room (it ended or expired), keeping the name
    pub fn clear_last_room(&self) -> Result<()> {
        self.set(KEY_LAST_ROOM, None)?;
        self.set(KEY_USER_ROLE, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_preferences_save_load() {
        let db = Database::open_in_memory().unwrap();
        let store = db.preferences();
        let room_id = Uuid::new_v4();

        store.set_last_room("alice", UserRole::Moderator, room_id).unwrap();

        let prefs = store.load().unwrap();
        assert_eq!(prefs.user_name.as_deref(), Some("alice"));
        assert_eq!(prefs.user_role, Some(UserRole::Moderator));
        assert_eq!(prefs.last_room, Some(room_id));
    }

    #[test]
    fn test_preferences_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.preferences().load().unwrap(), UserPreferences::default());
    }

    #[test]
    fn test_clear_last_room_keeps_name() {
        let db = Database::open_in_memory().unwrap();
        let store = db.preferences();
        store
            .set_last_room("bob", UserRole::Participant, Uuid::new_v4())
            .unwrap();
        store.clear_last_room().unwrap();

        let prefs = store.load().unwrap();
        assert_eq!(prefs.user_name.as_deref(), Some("bob"));
        assert!(prefs.last_room.is_none());
        assert!(prefs.user_role.is_none());
    }
}
