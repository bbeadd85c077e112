//! Deck configuration persistence

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_json, OptionalExt};
use crate::error::Result;
use crate::models::DeckConfig;

pub struct DeckConfigStore<'a> {
    conn: &'a Connection,
}

impl<'a> DeckConfigStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, config), fields(voting_system = %config.voting_system.as_str()))]
    pub fn save(&self, room_id: Uuid, config: &DeckConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO deck_configs (room_id, config) VALUES (?1, ?2)",
            params![room_id.to_string(), json],
        )?;
        Ok(())
    }

    pub fn load(&self, room_id: Uuid) -> Result<Option<DeckConfig>> {
        let config = self
            .conn
            .query_row(
                "SELECT config FROM deck_configs WHERE room_id = ?1",
                params![room_id.to_string()],
                |row| {
                    let json: String = row.get(0)?;
                    parse_json::<DeckConfig>(&json)
                },
            )
            .optional()?;
        Ok(config)
    }

    pub fn delete(&self, room_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM deck_configs WHERE room_id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VotingSystem;
    use crate::storage::Database;

    #[test]
    fn test_deck_config_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let store = db.decks();
        let room_id = Uuid::new_v4();

        let config = DeckConfig {
            room_name: Some("Sprint 12".into()),
            voting_system: VotingSystem::TShirts,
            custom_cards: None,
        };
        store.save(room_id, &config).unwrap();
        assert_eq!(store.load(room_id).unwrap(), Some(config));

        store.delete(room_id).unwrap();
        assert!(store.load(room_id).unwrap().is_none());
    }
}
