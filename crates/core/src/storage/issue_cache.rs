//! Issue list persistence per room

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_json, OptionalExt};
use crate::error::Result;
use crate::models::Issue;

pub struct IssueCacheStore<'a> {
    conn: &'a Connection,
}

impl<'a> IssueCacheStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, issues), fields(count = issues.len()))]
    pub fn save(&self, room_id: Uuid, issues: &[Issue]) -> Result<()> {
        let json = serde_json::to_string(issues)?;
        self.conn.execute(
            "INSERT INTO issue_cache (room_id, issues, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(room_id) DO UPDATE SET
                issues = excluded.issues,
                updated_at = excluded.updated_at",
            params![room_id.to_string(), json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Cached issues, empty when the room has none
    #[instrument(skip(self))]
    pub fn load(&self, room_id: Uuid) -> Result<Vec<Issue>> {
        let issues = self
            .conn
            .query_row(
                "SELECT issues FROM issue_cache WHERE room_id = ?1",
                params![room_id.to_string()],
                |row| {
                    let json: String = row.get(0)?;
                    parse_json::<Vec<Issue>>(&json)
                },
            )
            .optional()?;
        Ok(issues.unwrap_or_default())
    }

    pub fn delete(&self, room_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM issue_cache WHERE room_id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(())
    }

    pub fn prune_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM issue_cache WHERE updated_at < ?1",
            params![before.to_rfc3339()],
        )?;
        Ok(n)
    }
}
