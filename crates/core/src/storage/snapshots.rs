//! Session snapshot persistence
//!
//! Last known moderator and participant list per room, used to paint the
//! session before the authority answers.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_json, OptionalExt};
use crate::error::Result;
use crate::models::SessionSnapshot;

pub struct SnapshotStore<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Save a snapshot (upserts)
    #[instrument(skip(self, snapshot), fields(room_id = %snapshot.room_id))]
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let participants = serde_json::to_string(&snapshot.participants)?;
        self.conn.execute(
            "INSERT INTO session_snapshots (room_id, moderator, participants, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(room_id) DO UPDATE SET
                moderator = excluded.moderator,
                participants = excluded.participants,
                updated_at = excluded.updated_at",
            params![
                snapshot.room_id.to_string(),
                snapshot.moderator,
                participants,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn load(&self, room_id: Uuid) -> Result<Option<SessionSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT moderator, participants FROM session_snapshots WHERE room_id = ?1",
                params![room_id.to_string()],
                |row| {
                    let moderator: Option<String> = row.get(0)?;
                    let participants: String = row.get(1)?;
                    Ok(SessionSnapshot {
                        room_id,
                        moderator,
                        participants: parse_json(&participants)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    /// When the snapshot was last written
    pub fn updated_at(&self, room_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let ts = self
            .conn
            .query_row(
                "SELECT updated_at FROM session_snapshots WHERE room_id = ?1",
                params![room_id.to_string()],
                |row| {
                    let s: String = row.get(0)?;
                    parse_datetime(&s)
                },
            )
            .optional()?;
        Ok(ts)
    }

    pub fn delete(&self, room_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM session_snapshots WHERE room_id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(())
    }

    /// Drop snapshots not written since `before`
    pub fn prune_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM session_snapshots WHERE updated_at < ?1",
            params![before.to_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::Duration;

    #[test]
    fn test_snapshot_save_load() {
        let db = Database::open_in_memory().unwrap();
        let store = db.snapshots();
        let room_id = Uuid::new_v4();

        let snapshot = SessionSnapshot {
            room_id,
            moderator: Some("alice".into()),
            participants: vec!["alice".into(), "bob".into()],
        };
        store.save(&snapshot).unwrap();
        assert_eq!(store.load(room_id).unwrap(), Some(snapshot));
        assert!(store.updated_at(room_id).unwrap().is_some());
    }

    #[test]
    fn test_snapshot_upsert_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let store = db.snapshots();
        let room_id = Uuid::new_v4();

        let mut snapshot = SessionSnapshot::new(room_id);
        store.save(&snapshot).unwrap();
        snapshot.participants.push("carol".into());
        store.save(&snapshot).unwrap();
        assert_eq!(store.load(room_id).unwrap().unwrap().participants, vec!["carol"]);

        store.delete(room_id).unwrap();
        assert!(store.load(room_id).unwrap().is_none());
    }

    #[test]
    fn test_prune_before() {
        let db = Database::open_in_memory().unwrap();
        let store = db.snapshots();
        store.save(&SessionSnapshot::new(Uuid::new_v4())).unwrap();

        assert_eq!(store.prune_before(Utc::now() - Duration::hours(1)).unwrap(), 0);
        assert_eq!(store.prune_before(Utc::now() + Duration::hours(1)).unwrap(), 1);
    }
}
