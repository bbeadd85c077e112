//! SQLite storage layer for Estima
//!
//! Local, advisory persistence for a client: cached session snapshots, issue
//! lists and deck choices per room, plus user preferences.

mod decks;
mod issue_cache;
mod migrations;
mod parse;
mod preferences;
mod snapshots;
mod traits;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DeckConfig, Issue, SessionSnapshot};

pub use decks::DeckConfigStore;
pub use issue_cache::IssueCacheStore;
pub use preferences::{PreferencesStore, UserPreferences, UserRole};
pub use snapshots::SnapshotStore;
pub use traits::SessionCache;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    pub fn snapshots(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(&self.conn)
    }

    pub fn issue_cache(&self) -> IssueCacheStore<'_> {
        IssueCacheStore::new(&self.conn)
    }

    pub fn decks(&self) -> DeckConfigStore<'_> {
        DeckConfigStore::new(&self.conn)
    }

    pub fn preferences(&self) -> PreferencesStore<'_> {
        PreferencesStore::new(&self.conn)
    }

    /// Drop cached snapshots and issue lists not touched since `before`
    #[instrument(skip(self))]
    pub fn prune_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let removed = self.snapshots().prune_before(before)? + self.issue_cache().prune_before(before)?;
        if removed > 0 {
            debug!(removed, "Pruned stale room caches");
        }
        Ok(removed)
    }
}

impl SessionCache for Database {
    fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.snapshots().save(snapshot)
    }

    fn load_snapshot(&self, room_id: Uuid) -> Result<Option<SessionSnapshot>> {
        self.snapshots().load(room_id)
    }

    fn save_issues(&self, room_id: Uuid, issues: &[Issue]) -> Result<()> {
        self.issue_cache().save(room_id, issues)
    }

    fn load_issues(&self, room_id: Uuid) -> Result<Vec<Issue>> {
        self.issue_cache().load(room_id)
    }

    fn save_deck(&self, room_id: Uuid, config: &DeckConfig) -> Result<()> {
        self.decks().save(room_id, config)
    }

    fn load_deck(&self, room_id: Uuid) -> Result<Option<DeckConfig>> {
        self.decks().load(room_id)
    }

    #[instrument(skip(self))]
    fn clear_room(&self, room_id: Uuid) -> Result<()> {
        self.snapshots().delete(room_id)?;
        self.issue_cache().delete(room_id)?;
        self.decks().delete(room_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("estima.db");
        let room_id = Uuid::new_v4();

        {
            let db = Database::open(&path).unwrap();
            db.save_issues(room_id, &[Issue::new("PP-1", "Login flow")]).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.load_issues(room_id).unwrap().len(), 1);
        assert!(db.schema_version() >= 1);
    }

    #[test]
    fn test_clear_room() {
        let db = Database::open_in_memory().unwrap();
        let room_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        db.save_snapshot(&SessionSnapshot::new(room_id)).unwrap();
        db.save_issues(room_id, &[Issue::new("PP-1", "A")]).unwrap();
        db.save_deck(room_id, &DeckConfig::default()).unwrap();
        db.save_issues(other, &[Issue::new("PP-1", "B")]).unwrap();

        db.clear_room(room_id).unwrap();
        assert!(db.load_snapshot(room_id).unwrap().is_none());
        assert!(db.load_issues(room_id).unwrap().is_empty());
        assert!(db.load_deck(room_id).unwrap().is_none());
        assert_eq!(db.load_issues(other).unwrap().len(), 1);
    }
}
