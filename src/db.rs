//! SQLite store of reference fingerprints.
//!
//! Entries are stored one hash string per row with their position, so an
//! entry set loads back exactly as it was written.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::fingerprint::FptEntry;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Track not found: {0}")]
    TrackNotFound(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    pub track_id: i64,
    pub name: String,
    pub entry_count: usize,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        log::debug!("Opening fingerprint store at {}", path.display());
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                track_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS fingerprint_entries (
                track_id    INTEGER NOT NULL,
                timestamp   INTEGER NOT NULL,
                position    INTEGER NOT NULL,
                hash        TEXT NOT NULL,
                FOREIGN KEY (track_id) REFERENCES tracks (track_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_entries_track
                ON fingerprint_entries (track_id, position);
            ",
        )?;
        Ok(())
    }

    pub fn find_track(&self, name: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT track_id FROM tracks WHERE name = ?1")?;
        Ok(stmt.query_row(params![name], |row| row.get(0)).optional()?)
    }

    pub fn require_track(&self, name: &str) -> Result<i64> {
        self.find_track(name)?
            .ok_or_else(|| DbError::TrackNotFound(name.to_string()))
    }

    /// Store `entries` under `name`, replacing any earlier fingerprints of that track.
    pub fn store_track(&mut self, name: &str, entries: &[FptEntry]) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM tracks WHERE name = ?1", params![name])?;
        tx.execute("INSERT INTO tracks (name) VALUES (?1)", params![name])?;
        let track_id = tx.last_insert_rowid();
        let mut rows = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fingerprint_entries (track_id, timestamp, position, hash)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                for hash in &entry.hashes {
                    stmt.execute(params![track_id, entry.timestamp, rows as i64, hash])?;
                    rows += 1;
                }
            }
        }
        tx.commit()?;
        log::info!(
            "Stored {} entries ({} hashes) for '{}'",
            entries.len(),
            rows,
            name
        );
        Ok(track_id)
    }

    /// Entries in the order they were stored. Consecutive rows sharing a
    /// timestamp form one entry.
    pub fn load_entries(&self, track_id: i64) -> Result<Vec<FptEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, hash FROM fingerprint_entries
             WHERE track_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![track_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries: Vec<FptEntry> = Vec::new();
        for row in rows {
            let (timestamp, hash) = row?;
            match entries.last_mut() {
                Some(last) if last.timestamp == timestamp => last.hashes.push(hash),
                _ => entries.push(FptEntry::new(timestamp, vec![hash])),
            }
        }
        Ok(entries)
    }

    pub fn list_tracks(&self) -> Result<Vec<TrackRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.track_id, t.name, COUNT(DISTINCT e.timestamp)
             FROM tracks t LEFT JOIN fingerprint_entries e ON e.track_id = t.track_id
             GROUP BY t.track_id ORDER BY t.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TrackRecord {
                track_id: row.get(0)?,
                name: row.get(1)?,
                entry_count: row.get::<_, i64>(2)? as usize,
            })
        })?;
        let tracks = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }
}
