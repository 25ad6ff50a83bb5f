//! Metadata index for the disk tier.
//!
//! One SQLite table maps each cache key to its blob file and bookkeeping.
//! Secondary indices on `accessed_at` and `expires_at` back the eviction and
//! expiry scans. Timestamps are unix milliseconds so they survive restarts.
//!
//! The index is synchronous; the disk tier drives it from blocking tasks.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CacheError;

/// File name of the index inside the cache directory.
pub const INDEX_FILE: &str = "index.sqlite";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    key          TEXT PRIMARY KEY,
    file_name    TEXT NOT NULL,
    size         INTEGER NOT NULL,
    created_at   INTEGER NOT NULL,
    accessed_at  INTEGER NOT NULL,
    expires_at   INTEGER,
    access_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS entries_accessed_at ON entries (accessed_at);
CREATE INDEX IF NOT EXISTS entries_expires_at ON entries (expires_at);
";

/// Bookkeeping for one persisted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub key: String,
    pub file_name: String,
    /// Compressed size on disk.
    pub size: i64,
    pub created_at: i64,
    pub accessed_at: i64,
    pub expires_at: Option<i64>,
    pub access_count: i64,
}

impl EntryMetadata {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            file_name: row.get(1)?,
            size: row.get(2)?,
            created_at: row.get(3)?,
            accessed_at: row.get(4)?,
            expires_at: row.get(5)?,
            access_count: row.get(6)?,
        })
    }
}

/// Entry count and tracked bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexUsage {
    pub entries: u64,
    pub bytes: u64,
}

pub struct MetadataIndex {
    conn: Connection,
}

impl MetadataIndex {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn lookup(&self, key: &str) -> Result<Option<EntryMetadata>, CacheError> {
        let row = self
            .conn
            .query_row(
                "SELECT key, file_name, size, created_at, accessed_at, expires_at, access_count
                 FROM entries WHERE key = ?1",
                params![key],
                EntryMetadata::from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or replace the row for `meta.key`.
    pub fn upsert(&self, meta: &EntryMetadata) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT INTO entries (key, file_name, size, created_at, accessed_at, expires_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                file_name = excluded.file_name,
                size = excluded.size,
                created_at = excluded.created_at,
                accessed_at = excluded.accessed_at,
                expires_at = excluded.expires_at,
                access_count = excluded.access_count",
            params![
                meta.key,
                meta.file_name,
                meta.size,
                meta.created_at,
                meta.accessed_at,
                meta.expires_at,
                meta.access_count,
            ],
        )?;
        Ok(())
    }

    /// Record a read.
    pub fn touch(&self, key: &str, now_ms: i64) -> Result<(), CacheError> {
        self.conn.execute(
            "UPDATE entries SET accessed_at = ?2, access_count = access_count + 1 WHERE key = ?1",
            params![key, now_ms],
        )?;
        Ok(())
    }

    /// Delete a row, returning its blob file name.
    pub fn remove(&self, key: &str) -> Result<Option<String>, CacheError> {
        let file_name = self
            .conn
            .query_row(
                "DELETE FROM entries WHERE key = ?1 RETURNING file_name",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(file_name)
    }

    /// Delete every row whose expiry has passed, returning their blob names.
    pub fn take_expired(&self, now_ms: i64) -> Result<Vec<String>, CacheError> {
        let mut stmt = self.conn.prepare(
            "DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?1
             RETURNING file_name",
        )?;
        let names = stmt
            .query_map(params![now_ms], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Delete least recently accessed rows until the tracked total fits in
    /// `max_bytes`. `protect` is never chosen. Returns `(key, file_name)` pairs.
    pub fn evict_over_budget(
        &self,
        max_bytes: u64,
        protect: &str,
    ) -> Result<Vec<(String, String)>, CacheError> {
        let mut total = self.usage()?.bytes;
        if total <= max_bytes {
            return Ok(Vec::new());
        }

        let mut victims = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT key, file_name, size FROM entries
                 WHERE key != ?1 ORDER BY accessed_at ASC",
            )?;
            let mut rows = stmt.query(params![protect])?;
            while total > max_bytes {
                let Some(row) = rows.next()? else { break };
                let size: i64 = row.get(2)?;
                victims.push((row.get::<_, String>(0)?, row.get::<_, String>(1)?));
                total = total.saturating_sub(size.max(0) as u64);
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        for (key, _) in &victims {
            tx.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(victims)
    }

    /// Delete all rows, returning their blob names.
    pub fn take_all(&self) -> Result<Vec<String>, CacheError> {
        let mut stmt = self.conn.prepare("DELETE FROM entries RETURNING file_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn usage(&self) -> Result<IndexUsage, CacheError> {
        let (entries, bytes) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(IndexUsage {
            entries: entries.max(0) as u64,
            bytes: bytes.max(0) as u64,
        })
    }
}
