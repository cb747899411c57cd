//! Database connection management.
//!
//! Two files live side by side in the data directory:
//! - [`CacheDatabase`] (`cache.db`): conversations, members, messages, blobs
//!   and indexing progress. Everything in it can be re-fetched.
//! - [`PersistDatabase`] (`persist.db`): user state (stars, hidden messages,
//!   read positions, window state) that must survive a cache clear.
//!
//! Each wraps a single [`rusqlite::Connection`]; migrations run before the
//! handle is returned.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use gmcache_shared::constants::{CACHE_DB_FILE, PERSIST_DB_FILE};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Platform data directory for gmcache.
///
/// - Linux:   `~/.local/share/gmcache`
/// - macOS:   `~/Library/Application Support/com.gmcache.gmcache`
/// - Windows: `{FOLDERID_RoamingAppData}\gmcache\gmcache\data`
pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "gmcache", "gmcache").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(conn)
}

// ---------------------------------------------------------------------------
// Cache database
// ---------------------------------------------------------------------------

/// Handle to the re-fetchable cache.
pub struct CacheDatabase {
    pub(crate) conn: Connection,
}

impl CacheDatabase {
    /// Open (or create) `cache.db` inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open_at(&data_dir.join(CACHE_DB_FILE))
    }

    /// Open (or create) a cache database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening cache database");

        let conn = open_connection(path)?;
        migrations::run_cache_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Flush the write-ahead log into the main database file.
    ///
    /// Writes are durable once their transaction commits; this only folds
    /// the WAL back so the file on disk is self-contained.
    pub fn save_all(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Application-level data migration marker (not the schema version).
    pub fn migration_version(&self) -> Result<u32> {
        read_migration_version(&self.conn)
    }

    pub fn set_migration_version(&self, version: u32) -> Result<()> {
        write_migration_version(&self.conn, version)
    }
}

// ---------------------------------------------------------------------------
// Persist database
// ---------------------------------------------------------------------------

/// Handle to user state that outlives the cache.
pub struct PersistDatabase {
    pub(crate) conn: Connection,
}

impl PersistDatabase {
    /// Open (or create) `persist.db` inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open_at(&data_dir.join(PERSIST_DB_FILE))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening persist database");

        let conn = open_connection(path)?;
        migrations::run_persist_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    pub fn migration_version(&self) -> Result<u32> {
        read_migration_version(&self.conn)
    }

    pub fn set_migration_version(&self, version: u32) -> Result<()> {
        write_migration_version(&self.conn, version)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MIGRATION_VERSION_KEY: &str = "migration_version";

fn read_migration_version(conn: &Connection) -> Result<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM app_meta WHERE key = ?1",
            params![MIGRATION_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::Migration(format!("invalid migration_version {v:?}"))),
    }
}

fn write_migration_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO app_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![MIGRATION_VERSION_KEY, version.to_string()],
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn parse_json<T: DeserializeOwned>(col: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let cache = CacheDatabase::open_in(dir.path()).expect("should open cache");
        let persist = PersistDatabase::open_in(dir.path()).expect("should open persist");

        assert!(cache.path().unwrap().ends_with(CACHE_DB_FILE));
        assert!(persist.path().unwrap().ends_with(PERSIST_DB_FILE));
    }

    #[test]
    fn migration_version_defaults_to_zero_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = CacheDatabase::open_in(dir.path()).unwrap();
            assert_eq!(cache.migration_version().unwrap(), 0);
            cache.set_migration_version(3).unwrap();
        }
        let cache = CacheDatabase::open_in(dir.path()).unwrap();
        assert_eq!(cache.migration_version().unwrap(), 3);

        // Tracked per file.
        let persist = PersistDatabase::open_in(dir.path()).unwrap();
        assert_eq!(persist.migration_version().unwrap(), 0);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2024-01-01T00:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(parse_timestamp(0, &format_timestamp(&late)).unwrap(), late);
    }

    #[test]
    fn save_all_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDatabase::open_in(dir.path()).unwrap();
        cache.save_all().expect("checkpoint should succeed");
    }
}
