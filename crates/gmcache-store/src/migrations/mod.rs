//! Database migration runners.
//!
//! Each database tracks its schema with `PRAGMA user_version`; on open, every
//! step above the stored version is applied in order and the pragma bumped,
//! so a step runs exactly once per file.

pub mod v001_initial;
pub mod v002_blobs;
pub mod persist_v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = (u32, &'static str, fn(&Connection) -> rusqlite::Result<()>);

const CACHE_STEPS: &[Step] = &[
    (1, "v001_initial", v001_initial::up),
    (2, "v002_blobs", v002_blobs::up),
];

const PERSIST_STEPS: &[Step] = &[(1, "persist_v001_initial", persist_v001_initial::up)];

/// Bring the cache database schema up to date.
pub fn run_cache_migrations(conn: &Connection) -> Result<()> {
    run_steps(conn, "cache", CACHE_STEPS)
}

/// Bring the persist database schema up to date.
pub fn run_persist_migrations(conn: &Connection) -> Result<()> {
    run_steps(conn, "persist", PERSIST_STEPS)
}

fn run_steps(conn: &Connection, database: &str, steps: &[Step]) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = steps.last().map(|(v, _, _)| *v).unwrap_or(0);

    tracing::info!(
        database,
        current_version = current,
        target_version = target,
        "checking database migrations"
    );

    if current > target {
        return Err(StoreError::Migration(format!(
            "{database} schema version {current} is newer than this build supports ({target})"
        )));
    }

    for (version, name, up) in steps.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(database, migration = name, "applying migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
