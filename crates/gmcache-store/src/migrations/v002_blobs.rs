//! v002 -- Avatar and image payload tables.
//!
//! Kept in two tables so the same URL can be cached once as an avatar and
//! once as a post image without the entries colliding.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS avatar_blobs (
    key         TEXT PRIMARY KEY NOT NULL,    -- url + '#avatar'
    url         TEXT NOT NULL,
    data        BLOB NOT NULL,
    size        INTEGER NOT NULL,
    blake3_hash TEXT NOT NULL,                -- hex, checked on read
    fetched_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS image_blobs (
    key         TEXT PRIMARY KEY NOT NULL,    -- url + '#image'
    url         TEXT NOT NULL,
    data        BLOB NOT NULL,
    size        INTEGER NOT NULL,
    blake3_hash TEXT NOT NULL,
    fetched_at  TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
