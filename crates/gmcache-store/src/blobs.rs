use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use gmcache_shared::{BlobKey, BlobKind};

use crate::database::{format_timestamp, CacheDatabase};
use crate::error::{Result, StoreError};

/// Row counts and payload sizes per blob table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStats {
    pub avatar_count: u64,
    pub avatar_bytes: u64,
    pub image_count: u64,
    pub image_bytes: u64,
}

fn table(kind: BlobKind) -> &'static str {
    match kind {
        BlobKind::Avatar => "avatar_blobs",
        BlobKind::Image => "image_blobs",
    }
}

impl CacheDatabase {
    /// Cached payload for `key`, verified against its stored hash.
    pub fn get_blob(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let storage_key = key.storage_key();
        let sql = format!("SELECT data, blake3_hash FROM {} WHERE key = ?1", table(key.kind));

        let row: Option<(Vec<u8>, String)> = self
            .conn
            .query_row(&sql, params![storage_key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((data, hash)) = row else {
            return Ok(None);
        };
        if blake3::hash(&data).to_hex().as_str() != hash {
            tracing::warn!(key = %storage_key, "cached blob failed integrity check");
            return Err(StoreError::BlobIntegrity { key: storage_key });
        }
        Ok(Some(data))
    }

    /// Store a downloaded payload. Entries are immutable: if `key` is
    /// already cached the existing bytes are kept and `false` is returned.
    pub fn insert_blob(&self, key: &BlobKey, data: &[u8]) -> Result<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (key, url, data, size, blake3_hash, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table(key.kind)
        );
        let inserted = self.conn.execute(
            &sql,
            params![
                key.storage_key(),
                key.url,
                data,
                data.len() as i64,
                blake3::hash(data).to_hex().as_str(),
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Drop a corrupt or unwanted entry so the next lookup refetches it.
    pub fn remove_blob(&self, key: &BlobKey) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", table(key.kind));
        let affected = self.conn.execute(&sql, params![key.storage_key()])?;
        Ok(affected > 0)
    }

    pub fn blob_stats(&self) -> Result<BlobStats> {
        let count = |kind: BlobKind| -> Result<(u64, u64)> {
            let sql = format!("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM {}", table(kind));
            let (n, bytes): (i64, i64) =
                self.conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok((n as u64, bytes as u64))
        };

        let (avatar_count, avatar_bytes) = count(BlobKind::Avatar)?;
        let (image_count, image_bytes) = count(BlobKind::Image)?;
        Ok(BlobStats {
            avatar_count,
            avatar_bytes,
            image_count,
            image_bytes,
        })
    }
}
