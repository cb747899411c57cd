//! # gmcache-store
//!
//! Local SQLite persistence for gmcache.
//!
//! Two database files live side by side in the data directory. The cache
//! database holds everything that can be fetched again from the remote API
//! (conversations, members, messages, indexing watermarks, downloaded
//! avatars and images) and may be deleted at any time. The persist database
//! holds user state that cannot be recovered: starred and hidden messages,
//! read positions and window layout.
//!
//! Both handles are synchronous and wrap a single `rusqlite::Connection`.
//! Callers on an async runtime should drive them from a blocking task.

pub mod blobs;
pub mod conversations;
pub mod database;
pub mod index_status;
pub mod messages;
pub mod migrations;
pub mod persist;

mod error;
mod members;

pub use blobs::BlobStats;
pub use conversations::{ConversationPages, UpsertOutcome};
pub use database::{default_data_dir, CacheDatabase, PersistDatabase};
pub use error::{Result, StoreError};
pub use index_status::WatermarkAdvance;
