//! # gmcache-shared
//!
//! Entity model, identifiers and the merge engine shared by the gmcache
//! store and sync crates. Nothing in here performs I/O.

pub mod constants;
pub mod error;
pub mod merge;
pub mod model;
pub mod types;

pub use error::{MergeInvariantViolation, RemoteFetchError};
pub use merge::{merge_conversation, merge_messages, MergeReport};
pub use model::*;
pub use types::*;
