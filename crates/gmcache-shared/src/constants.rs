/// File name of the cache database (conversations, messages, blobs).
pub const CACHE_DB_FILE: &str = "cache.db";

/// File name of the persist database (stars, hidden messages, read state).
pub const PERSIST_DB_FILE: &str = "persist.db";

/// Default number of cached messages shown by a local listing.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Conversations loaded per page by the lazy conversation iterator.
pub const CONVERSATION_PAGE_SIZE: u32 = 50;

/// Suffixes separating blob namespaces that may share a URL.
pub const AVATAR_KEY_SUFFIX: &str = "avatar";
pub const IMAGE_KEY_SUFFIX: &str = "image";

/// Remote fetch retry defaults.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_INITIAL_MS: u64 = 250;
pub const DEFAULT_RETRY_MAX_MS: u64 = 8_000;
