//! CLI command implementations.

use std::fmt::Write as _;

use anyhow::{Context, Result};

use gmcache_shared::{Conversation, ConversationId, Message, MessageId};
use gmcache_store::{CacheDatabase, PersistDatabase};
use gmcache_sync::{cache_handle, BlobCache, ConversationStore, Indexer, SyncConfig};

struct Services {
    store: ConversationStore,
    indexer: Indexer,
    blobs: BlobCache,
}

fn open_cache(config: &SyncConfig) -> Result<Services> {
    let db = CacheDatabase::open_in(&config.data_dir)
        .with_context(|| format!("Failed to open cache in {}", config.data_dir.display()))?;
    let handle = cache_handle(db);
    Ok(Services {
        store: ConversationStore::new(handle.clone()),
        indexer: Indexer::new(handle.clone()),
        blobs: BlobCache::new(handle),
    })
}

pub async fn list(config: &SyncConfig) -> Result<()> {
    let services = open_cache(config)?;
    let conversations = services.store.list_conversations().await?;

    if conversations.is_empty() {
        println!("No cached conversations.");
        return Ok(());
    }

    for conversation in &conversations {
        let count = services.store.message_count(conversation.id.clone()).await?;
        let watermark = services.indexer.get_watermark(conversation.id.clone()).await?;
        println!("{}", conversation_line(conversation, count, watermark.as_ref()));
    }
    Ok(())
}

pub async fn show(config: &SyncConfig, id: &str, limit: u32) -> Result<()> {
    let services = open_cache(config)?;
    let id = ConversationId::from(id);

    let Some(conversation) = services.store.get_conversation(id.clone()).await? else {
        println!("Conversation {id} is not cached.");
        return Ok(());
    };
    let count = services.store.message_count(id.clone()).await?;
    let watermark = services.indexer.get_watermark(id.clone()).await?;
    println!("{}", conversation_line(&conversation, count, watermark.as_ref()));

    if let Some(description) = conversation.description.as_deref().filter(|d| !d.is_empty()) {
        println!("  {description}");
    }
    println!("  {} members", conversation.members.len());
    println!();

    let mut messages = services.store.messages_before(id, None, limit).await?;
    messages.reverse();
    for message in &messages {
        println!("{}", message_line(message));
    }
    Ok(())
}

pub async fn stats(config: &SyncConfig) -> Result<()> {
    let services = open_cache(config)?;
    let totals = services.store.totals().await?;
    let blobs = services.blobs.stats().await?;

    println!("Data directory: {}", config.data_dir.display());
    println!("Conversations:  {}", totals.conversations);
    println!("Messages:       {}", totals.messages);
    println!("Avatars:        {} ({})", blobs.avatar_count, human_bytes(blobs.avatar_bytes));
    println!("Images:         {} ({})", blobs.image_count, human_bytes(blobs.image_bytes));
    Ok(())
}

pub async fn invalidate(config: &SyncConfig, id: &str) -> Result<()> {
    let services = open_cache(config)?;
    if services.indexer.invalidate(id.into()).await? {
        println!("Cleared watermark for {id}; the next sync re-reads its history.");
    } else {
        println!("{id} had no watermark.");
    }
    Ok(())
}

pub async fn evict(config: &SyncConfig, id: &str) -> Result<()> {
    let services = open_cache(config)?;
    if services.store.delete_conversation(id.into()).await? {
        services.store.save_all().await?;
        println!("Evicted {id} from the cache.");
    } else {
        println!("Conversation {id} is not cached.");
    }
    Ok(())
}

pub fn starred(config: &SyncConfig, id: &str) -> Result<()> {
    let persist = PersistDatabase::open_in(&config.data_dir)
        .with_context(|| format!("Failed to open persist store in {}", config.data_dir.display()))?;
    let ids = persist.starred_in_conversation(&id.into())?;

    if ids.is_empty() {
        println!("No starred messages in {id}.");
    }
    for message_id in ids {
        println!("{message_id}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn conversation_line(conversation: &Conversation, messages: u64, watermark: Option<&MessageId>) -> String {
    let mut line = format!(
        "{:<24} {:<5} {:<32} {:>7} msgs",
        conversation.id,
        conversation.kind.as_str(),
        truncate(&conversation.name, 32),
        messages
    );
    match watermark {
        Some(w) => {
            let _ = write!(line, "  indexed to {w}");
        }
        None => line.push_str("  not indexed"),
    }
    line
}

fn message_line(message: &Message) -> String {
    let time = message.created_at.format("%Y-%m-%d %H:%M");
    let text = message.text.as_deref().unwrap_or("");
    let extras = if message.attachments.is_empty() {
        String::new()
    } else {
        format!(" [+{} attachment(s)]", message.attachments.len())
    };
    format!("[{time}] {}: {text}{extras}", message.name)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
