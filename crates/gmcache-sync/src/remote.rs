//! The seam between the cache and the remote messaging API.

use async_trait::async_trait;

use gmcache_shared::{Conversation, ConversationId, Message, MessageId, RemoteFetchError};

/// Read-only access to the remote API.
///
/// Implementations own transport, authentication and rate limiting. The
/// cache never writes through this trait.
#[async_trait]
pub trait RemoteConversationSource: Send + Sync {
    /// Every conversation visible to the signed-in user. Returned
    /// conversations carry their scalar fields, members and preview; the
    /// message set is usually empty.
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, RemoteFetchError>;

    /// One page of messages strictly older than `before` (or the newest
    /// page when `before` is `None`). An empty page means the start of the
    /// history has been reached.
    async fn fetch_message_page(
        &self,
        conversation_id: &ConversationId,
        before: Option<&MessageId>,
    ) -> Result<Vec<Message>, RemoteFetchError>;
}
