use thiserror::Error;

/// A malformed entity reached the merge engine.
///
/// This always indicates a bug upstream of the cache; the merge engine panics
/// with this description rather than returning it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeInvariantViolation {
    #[error("conversation has an empty id")]
    EmptyConversationId,

    #[error("message in conversation {conversation} has an empty id")]
    EmptyMessageId { conversation: String },

    #[error("message {id} in conversation {conversation} is keyed as {key}")]
    MessageKeyMismatch {
        conversation: String,
        key: String,
        id: String,
    },

    #[error("member in conversation {conversation} has an empty id")]
    EmptyMemberId { conversation: String },

    #[error("cannot merge conversation {incoming} into {existing}")]
    ConversationMismatch { existing: String, incoming: String },
}

/// Failure talking to the remote messaging API.
///
/// `Clone` so a single failed fetch can be handed to every waiter of a
/// single-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteFetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
}

impl RemoteFetchError {
    /// Whether retrying the same request can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::UnknownConversation(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(RemoteFetchError::Timeout.is_transient());
        assert!(RemoteFetchError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!RemoteFetchError::Api {
            status: 401,
            message: "unauthorized".into()
        }
        .is_transient());
        assert!(!RemoteFetchError::UnknownConversation("g1".into()).is_transient());
    }
}
