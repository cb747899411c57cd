//! Entity model for cached conversations.
//!
//! These are plain data: identity is always the remote-assigned id, never the
//! Rust value's address, and the only behaviour here is structural
//! validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{AVATAR_KEY_SUFFIX, IMAGE_KEY_SUFFIX};
use crate::error::MergeInvariantViolation;
use crate::types::{ConversationId, ConversationKind, MemberId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A group or a direct chat, together with whatever of it is cached locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub creator_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Membership cap reported by the API (groups only).
    pub max_members: Option<u32>,
    /// Inline summary of the newest message, as returned by list calls.
    pub preview: Option<LatestMessagePreview>,
    /// The other participant of a chat. Always `None` for groups.
    pub other_user: Option<Member>,
    /// Members in the order they were first seen.
    pub members: Vec<Member>,
    /// Cached messages keyed by id.
    pub messages: BTreeMap<MessageId, Message>,
}

impl Conversation {
    /// A conversation with only its identity and name set.
    pub fn new(id: impl Into<ConversationId>, kind: ConversationKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            description: None,
            image_url: None,
            creator_user_id: None,
            created_at: now,
            updated_at: now,
            max_members: None,
            preview: None,
            other_user: None,
            members: Vec::new(),
            messages: BTreeMap::new(),
        }
    }

    /// Insert a message, re-parenting it to this conversation.
    ///
    /// Returns `false` (and leaves the cached copy alone) if a message with
    /// the same id is already present.
    pub fn insert_message(&mut self, mut message: Message) -> bool {
        if self.messages.contains_key(&message.id) {
            return false;
        }
        message.conversation_id = self.id.clone();
        self.messages.insert(message.id.clone(), message);
        true
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members.iter().find(|m| &m.id == id)
    }

    /// Newest cached message by id order.
    pub fn newest_message(&self) -> Option<&Message> {
        self.messages.values().next_back()
    }

    /// Check the structural invariants the merge engine relies on.
    pub fn validate(&self) -> Result<(), MergeInvariantViolation> {
        if self.id.is_empty() {
            return Err(MergeInvariantViolation::EmptyConversationId);
        }
        let conversation = self.id.to_string();
        if self
            .messages
            .iter()
            .any(|(key, m)| key.is_empty() || m.id.is_empty())
        {
            return Err(MergeInvariantViolation::EmptyMessageId { conversation });
        }
        if let Some((key, m)) = self.messages.iter().find(|(key, m)| **key != m.id) {
            return Err(MergeInvariantViolation::MessageKeyMismatch {
                conversation,
                key: key.to_string(),
                id: m.id.to_string(),
            });
        }
        if self
            .members
            .iter()
            .chain(self.other_user.iter())
            .any(|m| m.id.is_empty())
        {
            return Err(MergeInvariantViolation::EmptyMemberId { conversation });
        }
        Ok(())
    }
}

/// Lightweight copy of a conversation's newest message.
///
/// Stored as an opaque value: `referenced_message_id` points at a real
/// message row and must never be used as this value's own key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestMessagePreview {
    pub referenced_message_id: MessageId,
    pub nickname: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub user_id: UserId,
    pub nickname: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub autokicked: bool,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, user_id: impl Into<UserId>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            nickname: nickname.into(),
            image_url: None,
            roles: Vec::new(),
            muted: false,
            autokicked: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Client-generated GUID used by the API to de-duplicate sends.
    pub source_guid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub sender_id: String,
    /// Sender's display name at send time.
    pub name: String,
    pub avatar_url: Option<String>,
    pub text: Option<String>,
    /// Set for messages generated by the service itself.
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Users who liked the message.
    #[serde(default)]
    pub favorited_by: Vec<UserId>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        user_id: impl Into<UserId>,
        text: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            source_guid: None,
            created_at: Utc::now(),
            sender_id: user_id.to_string(),
            user_id,
            name: String::new(),
            avatar_url: None,
            text: Some(text.into()),
            system: false,
            attachments: Vec::new(),
            favorited_by: Vec::new(),
        }
    }
}

/// Message attachment as returned by the API's `attachments` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Image {
        url: String,
    },
    Emoji {
        placeholder: String,
        /// `[pack_id, offset]` pairs, one per placeholder occurrence.
        charmap: Vec<[u32; 2]>,
    },
    Location {
        name: String,
        lat: String,
        lng: String,
    },
    Split {
        token: String,
    },
    Mentions {
        user_ids: Vec<UserId>,
        /// `[start, length]` ranges into the message text.
        loci: Vec<[u32; 2]>,
    },
    Video {
        url: String,
        preview_url: Option<String>,
    },
    LinkedImage {
        url: String,
    },
}

// ---------------------------------------------------------------------------
// Index status
// ---------------------------------------------------------------------------

/// Per-conversation indexing progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStatus {
    pub conversation_id: ConversationId,
    /// Every message at or before this id is cached.
    pub last_indexed_message_id: MessageId,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Avatar,
    Image,
}

impl BlobKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Avatar => AVATAR_KEY_SUFFIX,
            Self::Image => IMAGE_KEY_SUFFIX,
        }
    }
}

/// Address of a downloaded avatar or image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub kind: BlobKind,
    pub url: String,
}

impl BlobKey {
    pub fn avatar(url: impl Into<String>) -> Self {
        Self {
            kind: BlobKind::Avatar,
            url: url.into(),
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: BlobKind::Image,
            url: url.into(),
        }
    }

    /// Key under which the payload is stored, unique across kinds.
    pub fn storage_key(&self) -> String {
        format!("{}#{}", self.url, self.kind.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_message_keeps_first_copy() {
        let mut conv = Conversation::new("g1", ConversationKind::Group, "Group");
        assert!(conv.insert_message(Message::new("1", "elsewhere", "u1", "first")));
        assert!(!conv.insert_message(Message::new("1", "g1", "u1", "second")));

        let cached = &conv.messages[&MessageId::from("1")];
        assert_eq!(cached.text.as_deref(), Some("first"));
        assert_eq!(cached.conversation_id, conv.id);
    }

    #[test]
    fn validate_rejects_empty_ids() {
        let conv = Conversation::new("", ConversationKind::Group, "x");
        assert_eq!(conv.validate(), Err(MergeInvariantViolation::EmptyConversationId));

        let mut conv = Conversation::new("g1", ConversationKind::Group, "x");
        conv.members.push(Member::new("", "u1", "nobody"));
        assert!(matches!(
            conv.validate(),
            Err(MergeInvariantViolation::EmptyMemberId { .. })
        ));
    }

    #[test]
    fn validate_rejects_message_filed_under_another_id() {
        let mut conv = Conversation::new("g1", ConversationKind::Group, "x");
        conv.messages
            .insert(MessageId::from("1"), Message::new("2", "g1", "u1", "misfiled"));

        assert_eq!(
            conv.validate(),
            Err(MergeInvariantViolation::MessageKeyMismatch {
                conversation: "g1".into(),
                key: "1".into(),
                id: "2".into(),
            })
        );
    }

    #[test]
    fn blob_keys_do_not_collide_across_kinds() {
        let url = "https://i.groupme.com/abc";
        assert_ne!(
            BlobKey::avatar(url).storage_key(),
            BlobKey::image(url).storage_key()
        );
    }

    #[test]
    fn attachments_use_api_type_tags() {
        let json = r#"{"type":"linked_image","url":"https://x/y.png"}"#;
        let parsed: Attachment = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            Attachment::LinkedImage {
                url: "https://x/y.png".into()
            }
        );
    }
}
