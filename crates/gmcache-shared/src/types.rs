use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// Remote-assigned identifiers. GroupMe hands these out as decimal strings,
// but nothing here assumes they parse as numbers.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Group or chat identifier.
    ConversationId
);
string_id!(
    /// Membership identifier, unique per (conversation, user).
    MemberId
);
string_id!(
    /// Account identifier, stable across conversations.
    UserId
);
string_id!(
    /// Message identifier, unique within its conversation.
    ///
    /// Ordered by `(length, bytes)`: for decimal ids without leading zeros
    /// that is numeric order, which is creation order in practice.
    MessageId
);

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Group,
    Chat,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "group" => Some(Self::Group),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}
