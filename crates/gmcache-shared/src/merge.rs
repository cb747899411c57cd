//! Reconciles freshly fetched conversations with their cached counterparts.
//!
//! Message history is cache-first: a summary fetch only carries a small
//! recent window, so messages are unioned by id and cached copies always win.
//! Member state is remote-first: members are matched by id and their fields
//! overwritten from the incoming copy.

use tracing::debug;

use crate::model::{Conversation, Member, Message};
use crate::types::{MemberId, MessageId};

/// What a merge changed, so the store knows which rows to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub messages_added: Vec<MessageId>,
    pub members_added: Vec<MemberId>,
    pub members_updated: Vec<MemberId>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.messages_added.is_empty()
            && self.members_added.is_empty()
            && self.members_updated.is_empty()
    }
}

/// Merge `incoming` into `existing` in place.
///
/// # Panics
///
/// If either side fails [`Conversation::validate`] or the ids differ.
pub fn merge_conversation(existing: &mut Conversation, incoming: Conversation) -> MergeReport {
    assert_valid(existing);
    assert_valid(&incoming);
    if existing.id != incoming.id {
        panic!(
            "{}",
            crate::error::MergeInvariantViolation::ConversationMismatch {
                existing: existing.id.to_string(),
                incoming: incoming.id.to_string(),
            }
        );
    }

    let Conversation {
        id: _,
        kind,
        name,
        description,
        image_url,
        creator_user_id,
        created_at,
        updated_at,
        max_members,
        preview,
        other_user,
        members,
        messages,
    } = incoming;

    existing.kind = kind;
    existing.name = name;
    existing.description = description;
    existing.image_url = image_url;
    existing.creator_user_id = creator_user_id;
    existing.created_at = created_at;
    existing.updated_at = updated_at;
    existing.max_members = max_members;
    existing.preview = preview;
    existing.other_user = other_user;

    let (members_added, members_updated) = merge_members(&mut existing.members, members);
    let messages_added = merge_messages(existing, messages.into_values());

    debug!(
        conversation = %existing.id,
        messages_added = messages_added.len(),
        members_added = members_added.len(),
        members_updated = members_updated.len(),
        "merged conversation"
    );

    MergeReport {
        messages_added,
        members_added,
        members_updated,
    }
}

/// Union `incoming` messages into `existing` by id, keeping cached copies.
///
/// Returns the ids that were not cached before, in the order encountered.
pub fn merge_messages<I>(existing: &mut Conversation, incoming: I) -> Vec<MessageId>
where
    I: IntoIterator<Item = Message>,
{
    let mut added = Vec::new();
    for message in incoming {
        if message.id.is_empty() {
            panic!(
                "{}",
                crate::error::MergeInvariantViolation::EmptyMessageId {
                    conversation: existing.id.to_string(),
                }
            );
        }
        let id = message.id.clone();
        if existing.insert_message(message) {
            added.push(id);
        }
    }
    added
}

/// Overwrite known members by id and append unknown ones.
///
/// Consumes `incoming` in a single pass; `existing` is never cleared, so
/// members absent from `incoming` stay cached.
fn merge_members(existing: &mut Vec<Member>, incoming: Vec<Member>) -> (Vec<MemberId>, Vec<MemberId>) {
    let mut added = Vec::new();
    let mut updated = Vec::new();

    for member in incoming {
        match existing.iter_mut().find(|m| m.id == member.id) {
            Some(cached) => {
                if *cached != member {
                    updated.push(member.id.clone());
                    *cached = member;
                }
            }
            None => {
                added.push(member.id.clone());
                existing.push(member);
            }
        }
    }

    (added, updated)
}

fn assert_valid(conversation: &Conversation) {
    if let Err(violation) = conversation.validate() {
        panic!("{violation}");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::{ConversationKind, UserId};

    fn group(id: &str, name: &str, message_ids: &[&str]) -> Conversation {
        let mut conv = Conversation::new(id, ConversationKind::Group, name);
        for mid in message_ids {
            conv.insert_message(Message::new(*mid, id, "u1", format!("msg {mid}")));
        }
        conv
    }

    fn ids(conv: &Conversation) -> Vec<&str> {
        conv.messages.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn rename_keeps_history_and_adds_new_messages() {
        let mut existing = group("g1", "original", &["1", "2"]);
        let incoming = group("g1", "renamed", &["2", "3"]);

        let report = merge_conversation(&mut existing, incoming);

        assert_eq!(existing.name, "renamed");
        assert_eq!(ids(&existing), ["1", "2", "3"]);
        assert_eq!(report.messages_added, vec![MessageId::from("3")]);
    }

    #[test]
    fn cached_message_wins_over_stale_incoming_copy() {
        let mut existing = group("g1", "g", &["1"]);
        existing
            .messages
            .get_mut(&MessageId::from("1"))
            .unwrap()
            .favorited_by
            .push("u2".into());

        let mut incoming = group("g1", "g", &[]);
        let mut stale = Message::new("1", "g1", "u1", "edited?");
        stale.favorited_by.clear();
        incoming.insert_message(stale);

        merge_conversation(&mut existing, incoming);

        let cached = &existing.messages[&MessageId::from("1")];
        assert_eq!(cached.text.as_deref(), Some("msg 1"));
        assert_eq!(cached.favorited_by, vec![UserId::from("u2")]);
    }

    /// Messages built once so every batch carries byte-identical copies.
    fn message_pool(ids: &[&str]) -> HashMap<String, Message> {
        ids.iter()
            .map(|id| (id.to_string(), Message::new(*id, "g1", "u1", format!("msg {id}"))))
            .collect()
    }

    fn batch(pool: &HashMap<String, Message>, ids: &[&str]) -> Conversation {
        let mut conv = Conversation::new("g1", ConversationKind::Group, "g");
        for id in ids {
            conv.insert_message(pool[*id].clone());
        }
        conv
    }

    #[test]
    fn message_union_is_order_independent() {
        let pool = message_pool(&["1", "2", "3", "4", "5"]);
        let base = batch(&pool, &["1", "2"]);
        let b1 = batch(&pool, &["3", "4"]);
        let b2 = batch(&pool, &["4", "5", "1"]);

        let mut left = base.clone();
        merge_conversation(&mut left, b1.clone());
        merge_conversation(&mut left, b2.clone());

        let mut right = base;
        merge_conversation(&mut right, b2);
        merge_conversation(&mut right, b1);

        assert_eq!(left.messages, right.messages);
        assert_eq!(ids(&left), ["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn identical_copies_in_both_batches_collapse_to_one() {
        let pool = message_pool(&["7"]);
        let shared = pool["7"].clone();

        let mut left = batch(&pool, &[]);
        let first = merge_messages(&mut left, vec![shared.clone()]);
        let second = merge_messages(&mut left, vec![shared.clone()]);

        let mut right = batch(&pool, &[]);
        merge_messages(&mut right, vec![shared.clone(), shared.clone()]);

        assert_eq!(first, vec![MessageId::from("7")]);
        assert!(second.is_empty());
        assert_eq!(left.messages, right.messages);
        assert_eq!(left.messages[&MessageId::from("7")], shared);
    }

    #[test]
    fn incoming_member_state_overwrites_by_id() {
        let mut existing = group("g1", "g", &[]);
        existing.members.push(Member::new("5", "u5", "five"));
        existing.members.push(Member::new("6", "u6", "six"));

        let mut incoming = group("g1", "g", &[]);
        let mut muted = Member::new("5", "u5", "renamed five");
        muted.muted = true;
        incoming.members.push(muted);
        incoming.members.push(Member::new("7", "u7", "seven"));

        let report = merge_conversation(&mut existing, incoming);

        let five = existing.member(&"5".into()).unwrap();
        assert!(five.muted);
        assert_eq!(five.nickname, "renamed five");
        // Absent from incoming, still cached.
        assert!(existing.member(&"6".into()).is_some());
        let order: Vec<&str> = existing.members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["5", "6", "7"]);
        assert_eq!(report.members_added, vec![MemberId::from("7")]);
        assert_eq!(report.members_updated, vec![MemberId::from("5")]);
    }

    #[test]
    fn all_incoming_members_land_in_empty_destination() {
        let mut existing = group("g1", "g", &[]);
        let mut incoming = group("g1", "g", &[]);
        for i in 0..4 {
            incoming
                .members
                .push(Member::new(i.to_string(), format!("u{i}"), format!("m{i}")));
        }

        merge_conversation(&mut existing, incoming);
        assert_eq!(existing.members.len(), 4);
    }

    #[test]
    fn merging_same_conversation_twice_is_stable() {
        let mut existing = group("g1", "g", &["1"]);
        let incoming = group("g1", "g2", &["1", "2"]);

        merge_conversation(&mut existing, incoming.clone());
        let once = existing.clone();
        let report = merge_conversation(&mut existing, incoming);

        assert_eq!(existing, once);
        assert!(report.is_empty());
    }

    #[test]
    #[should_panic(expected = "cannot merge conversation")]
    fn mismatched_ids_panic() {
        let mut existing = group("g1", "g", &[]);
        merge_conversation(&mut existing, group("g2", "g", &[]));
    }

    #[test]
    #[should_panic(expected = "empty id")]
    fn empty_incoming_id_panics() {
        let mut existing = group("g1", "g", &[]);
        merge_conversation(&mut existing, group("", "g", &[]));
    }
}
