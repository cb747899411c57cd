//! Row helpers for [`Member`] records.

use rusqlite::{params, Connection};

use gmcache_shared::{ConversationId, Member, MemberId, UserId};

use crate::database::{parse_json, to_json};
use crate::error::Result;

/// Insert or overwrite a member at `position`.
///
/// On conflict the position is left alone so first-seen order survives
/// later updates.
pub(crate) fn upsert_member(
    conn: &Connection,
    conversation_id: &ConversationId,
    position: usize,
    member: &Member,
) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO members (conversation_id, id, position, user_id, nickname, image_url, roles_json, muted, autokicked)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(conversation_id, id) DO UPDATE SET
             user_id = excluded.user_id,
             nickname = excluded.nickname,
             image_url = excluded.image_url,
             roles_json = excluded.roles_json,
             muted = excluded.muted,
             autokicked = excluded.autokicked",
    )?
    .execute(params![
        conversation_id.as_str(),
        member.id.as_str(),
        position as i64,
        member.user_id.as_str(),
        member.nickname,
        member.image_url,
        to_json(&member.roles)?,
        member.muted as i32,
        member.autokicked as i32,
    ])?;
    Ok(())
}

/// All members of a conversation in first-seen order.
pub(crate) fn load_members(conn: &Connection, conversation_id: &ConversationId) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, nickname, image_url, roles_json, muted, autokicked
         FROM members
         WHERE conversation_id = ?1
         ORDER BY position ASC",
    )?;

    let rows = stmt.query_map(params![conversation_id.as_str()], row_to_member)?;

    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let roles_json: String = row.get(4)?;
    let muted: i32 = row.get(5)?;
    let autokicked: i32 = row.get(6)?;

    Ok(Member {
        id: MemberId(id),
        user_id: UserId(user_id),
        nickname: row.get(2)?,
        image_url: row.get(3)?,
        roles: parse_json(4, &roles_json)?,
        muted: muted != 0,
        autokicked: autokicked != 0,
    })
}
