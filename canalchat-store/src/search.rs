//! Full-text search over `messages.text`, satisfying spec.md §6's "(b)
//! full-text search over messages.text" store contract. Diesel's query
//! DSL has no FTS5 support, so this goes through `diesel::sql_query`
//! against the `messages_fts` shadow table created in the init
//! migration -- the same raw-SQL escape hatch the teacher reaches for
//! when the DSL isn't expressive enough.

use crate::conn::Pool;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamp};

#[derive(Debug, Clone, QueryableByName)]
pub struct SearchHit {
    #[sql_type = "BigInt"]
    pub id: i64,
    #[sql_type = "BigInt"]
    pub channel_id: i64,
    #[sql_type = "BigInt"]
    pub user_id: i64,
    #[sql_type = "Text"]
    pub text: String,
    #[sql_type = "Timestamp"]
    pub ts: NaiveDateTime,
}

/// Searches the given channel's messages matching `query` (FTS5 MATCH
/// syntax), most recent first, capped at `limit` rows.
pub fn search_messages(
    pool: &Pool,
    channel_id: i64,
    query: &str,
    limit: i64,
) -> crate::error::Result<Vec<SearchHit>> {
    let conn = pool.get()?;
    let hits = diesel::sql_query(
        "SELECT m.id, m.channel_id, m.user_id, m.text, m.ts \
         FROM messages_fts f \
         JOIN messages m ON m.id = f.rowid \
         WHERE f.text MATCH ? AND m.channel_id = ? \
         ORDER BY m.ts DESC LIMIT ?",
    )
    .bind::<Text, _>(query)
    .bind::<BigInt, _>(channel_id)
    .bind::<BigInt, _>(limit)
    .load::<SearchHit>(&conn)?;
    Ok(hits)
}
