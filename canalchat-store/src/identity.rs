//! Identity Resolver (C4): turns IRC login names into stable numeric
//! ids with exactly-one-row, find-or-create semantics. See spec.md §4.4.

use crate::conn::Pool;
use crate::error::{Result, StoreError};
use crate::schema::{channels, users};
use canalchat_core::{Channel, ChannelId, User, UserId};
use chrono::Utc;
use diesel::prelude::*;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// suggested capacity from spec.md §4.4
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

pub struct IdentityResolver {
    pool: Pool,
    channel_cache: Mutex<LruCache<String, Channel>>,
    user_cache: Mutex<LruCache<String, User>>,
}

impl IdentityResolver {
    pub fn new(pool: Pool, cache_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(cache_capacity.max(1)).expect("cache_capacity > 0");
        IdentityResolver {
            pool,
            channel_cache: Mutex::new(LruCache::new(cap)),
            user_cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub async fn resolve_channel(&self, name: &str, twitch_id: Option<&str>) -> Result<Channel> {
        let name = name.to_ascii_lowercase();
        // cache is a pure optimization (spec.md §4.4): only trust a hit
        // when it can't possibly need the twitch_id upgrade.
        if let Some(cached) = self.channel_cache.lock().get(&name).cloned() {
            if cached.twitch_id.is_some() || twitch_id.is_none() {
                return Ok(cached);
            }
        }

        let pool = self.pool.clone();
        let name_owned = name.clone();
        let twitch_id_owned = twitch_id.map(|s| s.to_string());
        let channel = tokio::task::spawn_blocking(move || {
            resolve_channel_sync(&pool, &name_owned, twitch_id_owned.as_deref())
        })
        .await
        .map_err(|source| StoreError::IdentityTaskPanicked {
            what: format!("channel {name}"),
            source,
        })??;
        self.channel_cache.lock().put(name, channel.clone());
        Ok(channel)
    }

    pub async fn resolve_user(
        &self,
        username: &str,
        display_name: Option<&str>,
        twitch_id: Option<&str>,
    ) -> Result<User> {
        let username = username.to_ascii_lowercase();
        if let Some(cached) = self.user_cache.lock().get(&username).cloned() {
            if cached.twitch_id.is_some() || twitch_id.is_none() {
                return Ok(cached);
            }
        }

        let pool = self.pool.clone();
        let username_owned = username.clone();
        let display_name_owned = display_name.unwrap_or(&username).to_string();
        let twitch_id_owned = twitch_id.map(|s| s.to_string());
        let user = tokio::task::spawn_blocking(move || {
            resolve_user_sync(
                &pool,
                &username_owned,
                &display_name_owned,
                twitch_id_owned.as_deref(),
            )
        })
        .await
        .map_err(|source| StoreError::IdentityTaskPanicked {
            what: format!("user {username}"),
            source,
        })??;
        self.user_cache.lock().put(username, user.clone());
        Ok(user)
    }
}

fn resolve_channel_sync(pool: &Pool, name: &str, twitch_id: Option<&str>) -> Result<Channel> {
    let conn = pool.get()?;

    // INSERT OR IGNORE is atomic under SQLite's unique index on `name`:
    // concurrent first-observations race on the same statement, not a
    // read-then-write window, so exactly one row is ever created
    // (spec.md §4.4's "never a read-then-write race").
    diesel::sql_query(
        "INSERT OR IGNORE INTO channels (name, display_name, twitch_id, active) VALUES (?, ?, ?, 1)",
    )
    .bind::<diesel::sql_types::Text, _>(name)
    .bind::<diesel::sql_types::Text, _>(name)
    .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(twitch_id)
    .execute(&conn)?;

    if let Some(tid) = twitch_id {
        // write-once-when-null upgrade rule: only ever takes effect the
        // first time a non-null twitch_id is observed for this row.
        diesel::sql_query("UPDATE channels SET twitch_id = ? WHERE name = ? AND twitch_id IS NULL")
            .bind::<diesel::sql_types::Text, _>(tid)
            .bind::<diesel::sql_types::Text, _>(name)
            .execute(&conn)?;
    }

    // the insert-or-ignore above makes the common case race-free, but a
    // concurrent writer could in principle still beat us to the select
    // (e.g. another process against the same file). Retry once before
    // treating this as store corruption (spec.md §7: "retry the upsert
    // once; if still failing, bubble up").
    let row: crate::models::ChannelRow = match channels::table.filter(channels::name.eq(name)).first(&conn) {
        Ok(row) => row,
        Err(diesel::result::Error::NotFound) => {
            diesel::sql_query(
                "INSERT OR IGNORE INTO channels (name, display_name, twitch_id, active) VALUES (?, ?, ?, 1)",
            )
            .bind::<diesel::sql_types::Text, _>(name)
            .bind::<diesel::sql_types::Text, _>(name)
            .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(twitch_id)
            .execute(&conn)?;
            channels::table
                .filter(channels::name.eq(name))
                .first(&conn)
                .map_err(|source| StoreError::IdentityRace {
                    what: format!("channel {name}"),
                    source,
                })?
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Channel {
        id: ChannelId(row.id),
        name: row.name,
        display_name: row.display_name,
        twitch_id: row.twitch_id,
        active: row.active,
    })
}

fn resolve_user_sync(
    pool: &Pool,
    username: &str,
    display_name: &str,
    twitch_id: Option<&str>,
) -> Result<User> {
    let conn = pool.get()?;
    let now = Utc::now().naive_utc();

    diesel::sql_query(
        "INSERT OR IGNORE INTO users (username, display_name, twitch_id, first_seen, last_seen) VALUES (?, ?, ?, ?, ?)",
    )
    .bind::<diesel::sql_types::Text, _>(username)
    .bind::<diesel::sql_types::Text, _>(display_name)
    .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(twitch_id)
    .bind::<diesel::sql_types::Timestamp, _>(now)
    .bind::<diesel::sql_types::Timestamp, _>(now)
    .execute(&conn)?;

    if let Some(tid) = twitch_id {
        diesel::sql_query("UPDATE users SET twitch_id = ? WHERE username = ? AND twitch_id IS NULL")
            .bind::<diesel::sql_types::Text, _>(tid)
            .bind::<diesel::sql_types::Text, _>(username)
            .execute(&conn)?;
    }

    // best-effort `last_seen` bump (spec.md §3: "no stronger than
    // best-effort") -- failures here are not worth surfacing.
    let _ = diesel::sql_query("UPDATE users SET last_seen = ? WHERE username = ?")
        .bind::<diesel::sql_types::Timestamp, _>(now)
        .bind::<diesel::sql_types::Text, _>(username)
        .execute(&conn);

    let row: crate::models::UserRow = match users::table
        .filter(users::username.eq(username))
        .first(&conn)
    {
        Ok(row) => row,
        Err(diesel::result::Error::NotFound) => {
            diesel::sql_query(
                "INSERT OR IGNORE INTO users (username, display_name, twitch_id, first_seen, last_seen) VALUES (?, ?, ?, ?, ?)",
            )
            .bind::<diesel::sql_types::Text, _>(username)
            .bind::<diesel::sql_types::Text, _>(display_name)
            .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(twitch_id)
            .bind::<diesel::sql_types::Timestamp, _>(now)
            .bind::<diesel::sql_types::Timestamp, _>(now)
            .execute(&conn)?;
            users::table
                .filter(users::username.eq(username))
                .first(&conn)
                .map_err(|source| StoreError::IdentityRace {
                    what: format!("user {username}"),
                    source,
                })?
        }
        Err(e) => return Err(e.into()),
    };

    Ok(User {
        id: UserId(row.id),
        username: row.username,
        display_name: row.display_name,
        twitch_id: row.twitch_id,
        first_seen: chrono::DateTime::<Utc>::from_utc(row.first_seen, Utc),
        last_seen: chrono::DateTime::<Utc>::from_utc(row.last_seen, Utc),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::{establish_pool, run_migrations};
    use pretty_assertions::assert_eq;

    fn test_pool() -> Pool {
        let url = format!(
            "file:identity-test-{}?mode=memory&cache=shared",
            uuid_like()
        );
        run_migrations(&url).expect("migrations");
        establish_pool(&url).expect("pool")
    }

    // avoids pulling in a uuid dependency just for test isolation
    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }

    #[tokio::test]
    async fn resolve_channel_is_idempotent() {
        let pool = test_pool();
        let resolver = IdentityResolver::new(pool, 100);
        let c1 = resolver.resolve_channel("Foo", None).await.unwrap();
        let c2 = resolver.resolve_channel("foo", None).await.unwrap();
        assert_eq!(c1.id, c2.id);
    }

    #[tokio::test]
    async fn twitch_id_is_written_once_and_never_overwritten() {
        let pool = test_pool();
        let resolver = IdentityResolver::new(pool, 100);
        resolver.resolve_channel("foo", None).await.unwrap();
        let c = resolver.resolve_channel("foo", Some("111")).await.unwrap();
        assert_eq!(c.twitch_id.as_deref(), Some("111"));
        let c = resolver.resolve_channel("foo", Some("222")).await.unwrap();
        assert_eq!(c.twitch_id.as_deref(), Some("111"), "must not overwrite");
    }

    #[tokio::test]
    async fn resolve_user_creates_lazily() {
        let pool = test_pool();
        let resolver = IdentityResolver::new(pool, 100);
        let u = resolver.resolve_user("Bob", Some("Bob"), None).await.unwrap();
        assert_eq!(u.username, "bob");
    }
}
