//! Persistence for webhook registrations (spec.md §4.8/§6). Separate
//! from the Archive Buffer's write path: registrations are created and
//! loaded far less often, and on their own schedule (startup load,
//! occasional admin writes), so there's no batching to share.

use crate::conn::Pool;
use crate::error::Result;
use crate::models::WebhookRegistrationRow;
use crate::schema::webhook_registrations::dsl;
use chrono::Utc;
use diesel::prelude::*;

/// Loads every persisted registration, active or not -- the caller
/// (the bin crate, at startup) decides what to do with `enabled`/
/// `muted` rows.
pub fn list_webhook_registrations(pool: &Pool) -> Result<Vec<WebhookRegistrationRow>> {
    let conn = pool.get()?;
    let rows = dsl::webhook_registrations.load::<WebhookRegistrationRow>(&conn)?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct NewWebhookRegistration<'a> {
    pub owner_id: i64,
    pub kind: &'a str,
    pub filter_json: String,
    pub url: &'a str,
    pub url_mask: &'a str,
}

/// Inserts a freshly-validated registration and returns its assigned id.
pub fn insert_webhook_registration(
    pool: &Pool,
    new: NewWebhookRegistration,
) -> Result<i64> {
    let conn = pool.get()?;
    conn.transaction(|| {
        diesel::insert_into(dsl::webhook_registrations)
            .values((
                dsl::owner_id.eq(new.owner_id),
                dsl::kind.eq(new.kind),
                dsl::filter_json.eq(new.filter_json),
                dsl::url.eq(new.url),
                dsl::url_mask.eq(new.url_mask),
                dsl::enabled.eq(true),
                dsl::muted.eq(false),
                dsl::consecutive_failures.eq(0),
                dsl::last_triggered_at.eq(None::<chrono::NaiveDateTime>),
                dsl::trigger_count.eq(0),
            ))
            .execute(&conn)?;
        let id = dsl::webhook_registrations
            .select(dsl::id)
            .order(dsl::id.desc())
            .first::<i64>(&conn)?;
        Ok(id)
    })
}

/// Persists the failure-accounting fields after a delivery attempt, so
/// a restart resumes with the same auto-mute state rather than
/// forgetting every prior failure.
pub fn update_webhook_registration_state(
    pool: &Pool,
    id: i64,
    muted: bool,
    consecutive_failures: u32,
    last_triggered_at: Option<chrono::DateTime<Utc>>,
    trigger_count: u64,
) -> Result<()> {
    let conn = pool.get()?;
    diesel::update(dsl::webhook_registrations.filter(dsl::id.eq(id)))
        .set((
            dsl::muted.eq(muted),
            dsl::consecutive_failures.eq(consecutive_failures as i32),
            dsl::last_triggered_at.eq(last_triggered_at.map(|ts| ts.naive_utc())),
            dsl::trigger_count.eq(trigger_count as i64),
        ))
        .execute(&conn)?;
    Ok(())
}
