use crate::schema::*;
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[table_name = "channels"]
pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub twitch_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "channels"]
pub struct NewChannel<'a> {
    pub name: &'a str,
    pub display_name: &'a str,
    pub twitch_id: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[table_name = "users"]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub twitch_id: Option<String>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "users"]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub display_name: &'a str,
    pub twitch_id: Option<&'a str>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "messages"]
pub struct NewMessage {
    pub channel_id: i64,
    pub user_id: i64,
    pub text: String,
    pub ts: NaiveDateTime,
    pub wire_id: String,
    pub badges_json: String,
    pub emotes_json: String,
    pub reply_to_wire_id: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<i64>,
    pub synthesized_ts: bool,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "mod_actions"]
pub struct NewModAction {
    pub channel_id: i64,
    pub moderator_id: Option<i64>,
    pub target_user_id: i64,
    pub kind: String,
    pub duration_s: Option<i32>,
    pub reason: Option<String>,
    pub ts: NaiveDateTime,
    pub related_wire_id: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "monetization_events"]
pub struct NewMonetizationEvent {
    pub channel_id: i64,
    pub kind: String,
    pub user_id: Option<i64>,
    pub payload_json: String,
    pub ts: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[table_name = "webhook_registrations"]
pub struct WebhookRegistrationRow {
    pub id: i64,
    pub owner_id: i64,
    pub kind: String,
    pub filter_json: String,
    pub url: String,
    pub url_mask: String,
    pub enabled: bool,
    pub muted: bool,
    pub consecutive_failures: i32,
    pub last_triggered_at: Option<NaiveDateTime>,
    pub trigger_count: i64,
}
