use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable numeric id handed out by the Identity Resolver / store. A
/// plain newtype rather than a bare `i64` so `ChannelId` and `UserId`
/// can't be swapped by accident at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Sentinel target for a channel-wide `clear` mod action, which has no
/// real target user to resolve (see DESIGN.md's Open Question decision
/// for `ModAction.target_user_id`).
pub const NO_TARGET_USER: UserId = UserId(0);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// always lower-case ASCII; this is the join/FK key
    pub name: String,
    pub display_name: String,
    pub twitch_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub twitch_id: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    #[serde(rename = "type")]
    pub type_: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoteRef {
    pub id: String,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub text: String,
    /// the IRC-provided `tmi-sent-ts`, not arrival time
    pub ts: DateTime<Utc>,
    /// opaque UUID from IRC's `id` tag, unique per message
    pub wire_id: String,
    pub badges: Vec<Badge>,
    pub emotes: Vec<EmoteRef>,
    pub reply_to_wire_id: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
    /// true when `ts` had to be synthesized because `tmi-sent-ts` was
    /// missing from the frame (see canalchat-irc's frame parser)
    pub synthesized_ts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModActionKind {
    Ban,
    Timeout,
    Delete,
    Clear,
    Unban,
    Untimeout,
}

impl ModActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModActionKind::Ban => "ban",
            ModActionKind::Timeout => "timeout",
            ModActionKind::Delete => "delete",
            ModActionKind::Clear => "clear",
            ModActionKind::Unban => "unban",
            ModActionKind::Untimeout => "untimeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModAction {
    pub id: i64,
    pub channel_id: ChannelId,
    pub moderator_id: Option<UserId>,
    pub target_user_id: UserId,
    pub kind: ModActionKind,
    pub duration_s: Option<i32>,
    pub reason: Option<String>,
    pub ts: DateTime<Utc>,
    pub related_wire_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubType {
    Sub,
    Resub,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub sub_type: SubType,
    pub cumulative_months: u32,
    pub streak_months: Option<u32>,
    pub sub_plan: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftSubEvent {
    pub channel_id: ChannelId,
    pub gifter_user_id: Option<UserId>,
    pub recipient_user_id: Option<UserId>,
    pub sub_plan: String,
    pub gift_count: u32,
    /// dedup key for mystery gifts so the N individual `subgift`
    /// USERNOTICEs that ride along with a mass gift don't each
    /// re-trigger a `channel_gift_sub` webhook match
    pub origin_id: Option<String>,
    /// true for an individual `subgift` notice that rode along with a
    /// `submysterygift` (i.e. `origin_id.is_some()`); still archived and
    /// still broadcast on the bus, but excluded from `channel_gift_sub`
    /// webhook matching so a mass gift doesn't fire the webhook once per
    /// recipient (spec.md §4.3's USERNOTICE mapping note)
    pub suppress_webhook: bool,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidEvent {
    pub channel_id: ChannelId,
    pub raider_user_id: UserId,
    pub viewer_count: u32,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitsEvent {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub bits_amount: u32,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelTransition {
    Live,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatusEvent {
    pub channel_id: ChannelId,
    pub transition: ChannelTransition,
    pub game_name: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGameChangeEvent {
    pub channel_id: ChannelId,
    pub old_game_name: Option<String>,
    pub new_game_name: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesFlushedEvent {
    pub channel_ids: Vec<ChannelId>,
    pub user_ids: Vec<UserId>,
    /// lowercased, deduplicated
    pub channels: Vec<String>,
    /// lowercased, deduplicated
    pub usernames: Vec<String>,
    pub count: usize,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpsSnapshotEvent {
    pub mps: f64,
    pub per_channel: std::collections::BTreeMap<String, f64>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMpsEvent {
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub mps: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeletedEvent {
    pub channel_id: ChannelId,
    pub message_id: String,
    pub deleted_by: Option<UserId>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAutoMutedEvent {
    pub registration_id: i64,
    pub consecutive_failures: u32,
    pub ts: DateTime<Utc>,
}
