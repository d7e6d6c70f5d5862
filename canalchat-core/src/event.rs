use crate::types::*;
use serde::{Deserialize, Serialize};

/// A chat message as it travels over the bus. Carries denormalized
/// channel/user fields (name, display name, twitch id) in addition to
/// the ids, because the Subscription Broker's wire payload
/// (`chat_message.data`, spec §6) needs them and shouldn't have to call
/// back into the store for every fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub message: Message,
    pub channel_name: String,
    pub channel_twitch_id: Option<String>,
    pub username: String,
    pub user_display_name: String,
}

/// The bus payload. Never persisted as-is — it's the transient sum type
/// that flows channel-parser -> archive/bus -> broker/webhook consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ChatMessage(ChatMessageEvent),
    MessageDeleted(MessageDeletedEvent),
    ModAction(ModAction),
    Subscription(SubscriptionEvent),
    GiftSub(GiftSubEvent),
    Raid(RaidEvent),
    Bits(BitsEvent),
    ChannelStatus(ChannelStatusEvent),
    ChannelGameChange(ChannelGameChangeEvent),
    MpsSnapshot(MpsSnapshotEvent),
    ChannelMps(ChannelMpsEvent),
    MessagesFlushed(MessagesFlushedEvent),
    WebhookAutoMuted(WebhookAutoMutedEvent),
}

impl Event {
    /// The channel this event is scoped to, if any (used by the bus and
    /// the broker to route into per-channel rooms). Events with no
    /// natural channel scope (a flush spanning several channels) return
    /// `None` and are only delivered to the `global` room.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Event::ChatMessage(e) => Some(e.message.channel_id),
            Event::MessageDeleted(e) => Some(e.channel_id),
            Event::ModAction(e) => Some(e.channel_id),
            Event::Subscription(e) => Some(e.channel_id),
            Event::GiftSub(e) => Some(e.channel_id),
            Event::Raid(e) => Some(e.channel_id),
            Event::Bits(e) => Some(e.channel_id),
            Event::ChannelStatus(e) => Some(e.channel_id),
            Event::ChannelGameChange(e) => Some(e.channel_id),
            Event::ChannelMps(e) => Some(e.channel_id),
            Event::MpsSnapshot(_) => None,
            Event::MessagesFlushed(_) => None,
            Event::WebhookAutoMuted(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::ChatMessage(_) => "chat_message",
            Event::MessageDeleted(_) => "message_deleted",
            Event::ModAction(_) => "mod_action",
            Event::Subscription(_) => "subscription",
            Event::GiftSub(_) => "gift_sub",
            Event::Raid(_) => "raid",
            Event::Bits(_) => "bits",
            Event::ChannelStatus(_) => "channel_status",
            Event::ChannelGameChange(_) => "channel_game_change",
            Event::MpsSnapshot(_) => "mps_update",
            Event::ChannelMps(_) => "channel_mps",
            Event::MessagesFlushed(_) => "messages_flushed",
            Event::WebhookAutoMuted(_) => "webhook_auto_muted",
        }
    }
}
