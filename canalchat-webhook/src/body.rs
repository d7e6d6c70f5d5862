//! Outbound delivery body: Discord-webhook-shaped JSON (spec.md §6's
//! "Discord-webhook-shaped body" -- a top-level `content` string plus
//! an `embeds` array), built from whichever event matched.

use canalchat_core::Event;
use serde_json::{json, Value};

pub fn build_body(event: &Event) -> Value {
    let (content, fields) = match event {
        Event::ChatMessage(e) => (
            format!("{}: {}", e.username, e.message.text),
            json!({ "channel": e.channel_name, "username": e.username }),
        ),
        Event::ModAction(e) => (
            format!("mod action {} in channel {}", e.kind.as_str(), e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::ChannelStatus(e) => (
            format!("channel {} status changed", e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::ChannelGameChange(e) => (
            format!("channel {} changed game", e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::Bits(e) => (
            format!("{} bits cheered in channel {}", e.bits_amount, e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::Subscription(e) => (
            format!("new subscription in channel {}", e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::GiftSub(e) => (
            format!("gift sub in channel {}", e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::Raid(e) => (
            format!("raid of {} viewers in channel {}", e.viewer_count, e.channel_id),
            serde_json::to_value(e).unwrap_or(Value::Null),
        ),
        Event::MessageDeleted(_)
        | Event::MpsSnapshot(_)
        | Event::ChannelMps(_)
        | Event::MessagesFlushed(_)
        | Event::WebhookAutoMuted(_) => (String::new(), Value::Null),
    };

    json!({
        "content": content,
        "embeds": [{ "fields": fields }],
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use canalchat_core::{BitsEvent, ChannelId, UserId};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[test]
    fn bits_body_mentions_amount() {
        let event = Event::Bits(BitsEvent {
            channel_id: ChannelId(1),
            user_id: UserId(1),
            bits_amount: 500,
            ts: Utc::now(),
        });
        let body = build_body(&event);
        assert!(body["content"].as_str().unwrap().contains("500"));
    }
}
