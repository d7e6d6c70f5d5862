//! Wire protocol: the envelope shape and the client/server event payloads
//! named in spec.md §6. Field names here are canonical and must not
//! drift — existing clients depend on them.

use canalchat_core::Event;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub event: &'static str,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(event: &'static str, data: Value, timestamp: DateTime<Utc>) -> Self {
        Envelope {
            event,
            data,
            timestamp,
        }
    }

    /// Overrides the event name while keeping data/timestamp, used for
    /// the `mod_action` / `global_mod_action` dual naming (spec.md §6).
    pub fn with_event(mut self, event: &'static str) -> Self {
        self.event = event;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("envelope failed to serialize: {e}");
            String::from(r#"{"event":"error","data":{},"timestamp":null}"#)
        })
    }
}

pub fn ack(event: &'static str, data: Value) -> Envelope {
    Envelope::new(event, data, Utc::now())
}

/// Converts a bus event into its broker wire envelope. Returns `None` for
/// events that have no place in the client-facing protocol (monetization
/// and game-change events are webhook-only, per spec.md §4.7/§4.8).
pub fn event_to_envelope(event: &Event) -> Option<Envelope> {
    match event {
        Event::ChatMessage(e) => Some(Envelope::new(
            "chat_message",
            json!({
                "channelId": e.message.channel_id.0,
                "userId": e.message.user_id.0,
                "message_text": e.message.text,
                "timestamp": e.message.ts,
                "messageId": e.message.wire_id,
                "badges": e.message.badges,
                "emotes": e.message.emotes,
                "username": e.username,
                "user_display_name": e.user_display_name,
                "channel_name": e.channel_name,
                "channel_twitch_id": e.channel_twitch_id,
            }),
            e.message.ts,
        )),
        Event::MessageDeleted(e) => Some(Envelope::new(
            "message_deleted",
            serde_json::to_value(e).unwrap_or(Value::Null),
            e.ts,
        )),
        Event::ModAction(e) => Some(Envelope::new(
            "mod_action",
            serde_json::to_value(e).unwrap_or(Value::Null),
            e.ts,
        )),
        Event::ChannelStatus(e) => Some(Envelope::new(
            "channel_status",
            serde_json::to_value(e).unwrap_or(Value::Null),
            e.ts,
        )),
        Event::MessagesFlushed(e) => Some(Envelope::new(
            "messages_flushed",
            json!({
                "usernames": e.usernames,
                "channels": e.channels,
                "count": e.count,
                "timestamp": e.ts,
            }),
            e.ts,
        )),
        Event::MpsSnapshot(e) => Some(Envelope::new(
            "mps_update",
            json!({
                "mps": e.mps,
                "channelMps": e.per_channel,
                "timestamp": e.ts,
            }),
            e.ts,
        )),
        Event::ChannelMps(e) => Some(Envelope::new(
            "channel_mps",
            serde_json::to_value(e).unwrap_or(Value::Null),
            e.ts,
        )),
        Event::Subscription(_)
        | Event::GiftSub(_)
        | Event::Raid(_)
        | Event::Bits(_)
        | Event::ChannelGameChange(_)
        | Event::WebhookAutoMuted(_) => None,
    }
}

/// A parsed client->server command. Unknown `event` names are parse
/// errors: counted and dropped, per spec.md §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    SubscribeGlobal,
    UnsubscribeGlobal,
    Ping,
}

#[derive(Debug)]
pub struct UnknownEvent(pub String);

pub fn parse_client_command(raw: &str) -> Result<ClientCommand, UnknownEvent> {
    let parsed: Value = serde_json::from_str(raw).map_err(|_| UnknownEvent(raw.to_string()))?;
    let event = parsed
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| UnknownEvent(raw.to_string()))?;
    let data = parsed.get("data").cloned().unwrap_or(Value::Null);

    match event {
        "subscribe" => Ok(ClientCommand::Subscribe(channels_from(&data))),
        "unsubscribe" => Ok(ClientCommand::Unsubscribe(channels_from(&data))),
        "subscribe_global" => Ok(ClientCommand::SubscribeGlobal),
        "unsubscribe_global" => Ok(ClientCommand::UnsubscribeGlobal),
        "ping" => Ok(ClientCommand::Ping),
        other => Err(UnknownEvent(other.to_string())),
    }
}

/// `channels` accepts either a bare string or an array of strings
/// (spec.md §6: `subscribe{channels: string | string[]}`).
fn channels_from(data: &Value) -> Vec<String> {
    match data.get("channels") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subscribe_accepts_single_string() {
        let cmd = parse_client_command(r#"{"event":"subscribe","data":{"channels":"foo"}}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Subscribe(vec!["foo".to_string()]));
    }

    #[test]
    fn subscribe_accepts_array() {
        let cmd =
            parse_client_command(r#"{"event":"subscribe","data":{"channels":["foo","bar"]}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Subscribe(vec!["foo".to_string(), "bar".to_string()])
        );
    }

    #[test]
    fn subscribe_global_has_no_payload() {
        let cmd = parse_client_command(r#"{"event":"subscribe_global"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::SubscribeGlobal);
    }

    #[test]
    fn unknown_event_is_an_error() {
        assert!(parse_client_command(r#"{"event":"nonsense"}"#).is_err());
        assert!(parse_client_command("not json").is_err());
    }
}
