//! Frame Parser (C3): turns a [`RawFrame`] into zero or more
//! [`ParsedFrame`]s. Deliberately stops short of identity resolution —
//! it emits raw IRC login names, not `UserId`/`ChannelId` — so it stays
//! decoupled from the Identity Resolver (C4) per spec.md §4.3/§4.4; the
//! binary's composition code is what turns a `ParsedFrame` into an
//! `Event` after resolving names to ids.

use crate::frame::RawFrame;
use canalchat_core::{Badge, EmoteRef, ModActionKind, SubType};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChatMessage {
    pub channel_name: String,
    pub user_login: String,
    pub text: String,
    pub wire_id: String,
    pub ts: DateTime<Utc>,
    pub synthesized_ts: bool,
    pub badges: Vec<Badge>,
    pub emotes: Vec<EmoteRef>,
    pub reply_to_wire_id: Option<String>,
    pub bits_amount: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedModAction {
    pub channel_name: String,
    pub kind: ModActionKind,
    pub target_user_login: Option<String>,
    pub duration_s: Option<i32>,
    pub related_wire_id: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSubscription {
    pub channel_name: String,
    pub user_login: String,
    pub sub_type: SubType,
    pub cumulative_months: i32,
    pub streak_months: Option<i32>,
    pub sub_plan: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGiftSub {
    pub channel_name: String,
    pub gifter_user_login: Option<String>,
    pub recipient_user_login: String,
    pub sub_plan: String,
    pub gift_count: i32,
    pub origin_id: Option<String>,
    /// true for the individual `subgift` notices Twitch sends alongside
    /// a `submysterygift`; these are parsed (so the store still records
    /// every recipient) but must not trigger a second webhook delivery
    pub suppress_webhook: bool,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRaid {
    pub channel_name: String,
    pub raider_user_login: String,
    pub viewer_count: i64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    ChatMessage(ParsedChatMessage),
    Bits { channel_name: String, user_login: String, bits_amount: i64, ts: DateTime<Utc> },
    ModAction(ParsedModAction),
    Subscription(ParsedSubscription),
    GiftSub(ParsedGiftSub),
    Raid(ParsedRaid),
}

/// Returns zero, one, or two frames (PRIVMSG + bits carries both a chat
/// message and a bits event). An unparseable or irrelevant frame yields
/// an empty vec and is counted by the caller, never treated as failure.
pub fn parse_frame(raw: &RawFrame) -> Vec<ParsedFrame> {
    match raw.command.as_str() {
        "PRIVMSG" => parse_privmsg(raw).into_iter().collect(),
        "CLEARMSG" => parse_clearmsg(raw).into_iter().collect(),
        "CLEARCHAT" => parse_clearchat(raw).into_iter().collect(),
        "USERNOTICE" => parse_usernotice(raw),
        _ => Vec::new(),
    }
}

fn frame_ts(raw: &RawFrame) -> (DateTime<Utc>, bool) {
    match raw
        .tag("tmi-sent-ts")
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    {
        Some(ts) => (ts, false),
        None => (Utc::now(), true),
    }
}

fn parse_badges(raw: &RawFrame) -> Vec<Badge> {
    raw.tag("badges")
        .map(|s| {
            s.split(',')
                .filter_map(|pair| {
                    let (type_, version) = pair.split_once('/')?;
                    Some(Badge {
                        type_: type_.to_string(),
                        version: version.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_emotes(raw: &RawFrame) -> Vec<EmoteRef> {
    // `emotes` tag shape: `emote_id:start-end,start2-end2/emote_id2:...`
    raw.tag("emotes")
        .map(|s| {
            s.split('/')
                .filter_map(|group| {
                    let (id, ranges) = group.split_once(':')?;
                    Some((id, ranges))
                })
                .flat_map(|(id, ranges)| {
                    ranges.split(',').filter_map(move |range| {
                        let (start, end) = range.split_once('-')?;
                        Some(EmoteRef {
                            id: id.to_string(),
                            start: start.parse().ok()?,
                            end: end.parse().ok()?,
                        })
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_privmsg(raw: &RawFrame) -> Option<ParsedFrame> {
    let channel_name = raw.channel_name.clone()?;
    let user_login = raw.prefix_nick.clone()?;
    let text = raw.trailing.clone().unwrap_or_default();
    let wire_id = raw.tag("id")?.to_string();
    let (ts, synthesized_ts) = frame_ts(raw);
    let bits_amount = raw.tag("bits").and_then(|s| s.parse::<i64>().ok());

    let msg = ParsedChatMessage {
        channel_name: channel_name.clone(),
        user_login: user_login.clone(),
        text,
        wire_id,
        ts,
        synthesized_ts,
        badges: parse_badges(raw),
        emotes: parse_emotes(raw),
        reply_to_wire_id: raw.tag("reply-parent-msg-id").map(|s| s.to_string()),
        bits_amount,
    };

    Some(ParsedFrame::ChatMessage(msg))
}

fn parse_clearmsg(raw: &RawFrame) -> Option<ParsedFrame> {
    let channel_name = raw.channel_name.clone()?;
    let target_wire_id = raw.tag("target-msg-id")?.to_string();
    let target_user_login = raw.tag("login").map(|s| s.to_string());
    let (ts, _) = frame_ts(raw);

    Some(ParsedFrame::ModAction(ParsedModAction {
        channel_name,
        kind: ModActionKind::Delete,
        target_user_login,
        duration_s: None,
        related_wire_id: Some(target_wire_id),
        ts,
    }))
}

fn parse_clearchat(raw: &RawFrame) -> Option<ParsedFrame> {
    let channel_name = raw.channel_name.clone()?;
    let (ts, _) = frame_ts(raw);
    let target_user_login = raw.trailing.clone().filter(|s| !s.is_empty());

    let kind = match (target_user_login.as_ref(), raw.tag("ban-duration")) {
        (None, _) => ModActionKind::Clear,
        (Some(_), Some(_)) => ModActionKind::Timeout,
        (Some(_), None) => ModActionKind::Ban,
    };
    let duration_s = raw.tag("ban-duration").and_then(|s| s.parse().ok());

    Some(ParsedFrame::ModAction(ParsedModAction {
        channel_name,
        kind,
        target_user_login,
        duration_s,
        related_wire_id: None,
        ts,
    }))
}

fn parse_usernotice(raw: &RawFrame) -> Vec<ParsedFrame> {
    let Some(channel_name) = raw.channel_name.clone() else {
        return Vec::new();
    };
    let Some(msg_id) = raw.tag("msg-id") else {
        return Vec::new();
    };
    let (ts, _) = frame_ts(raw);

    match msg_id {
        "sub" | "resub" => {
            let Some(user_login) = raw.prefix_nick.clone() else {
                return Vec::new();
            };
            let sub_type = if msg_id == "sub" { SubType::Sub } else { SubType::Resub };
            let cumulative_months = raw
                .tag("msg-param-cumulative-months")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            let streak_months = raw
                .tag("msg-param-streak-months")
                .and_then(|s| s.parse().ok());
            let sub_plan = raw.tag("msg-param-sub-plan").unwrap_or("1000").to_string();

            vec![ParsedFrame::Subscription(ParsedSubscription {
                channel_name,
                user_login,
                sub_type,
                cumulative_months,
                streak_months,
                sub_plan,
                ts,
            })]
        }
        "subgift" => {
            let Some(recipient_user_login) = raw.tag("msg-param-recipient-user-name").map(String::from) else {
                return Vec::new();
            };
            let gifter_user_login = raw.prefix_nick.clone();
            let sub_plan = raw.tag("msg-param-sub-plan").unwrap_or("1000").to_string();
            // part of a mystery gift if the origin-id tag is present
            let origin_id = raw.tag("msg-param-origin-id").map(String::from);

            vec![ParsedFrame::GiftSub(ParsedGiftSub {
                channel_name,
                gifter_user_login,
                recipient_user_login,
                sub_plan,
                gift_count: 1,
                origin_id: origin_id.clone(),
                suppress_webhook: origin_id.is_some(),
                ts,
            })]
        }
        "submysterygift" => {
            let Some(gifter_user_login) = raw.prefix_nick.clone() else {
                return Vec::new();
            };
            let gift_count = raw
                .tag("msg-param-mass-gift-count")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            let sub_plan = raw.tag("msg-param-sub-plan").unwrap_or("1000").to_string();
            let origin_id = raw.tag("msg-param-origin-id").map(String::from);

            vec![ParsedFrame::GiftSub(ParsedGiftSub {
                channel_name,
                gifter_user_login: Some(gifter_user_login),
                recipient_user_login: String::new(),
                sub_plan,
                gift_count,
                origin_id,
                suppress_webhook: false,
                ts,
            })]
        }
        "raid" => {
            let Some(raider_user_login) = raw.tag("msg-param-login").map(String::from) else {
                return Vec::new();
            };
            let viewer_count = raw
                .tag("msg-param-viewerCount")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            vec![ParsedFrame::Raid(ParsedRaid {
                channel_name,
                raider_user_login,
                viewer_count,
                ts,
            })]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn frame(command: &str, channel: &str, tags: &[(&str, &str)], trailing: Option<&str>, nick: Option<&str>) -> RawFrame {
        RawFrame {
            channel_name: Some(channel.to_string()),
            server_ts: Utc::now(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(),
            command: command.to_string(),
            params: vec![format!("#{channel}")],
            trailing: trailing.map(|s| s.to_string()),
            prefix_nick: nick.map(|s| s.to_string()),
        }
    }

    #[test]
    fn privmsg_parses_into_chat_message() {
        let raw = frame(
            "PRIVMSG",
            "foo",
            &[("id", "A"), ("tmi-sent-ts", "1700000000000")],
            Some("hi"),
            Some("bob"),
        );
        let parsed = parse_frame(&raw);
        assert_eq!(parsed.len(), 1);
        match &parsed[0] {
            ParsedFrame::ChatMessage(msg) => {
                assert_eq!(msg.wire_id, "A");
                assert_eq!(msg.user_login, "bob");
                assert_eq!(msg.text, "hi");
                assert!(!msg.synthesized_ts);
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }

    #[test]
    fn privmsg_missing_ts_is_synthesized() {
        let raw = frame("PRIVMSG", "foo", &[("id", "A")], Some("hi"), Some("bob"));
        let parsed = parse_frame(&raw);
        match &parsed[0] {
            ParsedFrame::ChatMessage(msg) => assert!(msg.synthesized_ts),
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }

    #[test]
    fn clearmsg_parses_into_delete_mod_action() {
        let raw = frame("CLEARMSG", "foo", &[("target-msg-id", "A"), ("login", "bob")], None, None);
        let parsed = parse_frame(&raw);
        match &parsed[0] {
            ParsedFrame::ModAction(action) => {
                assert_eq!(action.kind, ModActionKind::Delete);
                assert_eq!(action.related_wire_id, Some("A".to_string()));
            }
            other => panic!("expected ModAction, got {other:?}"),
        }
    }

    #[test]
    fn clearchat_with_duration_is_timeout() {
        let raw = frame(
            "CLEARCHAT",
            "foo",
            &[("ban-duration", "600"), ("target-user-id", "42")],
            Some("bob"),
            None,
        );
        let parsed = parse_frame(&raw);
        match &parsed[0] {
            ParsedFrame::ModAction(action) => {
                assert_eq!(action.kind, ModActionKind::Timeout);
                assert_eq!(action.duration_s, Some(600));
                assert_eq!(action.target_user_login.as_deref(), Some("bob"));
            }
            other => panic!("expected ModAction, got {other:?}"),
        }
    }

    #[test]
    fn clearchat_without_target_is_clear() {
        let raw = frame("CLEARCHAT", "foo", &[], None, None);
        let parsed = parse_frame(&raw);
        match &parsed[0] {
            ParsedFrame::ModAction(action) => assert_eq!(action.kind, ModActionKind::Clear),
            other => panic!("expected ModAction, got {other:?}"),
        }
    }

    #[test]
    fn clearchat_without_duration_is_ban() {
        let raw = frame("CLEARCHAT", "foo", &[], Some("bob"), None);
        let parsed = parse_frame(&raw);
        match &parsed[0] {
            ParsedFrame::ModAction(action) => assert_eq!(action.kind, ModActionKind::Ban),
            other => panic!("expected ModAction, got {other:?}"),
        }
    }

    #[test]
    fn subgift_within_mystery_gift_is_suppressed() {
        let raw = frame(
            "USERNOTICE",
            "foo",
            &[
                ("msg-id", "subgift"),
                ("msg-param-recipient-user-name", "alice"),
                ("msg-param-origin-id", "xyz"),
            ],
            None,
            Some("bob"),
        );
        let parsed = parse_frame(&raw);
        match &parsed[0] {
            ParsedFrame::GiftSub(gift) => assert!(gift.suppress_webhook),
            other => panic!("expected GiftSub, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_command_yields_nothing() {
        let raw = frame("ROOMSTATE", "foo", &[], None, None);
        assert!(parse_frame(&raw).is_empty());
    }
}
