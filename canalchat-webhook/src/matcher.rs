//! Filter evaluation: decides whether a bus event should be delivered
//! to a given registration. Pure and side-effect free so it's trivial
//! to test in isolation from the dispatch/delivery machinery.

use crate::registration::WebhookFilter;
use canalchat_core::Event;

pub fn matches(filter: &WebhookFilter, event: &Event) -> bool {
    match (filter, event) {
        (
            WebhookFilter::TrackedUserMessage {
                channel_id,
                tracked_usernames,
            },
            Event::ChatMessage(e),
        ) => {
            tracked_usernames.contains(&e.username.to_lowercase())
                && channel_id.map_or(true, |c| c == e.message.channel_id)
        }
        (
            WebhookFilter::ModAction {
                channel_id,
                action_types,
            },
            Event::ModAction(e),
        ) => {
            channel_id.map_or(true, |c| c == e.channel_id) && action_types.contains(&e.kind)
        }
        (WebhookFilter::ChannelLive { channel_id }, Event::ChannelStatus(e)) => {
            *channel_id == e.channel_id
                && e.transition == canalchat_core::ChannelTransition::Live
        }
        (WebhookFilter::ChannelOffline { channel_id }, Event::ChannelStatus(e)) => {
            *channel_id == e.channel_id
                && e.transition == canalchat_core::ChannelTransition::Offline
        }
        (WebhookFilter::ChannelGameChange { channel_id }, Event::ChannelGameChange(e)) => {
            *channel_id == e.channel_id
        }
        (WebhookFilter::ChannelBits { channel_id, min_bits }, Event::Bits(e)) => {
            *channel_id == e.channel_id && min_bits.map_or(true, |min| e.bits_amount >= min)
        }
        (
            WebhookFilter::ChannelSubscription {
                channel_id,
                sub_types,
                min_months,
            },
            Event::Subscription(e),
        ) => {
            *channel_id == e.channel_id
                && (sub_types.is_empty() || sub_types.contains(&e.sub_type))
                && min_months.map_or(true, |min| e.cumulative_months >= min)
        }
        (
            WebhookFilter::ChannelGiftSub {
                channel_id,
                min_gift_count,
            },
            Event::GiftSub(e),
        ) => {
            *channel_id == e.channel_id
                && !e.suppress_webhook
                && min_gift_count.map_or(true, |min| e.gift_count >= min)
        }
        (WebhookFilter::ChannelRaid { channel_id, min_viewers }, Event::Raid(e)) => {
            *channel_id == e.channel_id
                && min_viewers.map_or(true, |min| e.viewer_count >= min)
        }
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use canalchat_core::{
        BitsEvent, ChannelId, ChatMessageEvent, GiftSubEvent, Message, ModAction, ModActionKind,
        RaidEvent, SubType, SubscriptionEvent, UserId,
    };
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn chat_message(channel_id: ChannelId, username: &str) -> Event {
        Event::ChatMessage(ChatMessageEvent {
            message: Message {
                id: 1,
                channel_id,
                user_id: UserId(1),
                text: "hello".to_string(),
                ts: Utc::now(),
                wire_id: "wire-1".to_string(),
                badges: vec![],
                emotes: vec![],
                reply_to_wire_id: None,
                is_deleted: false,
                deleted_at: None,
                deleted_by: None,
                synthesized_ts: false,
            },
            channel_name: "somechannel".to_string(),
            channel_twitch_id: None,
            username: username.to_string(),
            user_display_name: username.to_string(),
        })
    }

    #[test]
    fn gift_sub_filter_excludes_suppressed_mystery_gift_children() {
        let filter = WebhookFilter::ChannelGiftSub {
            channel_id: ChannelId(1),
            min_gift_count: None,
        };
        let suppressed = Event::GiftSub(GiftSubEvent {
            channel_id: ChannelId(1),
            gifter_user_id: Some(UserId(1)),
            recipient_user_id: Some(UserId(2)),
            sub_plan: "1000".to_string(),
            gift_count: 1,
            origin_id: Some("mystery-1".to_string()),
            suppress_webhook: true,
            ts: Utc::now(),
        });
        let standalone = Event::GiftSub(GiftSubEvent {
            suppress_webhook: false,
            ..match suppressed.clone() {
                Event::GiftSub(e) => e,
                _ => unreachable!(),
            }
        });
        assert!(!matches(&filter, &suppressed));
        assert!(matches(&filter, &standalone));
    }

    #[test]
    fn bits_filter_respects_minimum() {
        let filter = WebhookFilter::ChannelBits {
            channel_id: ChannelId(1),
            min_bits: Some(100),
        };
        let small = Event::Bits(BitsEvent {
            channel_id: ChannelId(1),
            user_id: UserId(1),
            bits_amount: 50,
            ts: Utc::now(),
        });
        let big = Event::Bits(BitsEvent {
            channel_id: ChannelId(1),
            user_id: UserId(1),
            bits_amount: 150,
            ts: Utc::now(),
        });
        assert!(!matches(&filter, &small));
        assert!(matches(&filter, &big));
    }

    #[test]
    fn raid_filter_ignores_other_channels() {
        let filter = WebhookFilter::ChannelRaid {
            channel_id: ChannelId(1),
            min_viewers: None,
        };
        let elsewhere = Event::Raid(RaidEvent {
            channel_id: ChannelId(2),
            raider_user_id: UserId(1),
            viewer_count: 10,
            ts: Utc::now(),
        });
        assert!(!matches(&filter, &elsewhere));
    }

    #[test]
    fn unrelated_event_kind_never_matches() {
        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let bits = Event::Bits(BitsEvent {
            channel_id: ChannelId(1),
            user_id: UserId(1),
            bits_amount: 10,
            ts: Utc::now(),
        });
        assert!(!matches(&filter, &bits));
    }

    #[test]
    fn tracked_user_message_matches_any_username_in_the_set() {
        let filter = WebhookFilter::TrackedUserMessage {
            channel_id: None,
            tracked_usernames: ["alice", "bob"].iter().map(|s| s.to_string()).collect(),
        };
        assert!(matches(&filter, &chat_message(ChannelId(1), "alice")));
        assert!(matches(&filter, &chat_message(ChannelId(2), "bob")));
        assert!(!matches(&filter, &chat_message(ChannelId(1), "carol")));
    }

    #[test]
    fn tracked_user_message_username_match_is_case_insensitive() {
        let filter = WebhookFilter::TrackedUserMessage {
            channel_id: None,
            tracked_usernames: ["alice"].iter().map(|s| s.to_string()).collect(),
        };
        assert!(matches(&filter, &chat_message(ChannelId(1), "Alice")));
    }

    #[test]
    fn mod_action_matches_any_kind_in_the_set() {
        let filter = WebhookFilter::ModAction {
            channel_id: Some(ChannelId(1)),
            action_types: [ModActionKind::Ban, ModActionKind::Timeout].into_iter().collect(),
        };
        let ban = Event::ModAction(ModAction {
            id: 1,
            channel_id: ChannelId(1),
            moderator_id: None,
            target_user_id: UserId(1),
            kind: ModActionKind::Ban,
            duration_s: None,
            reason: None,
            ts: Utc::now(),
            related_wire_id: None,
        });
        let delete = Event::ModAction(ModAction {
            kind: ModActionKind::Delete,
            ..match ban.clone() {
                Event::ModAction(e) => e,
                _ => unreachable!(),
            }
        });
        assert!(matches(&filter, &ban));
        assert!(!matches(&filter, &delete));
    }

    #[test]
    fn subscription_filter_respects_sub_type_and_min_months() {
        let filter = WebhookFilter::ChannelSubscription {
            channel_id: ChannelId(1),
            sub_types: [SubType::Resub].into_iter().collect(),
            min_months: Some(12),
        };
        let long_resub = Event::Subscription(SubscriptionEvent {
            channel_id: ChannelId(1),
            user_id: UserId(1),
            sub_type: SubType::Resub,
            cumulative_months: 12,
            streak_months: None,
            sub_plan: "1000".to_string(),
            ts: Utc::now(),
        });
        let short_resub = Event::Subscription(SubscriptionEvent {
            cumulative_months: 3,
            ..match long_resub.clone() {
                Event::Subscription(e) => e,
                _ => unreachable!(),
            }
        });
        let new_sub = Event::Subscription(SubscriptionEvent {
            sub_type: SubType::Sub,
            cumulative_months: 12,
            ..match long_resub.clone() {
                Event::Subscription(e) => e,
                _ => unreachable!(),
            }
        });
        assert!(matches(&filter, &long_resub));
        assert!(!matches(&filter, &short_resub), "below min_months");
        assert!(!matches(&filter, &new_sub), "wrong sub_type");
    }

    #[test]
    fn subscription_filter_with_empty_sub_types_matches_any_type() {
        let filter = WebhookFilter::ChannelSubscription {
            channel_id: ChannelId(1),
            sub_types: std::collections::HashSet::new(),
            min_months: None,
        };
        let sub = Event::Subscription(SubscriptionEvent {
            channel_id: ChannelId(1),
            user_id: UserId(1),
            sub_type: SubType::Sub,
            cumulative_months: 1,
            streak_months: None,
            sub_plan: "1000".to_string(),
            ts: Utc::now(),
        });
        assert!(matches(&filter, &sub));
    }

    #[test]
    fn gift_sub_filter_respects_minimum_gift_count() {
        let filter = WebhookFilter::ChannelGiftSub {
            channel_id: ChannelId(1),
            min_gift_count: Some(5),
        };
        let small = Event::GiftSub(GiftSubEvent {
            channel_id: ChannelId(1),
            gifter_user_id: Some(UserId(1)),
            recipient_user_id: None,
            sub_plan: "1000".to_string(),
            gift_count: 1,
            origin_id: None,
            suppress_webhook: false,
            ts: Utc::now(),
        });
        let big = Event::GiftSub(GiftSubEvent {
            gift_count: 5,
            ..match small.clone() {
                Event::GiftSub(e) => e,
                _ => unreachable!(),
            }
        });
        assert!(!matches(&filter, &small));
        assert!(matches(&filter, &big));
    }
}
