//! Glue between the Frame Parser (C3) and the Identity Resolver (C4):
//! turns a [`ParsedFrame`] into a resolved [`Event`] and hands it to both
//! the Archive Buffer (durable path) and the Event Bus (volatile path),
//! per spec.md's data-flow diagram (§2: "C2 -> C3 -> C4 -> C5 (durable)
//! || C6 (volatile)"). Lives in the bin crate, not `canalchat-irc`,
//! because the Frame Parser is deliberately identity-unaware (see
//! `canalchat-irc::parser`'s module doc).

use canalchat_core::{
    BitsEvent, ChatMessageEvent, Event, GiftSubEvent, Message, ModAction, RaidEvent,
    SubscriptionEvent, UserId, NO_TARGET_USER,
};
use canalchat_irc::{
    ParsedChatMessage, ParsedFrame, ParsedGiftSub, ParsedModAction, ParsedRaid, ParsedSubscription,
};
use canalchat_store::{ArchiveBuffer, IdentityResolver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Count of frames the Frame Parser couldn't turn into anything (an
/// unrecognized command, or a recognized one missing a required tag).
/// Spec.md §4.3: "An unparseable frame is counted and dropped; it never
/// fails the pipeline."
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub unparsed_frames: AtomicU64,
}

pub async fn run(
    mut raw_frames: mpsc::Receiver<canalchat_irc::RawFrame>,
    resolver: Arc<IdentityResolver>,
    archive: Arc<ArchiveBuffer>,
    bus: canalchat_bus::Bus,
    stats: Arc<PipelineStats>,
) {
    while let Some(raw) = raw_frames.recv().await {
        let parsed = canalchat_irc::parse_frame(&raw);
        if parsed.is_empty() {
            stats.unparsed_frames.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        for frame in parsed {
            match resolve(frame, &resolver).await {
                Ok(Some(event)) => {
                    archive.append(event.clone()).await;
                    bus.publish_event(event);
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("identity resolution failed, dropping frame: {e:#}");
                }
            }
        }
    }
    log::warn!("raw frame channel closed, pipeline stopping");
}

async fn resolve(
    frame: ParsedFrame,
    resolver: &IdentityResolver,
) -> anyhow::Result<Option<Event>> {
    match frame {
        ParsedFrame::ChatMessage(msg) => Ok(Some(resolve_chat_message(msg, resolver).await?)),
        ParsedFrame::Bits {
            channel_name,
            user_login,
            bits_amount,
            ts,
        } => {
            let channel = resolver.resolve_channel(&channel_name, None).await?;
            let user = resolver.resolve_user(&user_login, None, None).await?;
            Ok(Some(Event::Bits(BitsEvent {
                channel_id: channel.id,
                user_id: user.id,
                bits_amount: bits_amount.max(0) as u32,
                ts,
            })))
        }
        ParsedFrame::ModAction(action) => Ok(Some(resolve_mod_action(action, resolver).await?)),
        ParsedFrame::Subscription(sub) => Ok(Some(resolve_subscription(sub, resolver).await?)),
        ParsedFrame::GiftSub(gift) => Ok(Some(resolve_gift_sub(gift, resolver).await?)),
        ParsedFrame::Raid(raid) => Ok(Some(resolve_raid(raid, resolver).await?)),
    }
}

async fn resolve_chat_message(
    msg: ParsedChatMessage,
    resolver: &IdentityResolver,
) -> anyhow::Result<Event> {
    let channel = resolver.resolve_channel(&msg.channel_name, None).await?;
    let user = resolver
        .resolve_user(&msg.user_login, Some(&msg.user_login), None)
        .await?;

    Ok(Event::ChatMessage(ChatMessageEvent {
        message: Message {
            id: 0,
            channel_id: channel.id,
            user_id: user.id,
            text: msg.text,
            ts: msg.ts,
            wire_id: msg.wire_id,
            badges: msg.badges,
            emotes: msg.emotes,
            reply_to_wire_id: msg.reply_to_wire_id,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            synthesized_ts: msg.synthesized_ts,
        },
        channel_name: channel.name,
        channel_twitch_id: channel.twitch_id,
        username: user.username,
        user_display_name: user.display_name,
    }))
}

async fn resolve_mod_action(
    action: ParsedModAction,
    resolver: &IdentityResolver,
) -> anyhow::Result<Event> {
    let channel = resolver.resolve_channel(&action.channel_name, None).await?;
    let target_user_id = resolve_target_user(action.target_user_login.as_deref(), resolver).await?;

    Ok(Event::ModAction(ModAction {
        id: 0,
        channel_id: channel.id,
        // IRC rarely names the acting moderator on CLEARCHAT/CLEARMSG
        // (spec.md §3: "moderator_id may be null").
        moderator_id: None,
        target_user_id,
        kind: action.kind,
        duration_s: action.duration_s,
        reason: None,
        ts: action.ts,
        related_wire_id: action.related_wire_id,
    }))
}

/// A channel-wide `clear` carries no target login; every other kind
/// always names one. Resolves to the reserved sentinel rather than
/// making `ModAction.target_user_id` optional (DESIGN.md's Open
/// Question decision).
async fn resolve_target_user(
    login: Option<&str>,
    resolver: &IdentityResolver,
) -> anyhow::Result<UserId> {
    match login {
        Some(login) => Ok(resolver.resolve_user(login, None, None).await?.id),
        None => Ok(NO_TARGET_USER),
    }
}

async fn resolve_subscription(
    sub: ParsedSubscription,
    resolver: &IdentityResolver,
) -> anyhow::Result<Event> {
    let channel = resolver.resolve_channel(&sub.channel_name, None).await?;
    let user = resolver
        .resolve_user(&sub.user_login, Some(&sub.user_login), None)
        .await?;
    Ok(Event::Subscription(SubscriptionEvent {
        channel_id: channel.id,
        user_id: user.id,
        sub_type: sub.sub_type,
        cumulative_months: sub.cumulative_months.max(0) as u32,
        streak_months: sub.streak_months.map(|m| m.max(0) as u32),
        sub_plan: sub.sub_plan,
        ts: sub.ts,
    }))
}

async fn resolve_gift_sub(
    gift: ParsedGiftSub,
    resolver: &IdentityResolver,
) -> anyhow::Result<Event> {
    let channel = resolver.resolve_channel(&gift.channel_name, None).await?;
    let gifter_user_id = match &gift.gifter_user_login {
        Some(login) => Some(resolver.resolve_user(login, Some(login), None).await?.id),
        None => None,
    };
    let recipient_user_id = if gift.recipient_user_login.is_empty() {
        // the `submysterygift` notice itself names no single recipient;
        // the individual `subgift` notices that ride along with it do
        None
    } else {
        Some(
            resolver
                .resolve_user(&gift.recipient_user_login, Some(&gift.recipient_user_login), None)
                .await?
                .id,
        )
    };
    Ok(Event::GiftSub(GiftSubEvent {
        channel_id: channel.id,
        gifter_user_id,
        recipient_user_id,
        sub_plan: gift.sub_plan,
        gift_count: gift.gift_count.max(0) as u32,
        origin_id: gift.origin_id,
        suppress_webhook: gift.suppress_webhook,
        ts: gift.ts,
    }))
}

async fn resolve_raid(raid: ParsedRaid, resolver: &IdentityResolver) -> anyhow::Result<Event> {
    let channel = resolver.resolve_channel(&raid.channel_name, None).await?;
    let raider = resolver
        .resolve_user(&raid.raider_user_login, Some(&raid.raider_user_login), None)
        .await?;
    Ok(Event::Raid(RaidEvent {
        channel_id: channel.id,
        raider_user_id: raider.id,
        viewer_count: raid.viewer_count.max(0) as u32,
        ts: raid.ts,
    }))
}

