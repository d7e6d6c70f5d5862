//! Webhook registrations: the filter a destination is interested in,
//! its delivery URL, and its failure-accounting state. See spec.md
//! §4.8 / §6.

use crate::error::{Result, WebhookError};
use canalchat_core::{ChannelId, ModActionKind, SubType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookFilter {
    TrackedUserMessage {
        channel_id: Option<ChannelId>,
        /// lowercase usernames; match iff the message's (lowercased)
        /// username is a member (spec.md §4.8)
        tracked_usernames: HashSet<String>,
    },
    ModAction {
        channel_id: Option<ChannelId>,
        /// `kind` must be a member (spec.md §4.8)
        action_types: HashSet<ModActionKind>,
    },
    ChannelLive {
        channel_id: ChannelId,
    },
    ChannelOffline {
        channel_id: ChannelId,
    },
    ChannelGameChange {
        channel_id: ChannelId,
    },
    ChannelBits {
        channel_id: ChannelId,
        min_bits: Option<u32>,
    },
    ChannelSubscription {
        channel_id: ChannelId,
        /// `sub_type` must be a member; empty means "any" (spec.md §4.8)
        sub_types: HashSet<SubType>,
        min_months: Option<u32>,
    },
    ChannelGiftSub {
        channel_id: ChannelId,
        min_gift_count: Option<u32>,
    },
    ChannelRaid {
        channel_id: ChannelId,
        min_viewers: Option<u32>,
    },
}

impl WebhookFilter {
    pub fn kind_str(&self) -> &'static str {
        match self {
            WebhookFilter::TrackedUserMessage { .. } => "tracked_user_message",
            WebhookFilter::ModAction { .. } => "mod_action",
            WebhookFilter::ChannelLive { .. } => "channel_live",
            WebhookFilter::ChannelOffline { .. } => "channel_offline",
            WebhookFilter::ChannelGameChange { .. } => "channel_game_change",
            WebhookFilter::ChannelBits { .. } => "channel_bits",
            WebhookFilter::ChannelSubscription { .. } => "channel_subscription",
            WebhookFilter::ChannelGiftSub { .. } => "channel_gift_sub",
            WebhookFilter::ChannelRaid { .. } => "channel_raid",
        }
    }
}

/// after this many consecutive delivery failures a registration is
/// muted and its backlog dropped (spec.md §4.8/§7)
pub const AUTO_MUTE_THRESHOLD: u32 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookRegistration {
    pub id: i64,
    pub owner_id: i64,
    pub filter: WebhookFilter,
    /// never serialized: "the raw delivery URL is never returned on
    /// read paths" (spec.md §3's WebhookRegistration invariant)
    #[serde(skip_serializing)]
    url: String,
    pub url_mask: String,
    pub enabled: bool,
    pub muted: bool,
    pub consecutive_failures: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

impl WebhookRegistration {
    /// Validates the delivery URL is HTTPS (spec.md §6) and computes its
    /// stable opaque mask once, at registration time -- it is never
    /// recomputed later.
    pub fn new(id: i64, owner_id: i64, filter: WebhookFilter, url: String) -> Result<Self> {
        if !url.starts_with("https://") {
            return Err(WebhookError::NotHttps(url));
        }
        if url.len() <= "https://".len() {
            return Err(WebhookError::InvalidUrl(url));
        }

        let url_mask = mask_url(&url);

        Ok(WebhookRegistration {
            id,
            owner_id,
            filter,
            url,
            url_mask,
            enabled: true,
            muted: false,
            consecutive_failures: 0,
            last_triggered_at: None,
            trigger_count: 0,
        })
    }

    /// Rebuilds a registration from rows already validated and persisted
    /// at an earlier `new()` call, restoring its failure-accounting
    /// state instead of resetting it. Used at startup to reload
    /// registrations from the store without re-running URL validation.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: i64,
        owner_id: i64,
        filter: WebhookFilter,
        url: String,
        url_mask: String,
        enabled: bool,
        muted: bool,
        consecutive_failures: u32,
        last_triggered_at: Option<DateTime<Utc>>,
        trigger_count: u64,
    ) -> Self {
        WebhookRegistration {
            id,
            owner_id,
            filter,
            url,
            url_mask,
            enabled,
            muted,
            consecutive_failures,
            last_triggered_at,
            trigger_count,
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub fn record_success(&mut self, ts: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.trigger_count += 1;
        self.last_triggered_at = Some(ts);
    }

    /// Returns `true` if this failure just tripped the auto-mute
    /// threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= AUTO_MUTE_THRESHOLD && !self.muted {
            self.muted = true;
            return true;
        }
        false
    }
}

fn mask_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    base64::encode_config(&digest[..12], base64::URL_SAFE_NO_PAD)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_non_https_urls() {
        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let err = WebhookRegistration::new(1, 1, filter, "http://example.com/hook".to_string())
            .unwrap_err();
        assert!(matches!(err, WebhookError::NotHttps(_)));
    }

    #[test]
    fn same_url_gets_same_stable_mask() {
        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let a = WebhookRegistration::new(1, 1, filter.clone(), "https://example.com/a".to_string())
            .unwrap();
        let b = WebhookRegistration::new(2, 1, filter, "https://example.com/a".to_string()).unwrap();
        assert_eq!(a.url_mask, b.url_mask);
    }

    #[test]
    fn mask_is_not_the_raw_url() {
        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let reg =
            WebhookRegistration::new(1, 1, filter, "https://example.com/a".to_string()).unwrap();
        assert_ne!(reg.url_mask, "https://example.com/a");
    }

    #[test]
    fn record_failure_trips_auto_mute_at_threshold() {
        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let mut reg =
            WebhookRegistration::new(1, 1, filter, "https://example.com/a".to_string()).unwrap();
        for _ in 0..(AUTO_MUTE_THRESHOLD - 1) {
            assert!(!reg.record_failure());
        }
        assert!(reg.record_failure(), "threshold-th failure trips the mute");
        assert!(reg.muted);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let mut reg =
            WebhookRegistration::new(1, 1, filter, "https://example.com/a".to_string()).unwrap();
        reg.record_failure();
        reg.record_failure();
        reg.record_success(Utc::now());
        assert_eq!(reg.consecutive_failures, 0);
        assert_eq!(reg.trigger_count, 1);
    }
}
