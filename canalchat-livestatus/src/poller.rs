//! Poll loop: diffs Helix's live-stream set against what this process
//! last observed and publishes transitions onto the bus. Grounded on
//! `plugin-twitch/src/plugin.rs`'s `get_live_streams`/`State`, adapted
//! from IRC chat announcements to bus events per spec.md §4.9.

use crate::config::LiveStatusConfig;
use crate::token::WrappedToken;
use canalchat_bus::Bus;
use canalchat_core::{
    Channel, ChannelGameChangeEvent, ChannelId, ChannelStatusEvent, ChannelTransition, Event,
};
use canalchat_registry::ChannelRegistry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use twitch_api2::helix::streams::{self, Stream};
use twitch_api2::twitch_oauth2::{ClientId, ClientSecret};
use twitch_api2::HelixClient;

#[derive(Debug, Clone, PartialEq)]
struct Known {
    game_name: Option<String>,
}

pub struct LiveStatusPoller {
    client: HelixClient<'static, reqwest::Client>,
    token: WrappedToken,
    registry: Arc<ChannelRegistry>,
    bus: Bus,
    config: LiveStatusConfig,
    known: parking_lot::Mutex<HashMap<ChannelId, Known>>,
}

impl LiveStatusPoller {
    pub async fn new(
        config: LiveStatusConfig,
        registry: Arc<ChannelRegistry>,
        bus: Bus,
    ) -> anyhow::Result<Self> {
        let client = HelixClient::new();
        let token = WrappedToken::new(
            ClientId::new(config.client_id.clone()),
            ClientSecret::new(config.client_secret.clone()),
        )
        .await?;
        Ok(LiveStatusPoller {
            client,
            token,
            registry,
            bus,
            config,
            known: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Runs the refresh loop and the poll loop. Never returns unless one
    /// of them panics.
    pub async fn run(self: Arc<Self>) {
        self.token.spawn_refresh();
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = self.poll_once().await {
                log::warn!("live-status poll failed: {err:?}");
            }
        }
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let channels = self.registry.list(true);
        if channels.is_empty() {
            return Ok(());
        }

        let logins: Vec<twitch_api2::types::Nickname> = channels
            .iter()
            .map(|c| twitch_api2::types::Nickname::new(c.name.clone()))
            .collect();

        let resp = self
            .client
            .req_get(
                streams::GetStreamsRequest::builder()
                    .user_login(logins)
                    .build(),
                &self.token.get(),
            )
            .await?;

        let live: HashMap<String, Option<String>> = resp
            .data
            .into_iter()
            .map(|s| (s.user_login.to_string().to_ascii_lowercase(), non_empty(s)))
            .collect();

        let ts = Utc::now();
        let mut known = self.known.lock();
        let events = diff(&channels, &live, &mut known, ts);
        for event in events {
            self.bus.publish_event(event);
        }

        Ok(())
    }
}

fn non_empty(stream: Stream) -> Option<String> {
    let game_name = stream.game_name.to_string();
    if game_name.is_empty() {
        None
    } else {
        Some(game_name)
    }
}

/// Pure diff between the currently-active channel set, what Helix just
/// reported as live (keyed by lower-cased login, value is the game name
/// if any), and what this process last observed. Split out from
/// `poll_once` so the transition logic can be tested without a Helix
/// round trip.
fn diff(
    channels: &[Channel],
    live: &HashMap<String, Option<String>>,
    known: &mut HashMap<ChannelId, Known>,
    ts: DateTime<Utc>,
) -> Vec<Event> {
    let mut events = Vec::new();

    for channel in channels {
        let was_known = known.get(&channel.id).cloned();
        match live.get(&channel.name) {
            Some(game_name) => {
                let game_name = game_name.clone();
                match was_known {
                    None => {
                        known.insert(
                            channel.id,
                            Known {
                                game_name: game_name.clone(),
                            },
                        );
                        events.push(Event::ChannelStatus(ChannelStatusEvent {
                            channel_id: channel.id,
                            transition: ChannelTransition::Live,
                            game_name,
                            ts,
                        }));
                    }
                    Some(prev) if prev.game_name != game_name => {
                        known.insert(
                            channel.id,
                            Known {
                                game_name: game_name.clone(),
                            },
                        );
                        events.push(Event::ChannelGameChange(ChannelGameChangeEvent {
                            channel_id: channel.id,
                            old_game_name: prev.game_name,
                            new_game_name: game_name,
                            ts,
                        }));
                    }
                    Some(_) => {}
                }
            }
            None => {
                if was_known.is_some() {
                    known.remove(&channel.id);
                    events.push(Event::ChannelStatus(ChannelStatusEvent {
                        channel_id: channel.id,
                        transition: ChannelTransition::Offline,
                        game_name: None,
                        ts,
                    }));
                }
            }
        }
    }

    events
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn channel(id: i64, name: &str) -> Channel {
        Channel {
            id: ChannelId(id),
            name: name.to_string(),
            display_name: name.to_string(),
            twitch_id: None,
            active: true,
        }
    }

    #[test]
    fn newly_live_channel_emits_channel_status_live() {
        let channels = vec![channel(1, "foo")];
        let mut live = HashMap::new();
        live.insert("foo".to_string(), Some("Just Chatting".to_string()));
        let mut known = HashMap::new();
        let ts = Utc::now();

        let events = diff(&channels, &live, &mut known, ts);

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ChannelStatus(e) => {
                assert_eq!(e.channel_id, ChannelId(1));
                assert_eq!(e.transition, ChannelTransition::Live);
                assert_eq!(e.game_name.as_deref(), Some("Just Chatting"));
            }
            other => panic!("expected ChannelStatus, got {other:?}"),
        }
        assert!(known.contains_key(&ChannelId(1)));
    }

    #[test]
    fn channel_going_offline_emits_channel_status_offline_and_clears_state() {
        let channels = vec![channel(1, "foo")];
        let live = HashMap::new();
        let mut known = HashMap::new();
        known.insert(ChannelId(1), Known { game_name: Some("Just Chatting".to_string()) });
        let ts = Utc::now();

        let events = diff(&channels, &live, &mut known, ts);

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ChannelStatus(e) => {
                assert_eq!(e.transition, ChannelTransition::Offline);
                assert_eq!(e.game_name, None);
            }
            other => panic!("expected ChannelStatus, got {other:?}"),
        }
        assert!(!known.contains_key(&ChannelId(1)));
    }

    #[test]
    fn game_change_while_live_emits_channel_game_change_not_another_status() {
        let channels = vec![channel(1, "foo")];
        let mut live = HashMap::new();
        live.insert("foo".to_string(), Some("Rust".to_string()));
        let mut known = HashMap::new();
        known.insert(ChannelId(1), Known { game_name: Some("Just Chatting".to_string()) });
        let ts = Utc::now();

        let events = diff(&channels, &live, &mut known, ts);

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ChannelGameChange(e) => {
                assert_eq!(e.old_game_name.as_deref(), Some("Just Chatting"));
                assert_eq!(e.new_game_name.as_deref(), Some("Rust"));
            }
            other => panic!("expected ChannelGameChange, got {other:?}"),
        }
    }

    #[test]
    fn unchanged_live_channel_emits_nothing() {
        let channels = vec![channel(1, "foo")];
        let mut live = HashMap::new();
        live.insert("foo".to_string(), Some("Rust".to_string()));
        let mut known = HashMap::new();
        known.insert(ChannelId(1), Known { game_name: Some("Rust".to_string()) });

        let events = diff(&channels, &live, &mut known, Utc::now());

        assert!(events.is_empty());
    }

    #[test]
    fn channel_never_seen_live_and_still_offline_emits_nothing() {
        let channels = vec![channel(1, "foo")];
        let live = HashMap::new();
        let mut known = HashMap::new();

        let events = diff(&channels, &live, &mut known, Utc::now());

        assert!(events.is_empty());
    }
}
