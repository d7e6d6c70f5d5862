//! Broker composition root: the axum application (WebSocket upgrade +
//! `/healthz`), the bus-consumption dispatch loop, and the MPS ticker.

use crate::health::HealthState;
use crate::mps::{self, MpsMeter};
use crate::registry::{Registry, Room};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use canalchat_bus::Bus;
use canalchat_core::Event;
use canalchat_registry::ChannelRegistry;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// bounded per-client outbound queue (spec.md §6's "broker outbound
    /// buffer size" config knob)
    pub outbound_buffer_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            outbound_buffer_size: 256,
        }
    }
}

pub struct Broker {
    pub(crate) registry: Registry,
    mps: Arc<MpsMeter>,
    health: Arc<HealthState>,
    pub(crate) config: BrokerConfig,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Arc<Broker> {
        Arc::new(Broker {
            registry: Registry::new(),
            mps: Arc::new(MpsMeter::new()),
            health: Arc::new(HealthState::new()),
            config,
        })
    }

    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    /// Spawns the two background tasks that make the broker live: the
    /// bus-consumption/room-dispatch loop and the once-a-second MPS
    /// ticker. Returns immediately; both tasks run until the bus is
    /// dropped.
    pub fn spawn(self: &Arc<Self>, bus: Bus) {
        let sub = bus.subscribe_global();
        let broker = Arc::clone(self);
        tokio::spawn(run_dispatch(sub, broker));

        let meter = Arc::clone(&self.mps);
        tokio::spawn(mps::run_ticker(bus, meter));
    }

    /// The axum router: `/ws` for client connections, `/healthz` for
    /// the liveness contract (spec.md §7).
    pub fn router(self: &Arc<Self>, channels: Arc<ChannelRegistry>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/healthz", get(healthz))
            .with_state((Arc::clone(self), channels))
    }
}

async fn run_dispatch(mut sub: canalchat_bus::Subscription, broker: Arc<Broker>) {
    while let Some(event) = sub.recv().await {
        if let Event::ChatMessage(ref e) = event {
            broker.mps.record(e.message.channel_id, &e.channel_name);
        }

        let Some(envelope) = crate::protocol::event_to_envelope(&event) else {
            continue;
        };

        match event.channel_id() {
            Some(channel_id) => {
                broker
                    .registry
                    .dispatch(Room::Channel(channel_id), envelope.clone());
                // `mod_action` reaches its own channel room under that
                // name, and the global room under `global_mod_action`
                // (spec.md §6 lists both as distinct server->client
                // events; this is the only event with a scope-dependent
                // name).
                if matches!(event, Event::ModAction(_)) {
                    broker
                        .registry
                        .dispatch(Room::Global, envelope.with_event("global_mod_action"));
                } else {
                    broker.registry.dispatch(Room::Global, envelope);
                }
            }
            None => broker.registry.dispatch(Room::Global, envelope),
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State((broker, channels)): State<(Arc<Broker>, Arc<ChannelRegistry>)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| crate::client::handle_socket(socket, broker, channels))
}

async fn healthz(
    State((broker, _channels)): State<(Arc<Broker>, Arc<ChannelRegistry>)>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "status": broker.health.get() }))
}

#[cfg(test)]
mod test {
    use super::*;
    use canalchat_bus::BusConfig;
    use canalchat_core::{ChannelId, ChatMessageEvent, Message, ModAction, ModActionKind, UserId};
    use pretty_assertions::assert_eq;

    fn message(channel_id: ChannelId, wire_id: &str) -> ChatMessageEvent {
        ChatMessageEvent {
            message: Message {
                id: 1,
                channel_id,
                user_id: UserId(1),
                text: "hi".to_string(),
                ts: chrono::Utc::now(),
                wire_id: wire_id.to_string(),
                badges: vec![],
                emotes: vec![],
                reply_to_wire_id: None,
                is_deleted: false,
                deleted_at: None,
                deleted_by: None,
                synthesized_ts: false,
            },
            channel_name: "foo".to_string(),
            channel_twitch_id: None,
            username: "bob".to_string(),
            user_display_name: "Bob".to_string(),
        }
    }

    #[tokio::test]
    async fn chat_message_reaches_both_channel_and_global_rooms() {
        let bus = Bus::new(BusConfig::default());
        let broker = Broker::new(BrokerConfig::default());
        broker.spawn(bus.clone());

        let (channel_tx, mut channel_rx) = tokio::sync::mpsc::channel(8);
        let channel_client = broker.registry.register(channel_tx);
        broker
            .registry
            .join(channel_client, Room::Channel(ChannelId(1)));

        let (global_tx, mut global_rx) = tokio::sync::mpsc::channel(8);
        let global_client = broker.registry.register(global_tx);
        broker.registry.join(global_client, Room::Global);

        bus.publish_event(Event::ChatMessage(message(ChannelId(1), "wire-1")));

        let in_channel = channel_rx.recv().await.unwrap();
        assert_eq!(in_channel.event, "chat_message");
        let in_global = global_rx.recv().await.unwrap();
        assert_eq!(in_global.event, "chat_message");
    }

    #[tokio::test]
    async fn mod_action_is_renamed_for_global_subscribers() {
        let bus = Bus::new(BusConfig::default());
        let broker = Broker::new(BrokerConfig::default());
        broker.spawn(bus.clone());

        let (channel_tx, mut channel_rx) = tokio::sync::mpsc::channel(8);
        let channel_client = broker.registry.register(channel_tx);
        broker
            .registry
            .join(channel_client, Room::Channel(ChannelId(1)));

        let (global_tx, mut global_rx) = tokio::sync::mpsc::channel(8);
        let global_client = broker.registry.register(global_tx);
        broker.registry.join(global_client, Room::Global);

        bus.publish_event(Event::ModAction(ModAction {
            id: 1,
            channel_id: ChannelId(1),
            moderator_id: Some(UserId(2)),
            target_user_id: UserId(3),
            kind: ModActionKind::Timeout,
            duration_s: Some(60),
            reason: None,
            ts: chrono::Utc::now(),
            related_wire_id: None,
        }));

        assert_eq!(channel_rx.recv().await.unwrap().event, "mod_action");
        assert_eq!(global_rx.recv().await.unwrap().event, "global_mod_action");
    }
}
