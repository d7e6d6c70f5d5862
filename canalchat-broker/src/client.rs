//! Per-connection actor: reads client commands off the socket, applies
//! them to the room registry, and forwards broker-dispatched envelopes
//! back out. One task per client, per the rest of this codebase's
//! actor-per-component shape.

use crate::protocol::{self, ack, ClientCommand, Envelope};
use crate::registry::Room;
use crate::server::Broker;
use axum::extract::ws::{Message, WebSocket};
use canalchat_registry::ChannelRegistry;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;

pub async fn handle_socket(socket: WebSocket, broker: Arc<Broker>, channels: Arc<ChannelRegistry>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Envelope>(broker.config.outbound_buffer_size);
    let client = broker.registry.register(tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        if ws_tx.send(Message::Text(envelope.to_json())).await.is_err() {
                            break;
                        }
                    }
                    // registry dropped our sender: force-closed (slow
                    // consumer defense, spec.md §4.7)
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&text, client, &broker, &channels) {
                            if ws_tx.send(Message::Text(reply.to_json())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("websocket error for client {client:?}: {e}");
                        break;
                    }
                }
            }
        }
    }

    broker.registry.unregister(client);
}

fn handle_command(
    raw: &str,
    client: crate::registry::ClientId,
    broker: &Broker,
    channels: &ChannelRegistry,
) -> Option<Envelope> {
    let command = match protocol::parse_client_command(raw) {
        Ok(cmd) => cmd,
        Err(protocol::UnknownEvent(bad)) => {
            log::debug!("dropping unparseable/unknown client frame: {bad}");
            return None;
        }
    };

    match command {
        ClientCommand::Subscribe(names) => {
            let resolved: Vec<String> = names
                .into_iter()
                .filter_map(|name| match channels.get(&name) {
                    Some(channel) => {
                        broker.registry.join(client, Room::Channel(channel.id));
                        Some(channel.name)
                    }
                    None => {
                        log::debug!("subscribe to unknown channel {name:?} ignored");
                        None
                    }
                })
                .collect();
            Some(ack("subscribed", json!({ "channels": resolved })))
        }
        ClientCommand::Unsubscribe(names) => {
            let resolved: Vec<String> = names
                .into_iter()
                .filter_map(|name| match channels.get(&name) {
                    Some(channel) => {
                        broker.registry.leave(client, Room::Channel(channel.id));
                        Some(channel.name)
                    }
                    None => None,
                })
                .collect();
            Some(ack("unsubscribed", json!({ "channels": resolved })))
        }
        ClientCommand::SubscribeGlobal => {
            broker.registry.join(client, Room::Global);
            Some(ack("subscribed_global", json!({})))
        }
        ClientCommand::UnsubscribeGlobal => {
            broker.registry.leave(client, Room::Global);
            Some(ack("unsubscribed", json!({ "channels": Vec::<String>::new() })))
        }
        ClientCommand::Ping => Some(ack("pong", json!({}))),
    }
}
