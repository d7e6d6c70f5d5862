//! Room membership and client fan-out. A room is a channel id or the
//! `global` sentinel (spec.md §4.7). Adding/removing a membership is
//! O(1): each client tracks its own room set, and each room tracks its
//! own client set, so teardown on disconnect never scans the whole
//! membership table.

use crate::protocol::Envelope;
use canalchat_core::ChannelId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Global,
    Channel(ChannelId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> ClientId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ClientId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct ClientEntry {
    tx: mpsc::Sender<Envelope>,
    rooms: HashSet<Room>,
}

struct Inner {
    clients: HashMap<ClientId, ClientEntry>,
    rooms: HashMap<Room, HashSet<ClientId>>,
}

/// Owns the room <-> client membership map and the per-client outbound
/// queues. A single lock protects both sides so membership and queue
/// registration can never observe each other half-updated.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                rooms: HashMap::new(),
            }),
        }
    }

    /// Registers a fresh client and returns its id. The outbound queue is
    /// bounded; a full queue force-closes the client (spec.md §4.7).
    pub fn register(&self, tx: mpsc::Sender<Envelope>) -> ClientId {
        let id = ClientId::next();
        self.inner.lock().clients.insert(
            id,
            ClientEntry {
                tx,
                rooms: HashSet::new(),
            },
        );
        id
    }

    /// Removes a client and all its room memberships. Idempotent: safe
    /// to call more than once for the same client.
    pub fn unregister(&self, client: ClientId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.clients.remove(&client) {
            for room in entry.rooms {
                if let Some(members) = inner.rooms.get_mut(&room) {
                    members.remove(&client);
                    if members.is_empty() {
                        inner.rooms.remove(&room);
                    }
                }
            }
        }
    }

    pub fn join(&self, client: ClientId, room: Room) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.clients.get_mut(&client) {
            entry.rooms.insert(room);
        } else {
            return;
        }
        inner.rooms.entry(room).or_default().insert(client);
    }

    pub fn leave(&self, client: ClientId, room: Room) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.clients.get_mut(&client) {
            entry.rooms.remove(&room);
        }
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.remove(&client);
            if members.is_empty() {
                inner.rooms.remove(&room);
            }
        }
    }

    /// Writes `envelope` into every member of `room`'s outbound queue.
    /// A member whose queue is full or already closed is force-closed:
    /// its sender is dropped and its memberships cleared immediately, so
    /// its reader task (which owns the other half of `tx`) observes a
    /// closed channel and tears the connection down (spec.md §4.7's
    /// "immediately removes all room memberships").
    pub fn dispatch(&self, room: Room, envelope: Envelope) {
        let mut inner = self.inner.lock();
        let Some(members) = inner.rooms.get(&room) else {
            return;
        };
        let mut to_close = Vec::new();
        for &client in members {
            let Some(entry) = inner.clients.get(&client) else {
                continue;
            };
            match entry.tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("client {client:?} outbound queue full, force-closing");
                    to_close.push(client);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => to_close.push(client),
            }
        }
        for client in to_close {
            if let Some(entry) = inner.clients.remove(&client) {
                for r in entry.rooms {
                    if let Some(m) = inner.rooms.get_mut(&r) {
                        m.remove(&client);
                        if m.is_empty() {
                            inner.rooms.remove(&r);
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn room_size(&self, room: Room) -> usize {
        self.inner
            .lock()
            .rooms
            .get(&room)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn env() -> Envelope {
        Envelope::new(
            "messages_flushed",
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn join_then_dispatch_delivers() {
        let reg = Registry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let client = reg.register(tx);
        reg.join(client, Room::Global);
        reg.dispatch(Room::Global, env());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let reg = Registry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let client = reg.register(tx);
        reg.join(client, Room::Channel(ChannelId(1)));
        reg.leave(client, Room::Channel(ChannelId(1)));
        reg.dispatch(Room::Channel(ChannelId(1)), env());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_force_closes_client() {
        let reg = Registry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let client = reg.register(tx);
        reg.join(client, Room::Global);
        reg.dispatch(Room::Global, env());
        reg.dispatch(Room::Global, env()); // queue now full, this one force-closes
        assert_eq!(reg.room_size(Room::Global), 0, "force-closed client leaves the room");
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none(), "sender was dropped by force-close");
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let reg = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let client = reg.register(tx);
        reg.join(client, Room::Global);
        reg.unregister(client);
        reg.unregister(client);
        assert_eq!(reg.room_size(Room::Global), 0);
    }
}
