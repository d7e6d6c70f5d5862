//! Channel Registry (C1): the source of truth for the set of channels
//! the system must be joined to. See spec.md §4.1.

use canalchat_core::{Channel, ChannelId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Join(String),
    Part(String),
}

struct Inner {
    channels: HashMap<String, Channel>,
    /// last active state actually broadcast for a channel, used to
    /// coalesce redundant consecutive toggles (two `Join(x)` in a row
    /// collapse to one, per spec.md §4.1)
    last_broadcast_active: HashMap<String, bool>,
    subscribers: Vec<mpsc::Sender<Intent>>,
}

#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicI64>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry {
            inner: Arc::new(Mutex::new(Inner {
                channels: HashMap::new(),
                last_broadcast_active: HashMap::new(),
                subscribers: Vec::new(),
            })),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// idempotent find-or-create; new channels default to active
    pub fn add(&self, name: &str) -> Channel {
        let name = name.to_ascii_lowercase();
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.channels.get(&name) {
            return existing.clone();
        }
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let channel = Channel {
            id,
            display_name: name.clone(),
            name: name.clone(),
            twitch_id: None,
            active: true,
        };
        inner.channels.insert(name.clone(), channel.clone());
        drop(inner);
        self.broadcast_if_changed(&name, true);
        channel
    }

    /// Inserts or updates a channel using an id resolved elsewhere (the
    /// Identity Resolver is the store's source of truth for `ChannelId`,
    /// per spec.md §4.4). Unlike `add`, this never mints its own id: a
    /// channel observed by IRC must carry the exact same id that the
    /// store hands out, or the Subscription Broker and the archive
    /// would disagree about which room a given `channel_id` belongs to.
    pub fn sync_resolved(&self, channel: Channel) -> Channel {
        let name = channel.name.to_ascii_lowercase();
        let active = channel.active;
        {
            let mut inner = self.inner.lock();
            inner.channels.insert(name.clone(), channel.clone());
        }
        self.broadcast_if_changed(&name, active);
        channel
    }

    /// soft-delete: flips `active=false`, row preserved forever so
    /// foreign keys (messages, mod_actions) stay valid
    pub fn remove(&self, name: &str) {
        self.set_active(name, false);
    }

    pub fn set_active(&self, name: &str, active: bool) {
        let name = name.to_ascii_lowercase();
        {
            let mut inner = self.inner.lock();
            match inner.channels.get_mut(&name) {
                Some(channel) => channel.active = active,
                None => {
                    let id = ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst));
                    inner.channels.insert(
                        name.clone(),
                        Channel {
                            id,
                            name: name.clone(),
                            display_name: name.clone(),
                            twitch_id: None,
                            active,
                        },
                    );
                }
            }
        }
        self.broadcast_if_changed(&name, active);
    }

    /// Looks up a channel by name without creating it. Used by the
    /// Subscription Broker to resolve a client's `subscribe{channels}`
    /// names to ids once, per spec.md §4.7.
    pub fn get(&self, name: &str) -> Option<Channel> {
        let name = name.to_ascii_lowercase();
        self.inner.lock().channels.get(&name).cloned()
    }

    pub fn list(&self, active_only: bool) -> Vec<Channel> {
        let inner = self.inner.lock();
        inner
            .channels
            .values()
            .filter(|c| !active_only || c.active)
            .cloned()
            .collect()
    }

    /// Returns a fresh intent stream. The current desired state (every
    /// currently-active channel, as `Join`) is replayed to this new
    /// subscriber immediately so late attachers never miss the starting
    /// state, per spec.md §4.1.
    pub fn watch_changes(&self) -> mpsc::Receiver<Intent> {
        let (tx, rx) = mpsc::channel(256);
        let inner = self.inner.lock();
        for channel in inner.channels.values().filter(|c| c.active) {
            // replay failures are impossible here: this is a brand new
            // channel with nobody else able to have filled its buffer yet
            let _ = tx.try_send(Intent::Join(channel.name.clone()));
        }
        drop(inner);
        self.inner.lock().subscribers.push(tx);
        rx
    }

    fn broadcast_if_changed(&self, name: &str, active: bool) {
        let mut inner = self.inner.lock();
        if inner.last_broadcast_active.get(name) == Some(&active) {
            return;
        }
        inner.last_broadcast_active.insert(name.to_string(), active);
        let intent = if active {
            Intent::Join(name.to_string())
        } else {
            Intent::Part(name.to_string())
        };
        inner.subscribers.retain(|tx| {
            match tx.try_send(intent.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("channel registry subscriber backlog full, dropping intent");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn add_emits_join_and_is_idempotent() {
        let reg = ChannelRegistry::new();
        let mut rx = reg.watch_changes();
        let c1 = reg.add("Foo");
        let c2 = reg.add("foo");
        assert_eq!(c1.id, c2.id, "second add is idempotent, same id");
        assert_eq!(rx.recv().await, Some(Intent::Join("foo".to_string())));
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay() {
        let reg = ChannelRegistry::new();
        reg.add("foo");
        reg.add("bar");
        let mut rx = reg.watch_changes();
        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by_key(|i| match i {
            Intent::Join(n) | Intent::Part(n) => n.clone(),
        });
        assert_eq!(
            seen,
            vec![
                Intent::Join("bar".to_string()),
                Intent::Join("foo".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn repeated_toggles_coalesce() {
        let reg = ChannelRegistry::new();
        let mut rx = reg.watch_changes();
        reg.add("foo");
        reg.set_active("foo", true); // no-op, already active
        reg.set_active("foo", true); // no-op
        assert_eq!(rx.recv().await, Some(Intent::Join("foo".to_string())));
        // only one Join should ever have been queued despite 2 redundant calls
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn set_active_false_then_true_emits_part_then_join() {
        let reg = ChannelRegistry::new();
        reg.add("foo");
        let mut rx = reg.watch_changes();
        assert_eq!(rx.recv().await, Some(Intent::Join("foo".to_string())));
        reg.set_active("foo", false);
        reg.set_active("foo", true);
        assert_eq!(rx.recv().await, Some(Intent::Part("foo".to_string())));
        assert_eq!(rx.recv().await, Some(Intent::Join("foo".to_string())));
    }

    #[test]
    fn get_resolves_name_to_channel_without_creating() {
        let reg = ChannelRegistry::new();
        assert!(reg.get("foo").is_none());
        let created = reg.add("Foo");
        assert_eq!(reg.get("foo").unwrap().id, created.id);
    }

    #[test]
    fn list_filters_by_active() {
        let reg = ChannelRegistry::new();
        reg.add("foo");
        reg.add("bar");
        reg.remove("bar");
        assert_eq!(reg.list(true).len(), 1);
        assert_eq!(reg.list(false).len(), 2, "soft-deleted row preserved");
    }

    #[tokio::test]
    async fn sync_resolved_uses_the_given_id_instead_of_minting_one() {
        let reg = ChannelRegistry::new();
        let mut rx = reg.watch_changes();
        let resolved = Channel {
            id: ChannelId(42),
            name: "foo".to_string(),
            display_name: "Foo".to_string(),
            twitch_id: Some("12345".to_string()),
            active: true,
        };
        let channel = reg.sync_resolved(resolved.clone());
        assert_eq!(channel.id, ChannelId(42));
        assert_eq!(reg.get("foo").unwrap().id, ChannelId(42));
        assert_eq!(rx.recv().await, Some(Intent::Join("foo".to_string())));
    }
}
