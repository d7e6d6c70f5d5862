//! Event Bus (C6): in-process publish/subscribe fabric. Topics are
//! typed by event kind (implicitly -- every topic carries the same
//! [`Event`] sum type, and consumers match on `event.kind()`) and keyed
//! by `channel_id` for per-channel fan-out, plus a `global` pseudo-topic
//! that receives every event regardless of channel scope. See spec.md
//! §4.6.

use canalchat_core::{ChannelId, Event};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Global,
    Channel(ChannelId),
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// bounded per-subscriber buffer; spec.md §4.6 suggests 256
    pub subscriber_buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            subscriber_buffer_size: 256,
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

struct Inner {
    global: Mutex<Vec<Subscriber>>,
    channels: Mutex<HashMap<ChannelId, Vec<Subscriber>>>,
    config: BusConfig,
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

/// a live subscription handle: a receiving end plus the dropped-event
/// counter for this subscriber, per spec.md §4.6 ("a dropped-event
/// counter is incremented on its handle").
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Event, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Bus {
    pub fn new(config: BusConfig) -> Bus {
        Bus {
            inner: Arc::new(Inner {
                global: Mutex::new(Vec::new()),
                channels: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn subscribe_global(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_buffer_size);
        let dropped = Arc::new(AtomicU64::new(0));
        self.inner.global.lock().push(Subscriber {
            tx,
            dropped: Arc::clone(&dropped),
        });
        Subscription { rx, dropped }
    }

    pub fn subscribe_channel(&self, channel_id: ChannelId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_buffer_size);
        let dropped = Arc::new(AtomicU64::new(0));
        self.inner
            .channels
            .lock()
            .entry(channel_id)
            .or_default()
            .push(Subscriber {
                tx,
                dropped: Arc::clone(&dropped),
            });
        Subscription { rx, dropped }
    }

    /// publishes to exactly one topic. Non-blocking: a full subscriber
    /// buffer drops this event for that subscriber alone (tail-drop --
    /// the new event is dropped, already-buffered ones are undisturbed)
    /// and increments its counter; other subscribers are unaffected.
    pub fn publish(&self, topic: Topic, event: Event) {
        match topic {
            Topic::Global => Self::publish_to(&self.inner.global, event),
            Topic::Channel(id) => {
                let mut channels = self.inner.channels.lock();
                if let Some(subs) = channels.get_mut(&id) {
                    Self::dispatch(subs, event);
                }
            }
        }
    }

    /// publishes an event to the `global` room, and additionally to its
    /// own channel's room when the event carries a channel scope
    /// (spec.md §4.6/§4.7: every event reaches `global`, channel-scoped
    /// events also reach their channel room).
    pub fn publish_event(&self, event: Event) {
        if let Some(channel_id) = event.channel_id() {
            let mut channels = self.inner.channels.lock();
            if let Some(subs) = channels.get_mut(&channel_id) {
                Self::dispatch(subs, event.clone());
            }
        }
        Self::publish_to(&self.inner.global, event);
    }

    fn publish_to(subs: &Mutex<Vec<Subscriber>>, event: Event) {
        let mut subs = subs.lock();
        Self::dispatch(&mut subs, event);
    }

    fn dispatch(subs: &mut Vec<Subscriber>, event: Event) {
        subs.retain_mut(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use canalchat_core::{ChannelId, MessagesFlushedEvent};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn flushed_event() -> Event {
        Event::MessagesFlushed(MessagesFlushedEvent {
            channel_ids: vec![],
            user_ids: vec![],
            channels: vec![],
            usernames: vec![],
            count: 0,
            ts: Utc::now(),
        })
    }

    #[tokio::test]
    async fn global_subscriber_sees_channel_scoped_events() {
        let bus = Bus::new(BusConfig::default());
        let mut global = bus.subscribe_global();
        let mut room = bus.subscribe_channel(ChannelId(1));

        bus.publish_event(Event::WebhookAutoMuted(canalchat_core::WebhookAutoMutedEvent {
            registration_id: 1,
            consecutive_failures: 20,
            ts: Utc::now(),
        }));

        let got = global.recv().await.unwrap();
        assert_eq!(got.kind(), "webhook_auto_muted");
        assert!(room.try_recv().is_err(), "channel-less event shouldn't reach a channel room");
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let bus = Bus::new(BusConfig {
            subscriber_buffer_size: 2,
        });
        let mut slow = bus.subscribe_global();
        let mut fast = bus.subscribe_global();

        for _ in 0..10 {
            bus.publish(Topic::Global, flushed_event());
        }

        // slow never reads: should have dropped events, but fast still
        // gets everything that fit in its own buffer
        assert!(slow.dropped_count() > 0);
        assert!(fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn publication_order_preserved_per_subscriber() {
        let bus = Bus::new(BusConfig::default());
        let mut sub = bus.subscribe_global();
        for i in 0..5u32 {
            bus.publish(
                Topic::Global,
                Event::MessagesFlushed(MessagesFlushedEvent {
                    channel_ids: vec![],
                    user_ids: vec![],
                    channels: vec![],
                    usernames: vec![],
                    count: i as usize,
                    ts: Utc::now(),
                }),
            );
        }
        for i in 0..5u32 {
            match sub.recv().await.unwrap() {
                Event::MessagesFlushed(f) => assert_eq!(f.count, i as usize),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
