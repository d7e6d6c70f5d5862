//! Archive Buffer (C5): the durability kernel. Accepts resolved domain
//! events, batches them into single-transaction inserts, and guarantees
//! at-least-once durability via unbounded retry with backoff. See
//! spec.md §4.5.

use crate::conn::Pool;
use crate::models::{NewMessage, NewModAction, NewMonetizationEvent};
use crate::schema::{messages, mod_actions, monetization_events};
use canalchat_bus::{Bus, Topic};
use canalchat_core::backoff::Backoff;
use canalchat_core::{
    ChatMessageEvent, Event, ModAction, ModActionKind, MessagesFlushedEvent,
};
use chrono::Utc;
use diesel::prelude::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub max_batch_size: usize,
    pub max_batch_age: Duration,
    pub max_backlog: usize,
    /// how long `append` blocks a producer once the backlog is full,
    /// before falling back to dropping the oldest buffered chat message
    /// (spec.md §4.5's pinned backpressure choice -- see DESIGN.md)
    pub backpressure_block: Duration,
    pub commit_backoff_base: Duration,
    pub commit_backoff_max: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            max_batch_size: 500,
            max_batch_age: Duration::from_secs(2),
            max_backlog: 50_000,
            backpressure_block: Duration::from_millis(100),
            commit_backoff_base: Duration::from_millis(100),
            commit_backoff_max: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
enum Pending {
    ChatMessage(ChatMessageEvent),
    ModAction(ModAction),
    Monetization { channel_id: canalchat_core::ChannelId, kind: &'static str, user_id: Option<canalchat_core::UserId>, payload: serde_json::Value, ts: chrono::DateTime<Utc> },
}

#[derive(Debug, Default)]
struct Stats {
    buffered: AtomicUsize,
    inflight: AtomicUsize,
    flush_errors: AtomicU64,
    dropped_messages: AtomicU64,
    last_flush_at: Mutex<Option<chrono::DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveStats {
    pub buffered: usize,
    pub inflight: usize,
    pub last_flush_at: Option<chrono::DateTime<Utc>>,
    pub flush_errors: u64,
    pub dropped_messages: u64,
}

struct Queue {
    items: VecDeque<Pending>,
    oldest_enqueued_at: Option<Instant>,
}

pub struct ArchiveBuffer {
    queue: Arc<Mutex<Queue>>,
    notify: Arc<Notify>,
    stats: Arc<Stats>,
    config: ArchiveConfig,
    force_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl ArchiveBuffer {
    pub fn spawn(pool: Pool, bus: Bus, config: ArchiveConfig) -> Arc<ArchiveBuffer> {
        let (force_tx, force_rx) = mpsc::channel(16);
        let buffer = Arc::new(ArchiveBuffer {
            queue: Arc::new(Mutex::new(Queue {
                items: VecDeque::new(),
                oldest_enqueued_at: None,
            })),
            notify: Arc::new(Notify::new()),
            stats: Arc::new(Stats::default()),
            config,
            force_tx,
        });
        let worker = Arc::clone(&buffer);
        tokio::spawn(async move { worker.run(pool, bus, force_rx).await });
        buffer
    }

    /// enqueues and returns immediately, per spec.md §4.5 -- except under
    /// the pinned backpressure policy, where a full backlog blocks the
    /// producer for up to `backpressure_block` before the oldest buffered
    /// chat message is dropped to make room. Mod actions are never
    /// dropped (spec.md §4.5: "the most audit-relevant class").
    pub async fn append(&self, event: Event) {
        let Some(pending) = to_pending(event) else {
            return;
        };
        let is_mod_action = matches!(pending, Pending::ModAction(_));
        let deadline = Instant::now() + self.config.backpressure_block;

        loop {
            {
                let mut q = self.queue.lock();
                if q.items.len() < self.config.max_backlog || is_mod_action {
                    if q.items.is_empty() {
                        q.oldest_enqueued_at = Some(Instant::now());
                    }
                    q.items.push_back(pending);
                    self.stats.buffered.store(q.items.len(), Ordering::Relaxed);
                    drop(q);
                    self.notify.notify_one();
                    return;
                }
            }
            if Instant::now() >= deadline {
                let mut q = self.queue.lock();
                if let Some(pos) = q
                    .items
                    .iter()
                    .position(|p| matches!(p, Pending::ChatMessage(_)))
                {
                    q.items.remove(pos);
                    self.stats.dropped_messages.fetch_add(1, Ordering::Relaxed);
                    log::warn!("archive backlog saturated, dropped oldest chat message");
                }
                q.items.push_back(pending);
                self.stats.buffered.store(q.items.len(), Ordering::Relaxed);
                drop(q);
                self.notify.notify_one();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// forces a batch and blocks until the current backlog has committed
    /// (or failed permanently, which per the at-least-once model never
    /// actually happens -- it retries forever, so this can in principle
    /// block for a long time if the store stays down).
    pub async fn flush_now(&self) {
        let (tx, rx) = oneshot::channel();
        if self.force_tx.send(tx).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats {
            buffered: self.stats.buffered.load(Ordering::Relaxed),
            inflight: self.stats.inflight.load(Ordering::Relaxed),
            last_flush_at: *self.stats.last_flush_at.lock(),
            flush_errors: self.stats.flush_errors.load(Ordering::Relaxed),
            dropped_messages: self.stats.dropped_messages.load(Ordering::Relaxed),
        }
    }

    async fn run(
        self: Arc<Self>,
        pool: Pool,
        bus: Bus,
        mut force_rx: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        loop {
            let sleep_for = {
                let q = self.queue.lock();
                match q.oldest_enqueued_at {
                    Some(since) => self
                        .config
                        .max_batch_age
                        .saturating_sub(since.elapsed()),
                    None => self.config.max_batch_age,
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    self.flush_batch(&pool, &bus).await;
                }
                _ = self.notify.notified() => {
                    let over_size = self.queue.lock().items.len() >= self.config.max_batch_size;
                    if over_size {
                        self.flush_batch(&pool, &bus).await;
                    }
                }
                Some(reply) = force_rx.recv() => {
                    self.flush_batch(&pool, &bus).await;
                    let _ = reply.send(());
                }
            }
        }
    }

    async fn flush_batch(&self, pool: &Pool, bus: &Bus) {
        let batch: Vec<Pending> = {
            let mut q = self.queue.lock();
            let n = q.items.len().min(self.config.max_batch_size);
            let batch: Vec<_> = q.items.drain(..n).collect();
            q.oldest_enqueued_at = if q.items.is_empty() {
                None
            } else {
                Some(Instant::now())
            };
            self.stats.buffered.store(q.items.len(), Ordering::Relaxed);
            batch
        };
        if batch.is_empty() {
            return;
        }

        self.stats.inflight.store(batch.len(), Ordering::Relaxed);
        let pool = pool.clone();
        let commit_batch = batch.clone();
        let mut backoff = Backoff::new(self.config.commit_backoff_base, self.config.commit_backoff_max);

        loop {
            let pool = pool.clone();
            let commit_batch = commit_batch.clone();
            let result =
                tokio::task::spawn_blocking(move || commit_sync(&pool, &commit_batch)).await;
            match result {
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("archive commit failed, retrying: {e:#}");
                }
                Err(e) => {
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("archive commit task panicked, retrying: {e:#}");
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }

        self.stats.inflight.store(0, Ordering::Relaxed);
        *self.stats.last_flush_at.lock() = Some(Utc::now());

        let flushed = summarize(&batch);
        bus.publish(Topic::Global, Event::MessagesFlushed(flushed));
    }
}

fn to_pending(event: Event) -> Option<Pending> {
    match event {
        Event::ChatMessage(e) => Some(Pending::ChatMessage(e)),
        Event::ModAction(e) => Some(Pending::ModAction(e)),
        Event::Subscription(e) => Some(Pending::Monetization {
            channel_id: e.channel_id,
            kind: "subscription",
            user_id: Some(e.user_id),
            ts: e.ts,
            payload: serde_json::to_value(&e).unwrap_or_default(),
        }),
        Event::GiftSub(e) => Some(Pending::Monetization {
            channel_id: e.channel_id,
            kind: "gift_sub",
            user_id: e.recipient_user_id,
            ts: e.ts,
            payload: serde_json::to_value(&e).unwrap_or_default(),
        }),
        Event::Raid(e) => Some(Pending::Monetization {
            channel_id: e.channel_id,
            kind: "raid",
            user_id: Some(e.raider_user_id),
            ts: e.ts,
            payload: serde_json::to_value(&e).unwrap_or_default(),
        }),
        Event::Bits(e) => Some(Pending::Monetization {
            channel_id: e.channel_id,
            kind: "bits",
            user_id: Some(e.user_id),
            ts: e.ts,
            payload: serde_json::to_value(&e).unwrap_or_default(),
        }),
        _ => None,
    }
}

fn summarize(batch: &[Pending]) -> MessagesFlushedEvent {
    use std::collections::BTreeSet;
    let mut channel_ids = BTreeSet::new();
    let mut user_ids = BTreeSet::new();
    let mut channels = BTreeSet::new();
    let mut usernames = BTreeSet::new();
    let mut count = 0usize;

    for item in batch {
        if let Pending::ChatMessage(msg) = item {
            channel_ids.insert(msg.message.channel_id);
            user_ids.insert(msg.message.user_id);
            channels.insert(msg.channel_name.to_ascii_lowercase());
            usernames.insert(msg.username.to_ascii_lowercase());
            count += 1;
        }
    }

    MessagesFlushedEvent {
        channel_ids: channel_ids.into_iter().collect(),
        user_ids: user_ids.into_iter().collect(),
        channels: channels.into_iter().collect(),
        usernames: usernames.into_iter().collect(),
        count,
        ts: Utc::now(),
    }
}

fn commit_sync(pool: &Pool, batch: &[Pending]) -> anyhow::Result<()> {
    let conn = pool.get()?;
    conn.transaction::<_, diesel::result::Error, _>(|| {
        for item in batch {
            match item {
                Pending::ChatMessage(evt) => insert_message(&conn, evt)?,
                Pending::ModAction(action) => insert_mod_action(&conn, action)?,
                Pending::Monetization {
                    channel_id,
                    kind,
                    user_id,
                    payload,
                    ts,
                } => {
                    diesel::insert_into(monetization_events::table)
                        .values(NewMonetizationEvent {
                            channel_id: channel_id.0,
                            kind: kind.to_string(),
                            user_id: user_id.map(|u| u.0),
                            payload_json: payload.to_string(),
                            ts: ts.naive_utc(),
                        })
                        .execute(&conn)?;
                }
            }
        }
        Ok(())
    })?;
    Ok(())
}

fn insert_message(conn: &diesel::SqliteConnection, evt: &ChatMessageEvent) -> diesel::QueryResult<()> {
    let msg = &evt.message;
    let new_row = NewMessage {
        channel_id: msg.channel_id.0,
        user_id: msg.user_id.0,
        text: msg.text.clone(),
        ts: msg.ts.naive_utc(),
        wire_id: msg.wire_id.clone(),
        badges_json: serde_json::to_string(&msg.badges).unwrap_or_else(|_| "[]".to_string()),
        emotes_json: serde_json::to_string(&msg.emotes).unwrap_or_else(|_| "[]".to_string()),
        reply_to_wire_id: msg.reply_to_wire_id.clone(),
        is_deleted: msg.is_deleted,
        deleted_at: msg.deleted_at.map(|d| d.naive_utc()),
        deleted_by: msg.deleted_by.map(|u| u.0),
        synthesized_ts: msg.synthesized_ts,
    };

    // `wire_id` is unique; a conflict here means this exact message was
    // already committed by an earlier attempt at this same batch (or an
    // upstream replay) -- treated as success, per spec.md §7's
    // idempotent-replay rule.
    let res = diesel::insert_into(messages::table)
        .values(&new_row)
        .execute(conn);
    match res {
        Ok(_) => Ok(()),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => Ok(()),
        Err(e) => Err(e),
    }
}

fn insert_mod_action(conn: &diesel::SqliteConnection, action: &ModAction) -> diesel::QueryResult<()> {
    diesel::insert_into(mod_actions::table)
        .values(NewModAction {
            channel_id: action.channel_id.0,
            moderator_id: action.moderator_id.map(|u| u.0),
            target_user_id: action.target_user_id.0,
            kind: action.kind.as_str().to_string(),
            duration_s: action.duration_s,
            reason: action.reason.clone(),
            ts: action.ts.naive_utc(),
            related_wire_id: action.related_wire_id.clone(),
        })
        .execute(conn)?;

    if action.kind == ModActionKind::Delete {
        if let Some(wire_id) = &action.related_wire_id {
            diesel::update(messages::table.filter(messages::wire_id.eq(wire_id)))
                .set((
                    messages::is_deleted.eq(true),
                    messages::deleted_at.eq(action.ts.naive_utc()),
                    messages::deleted_by.eq(action.moderator_id.map(|u| u.0)),
                ))
                .execute(conn)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::{establish_pool, run_migrations};
    use canalchat_core::{Badge, ChannelId, Message, UserId};
    use pretty_assertions::assert_eq;

    fn test_pool() -> Pool {
        use std::time::{SystemTime, UNIX_EPOCH};
        let n = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let url = format!("file:archive-test-{n}?mode=memory&cache=shared");
        run_migrations(&url).expect("migrations");
        establish_pool(&url).expect("pool")
    }

    fn sample_message(wire_id: &str) -> ChatMessageEvent {
        ChatMessageEvent {
            message: Message {
                id: 0,
                channel_id: ChannelId(1),
                user_id: UserId(1),
                text: "hi".to_string(),
                ts: Utc::now(),
                wire_id: wire_id.to_string(),
                badges: vec![Badge { type_: "sub".into(), version: "1".into() }],
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
    async fn flush_now_commits_and_emits_messages_flushed() {
        let pool = test_pool();
        let bus = Bus::new(Default::default());
        let mut sub = bus.subscribe_global();
        let buffer = ArchiveBuffer::spawn(pool.clone(), bus.clone(), ArchiveConfig::default());

        buffer.append(Event::ChatMessage(sample_message("A"))).await;
        buffer.flush_now().await;

        let conn = pool.get().unwrap();
        let count: i64 = messages::table
            .filter(messages::wire_id.eq("A"))
            .count()
            .get_result(&conn)
            .unwrap();
        assert_eq!(count, 1);

        let event = sub.recv().await.expect("messages_flushed event");
        match event {
            Event::MessagesFlushed(f) => {
                assert_eq!(f.count, 1);
                assert_eq!(f.usernames, vec!["bob".to_string()]);
            }
            other => panic!("expected MessagesFlushed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_wire_id_is_idempotent() {
        let pool = test_pool();
        let bus = Bus::new(Default::default());
        let buffer = ArchiveBuffer::spawn(pool.clone(), bus, ArchiveConfig::default());

        buffer.append(Event::ChatMessage(sample_message("DUP"))).await;
        buffer.flush_now().await;
        buffer.append(Event::ChatMessage(sample_message("DUP"))).await;
        buffer.flush_now().await;

        let conn = pool.get().unwrap();
        let count: i64 = messages::table
            .filter(messages::wire_id.eq("DUP"))
            .count()
            .get_result(&conn)
            .unwrap();
        assert_eq!(count, 1, "replay of the same wire_id must not duplicate the row");
    }
}
