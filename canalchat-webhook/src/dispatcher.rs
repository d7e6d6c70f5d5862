//! Per-registration delivery workers: one bounded FIFO and one task per
//! destination, so a slow or dead destination never blocks another
//! (spec.md §4.8's "parallel-across/serial-within" dispatch rule).
//! Grounded on the teacher-adjacent `IrcHandles` registry shape
//! (per-key task handle + cleanup) from the retrieval pack, generalized
//! from per-channel IRC connections to per-registration HTTP workers.

use crate::body::build_body;
use crate::matcher::matches;
use crate::registration::WebhookRegistration;
use canalchat_bus::{Bus, Subscription};
use canalchat_core::{Backoff, Event, WebhookAutoMutedEvent};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// per-registration FIFO bound (spec.md §4.8)
    pub queue_capacity: usize,
    /// 429/5xx retry budget (spec.md §4.8: "up to 5 attempts")
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// per-URL rate limit (spec.md §4.8: "5 req/s")
    pub per_url_rate_per_sec: u32,
    /// bounded global dispatcher concurrency (spec.md §4.8)
    pub max_concurrent_deliveries: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            queue_capacity: 100,
            max_attempts: 5,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(30),
            per_url_rate_per_sec: 5,
            max_concurrent_deliveries: 50,
        }
    }
}

struct Worker {
    queue_tx: mpsc::Sender<Event>,
    handle: JoinHandle<()>,
    registration: Arc<Mutex<WebhookRegistration>>,
}

pub struct Dispatcher {
    workers: Mutex<HashMap<i64, Worker>>,
    client: reqwest::Client,
    concurrency: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            workers: Mutex::new(HashMap::new()),
            client: reqwest::Client::new(),
            concurrency: Arc::new(Semaphore::new(config.max_concurrent_deliveries)),
            config,
        })
    }

    /// Registers a destination and starts its worker task.
    pub fn register(self: &Arc<Self>, registration: WebhookRegistration, bus: Bus) -> i64 {
        let id = registration.id;
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let registration = Arc::new(Mutex::new(registration));

        let rate = NonZeroU32::new(self.config.per_url_rate_per_sec)
            .unwrap_or(nonzero_ext::nonzero!(5u32));
        let limiter = RateLimiter::direct(Quota::per_second(rate));

        let handle = tokio::spawn(run_worker(
            Arc::clone(&registration),
            rx,
            self.client.clone(),
            limiter,
            Arc::clone(&self.concurrency),
            bus,
            self.config.clone(),
        ));

        self.workers.lock().insert(
            id,
            Worker {
                queue_tx: tx,
                handle,
                registration,
            },
        );
        id
    }

    pub fn unregister(&self, id: i64) {
        if let Some(worker) = self.workers.lock().remove(&id) {
            worker.handle.abort();
        }
    }

    /// Matches `event` against every live registration's filter and
    /// enqueues it onto each match's own FIFO. A full or closed queue
    /// drops this event for that registration alone; a muted
    /// registration is skipped outright.
    pub fn route(&self, event: &Event) {
        let workers = self.workers.lock();
        for worker in workers.values() {
            let (muted, enabled, is_match) = {
                let reg = worker.registration.lock();
                (reg.muted, reg.enabled, matches(&reg.filter, event))
            };
            if muted || !enabled || !is_match {
                continue;
            }
            if worker.queue_tx.try_send(event.clone()).is_err() {
                log::warn!("webhook queue full or closed, dropping matched event");
            }
        }
    }

    /// Spawns the bus-consumption loop that feeds `route`.
    pub fn spawn_bus_consumer(self: &Arc<Self>, mut sub: Subscription) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                dispatcher.route(&event);
            }
        });
    }
}

async fn run_worker(
    registration: Arc<Mutex<WebhookRegistration>>,
    mut rx: mpsc::Receiver<Event>,
    client: reqwest::Client,
    limiter: DirectRateLimiter,
    concurrency: Arc<Semaphore>,
    bus: Bus,
    config: DispatcherConfig,
) {
    while let Some(event) = rx.recv().await {
        limiter.until_ready().await;
        let Ok(_permit) = concurrency.acquire().await else {
            return;
        };

        let url = registration.lock().url().to_string();
        let body = build_body(&event);
        let mut backoff = Backoff::new(config.backoff_base, config.backoff_max);
        let mut attempt = 0u32;

        let success = loop {
            attempt += 1;
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => break true,
                Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                    if attempt >= config.max_attempts {
                        break false;
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                Ok(resp) => {
                    log::debug!("webhook permanently rejected with status {}", resp.status());
                    break false;
                }
                Err(e) => {
                    if attempt >= config.max_attempts {
                        log::warn!("webhook delivery failed after {attempt} attempts: {e}");
                        break false;
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        };

        let just_muted = {
            let mut reg = registration.lock();
            if success {
                reg.record_success(chrono::Utc::now());
                false
            } else {
                reg.record_failure()
            }
        };

        if just_muted {
            let (registration_id, consecutive_failures) = {
                let reg = registration.lock();
                (reg.id, reg.consecutive_failures)
            };
            log::warn!(
                "webhook registration {registration_id} auto-muted after {consecutive_failures} consecutive failures"
            );
            bus.publish_event(Event::WebhookAutoMuted(WebhookAutoMutedEvent {
                registration_id,
                consecutive_failures,
                ts: chrono::Utc::now(),
            }));
            while rx.try_recv().is_ok() {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use canalchat_bus::BusConfig;
    use canalchat_core::{ChannelId, ChannelStatusEvent, ChannelTransition};
    use pretty_assertions::assert_eq;

    use crate::registration::WebhookFilter;

    #[tokio::test]
    async fn route_skips_muted_and_disabled_registrations() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let bus = Bus::new(BusConfig::default());

        let filter = WebhookFilter::ChannelLive {
            channel_id: ChannelId(1),
        };
        let mut reg =
            WebhookRegistration::new(1, 1, filter, "https://example.invalid/hook".to_string())
                .unwrap();
        reg.muted = true;
        let id = dispatcher.register(reg, bus);

        dispatcher.route(&Event::ChannelStatus(ChannelStatusEvent {
            channel_id: ChannelId(1),
            transition: ChannelTransition::Live,
            game_name: None,
            ts: chrono::Utc::now(),
        }));

        // nothing to assert on delivery directly (no network in tests),
        // but route() must not panic on a muted registration.
        dispatcher.unregister(id);
    }
}
