//! Throughput metering: a 1-second **tumbling** window, not a sliding
//! one (SPEC_FULL.md §4.7 pins this choice -- a tumbling counter is a
//! plain atomic swap on tick, whereas a sliding window needs a deque of
//! timestamped buckets for no behavioral difference the spec asks for).

use canalchat_bus::Bus;
use canalchat_core::{ChannelId, ChannelMpsEvent, Event, MpsSnapshotEvent};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct MpsMeter {
    global: AtomicU64,
    per_channel: Mutex<HashMap<ChannelId, (String, u64)>>,
}

impl Default for MpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl MpsMeter {
    pub fn new() -> Self {
        MpsMeter {
            global: AtomicU64::new(0),
            per_channel: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, channel_id: ChannelId, channel_name: &str) {
        self.global.fetch_add(1, Ordering::Relaxed);
        self.per_channel
            .lock()
            .entry(channel_id)
            .and_modify(|(_, count)| *count += 1)
            .or_insert_with(|| (channel_name.to_string(), 1));
    }

    /// Resets the window to zero and returns what it held.
    fn drain(&self) -> (u64, HashMap<ChannelId, (String, u64)>) {
        let global = self.global.swap(0, Ordering::Relaxed);
        let per_channel = std::mem::take(&mut *self.per_channel.lock());
        (global, per_channel)
    }
}

/// Ticks once per second on a monotonic-clock boundary (tokio's
/// `interval`, not a sleep loop, so it doesn't accumulate drift -- per
/// spec.md §4.7's implementation note), publishing a `global`
/// `MpsSnapshot` and a `ChannelMps` for every channel with activity.
/// These reach the bus like any other event, so they flow through the
/// broker's normal room-dispatch path.
pub async fn run_ticker(bus: Bus, meter: std::sync::Arc<MpsMeter>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let (global, per_channel) = meter.drain();
        let ts = chrono::Utc::now();

        let per_channel_rates: BTreeMap<String, f64> = per_channel
            .values()
            .map(|(name, count)| (name.clone(), *count as f64))
            .collect();

        bus.publish_event(Event::MpsSnapshot(MpsSnapshotEvent {
            mps: global as f64,
            per_channel: per_channel_rates,
            ts,
        }));

        for (channel_id, (channel_name, count)) in per_channel {
            if count == 0 {
                continue;
            }
            bus.publish_event(Event::ChannelMps(ChannelMpsEvent {
                channel_id,
                channel_name,
                mps: count as f64,
                ts,
            }));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn drain_resets_counts() {
        let meter = MpsMeter::new();
        meter.record(ChannelId(1), "foo");
        meter.record(ChannelId(1), "foo");
        meter.record(ChannelId(2), "bar");

        let (global, per_channel) = meter.drain();
        assert_eq!(global, 3);
        assert_eq!(per_channel.get(&ChannelId(1)).unwrap().1, 2);
        assert_eq!(per_channel.get(&ChannelId(2)).unwrap().1, 1);

        let (global_again, per_channel_again) = meter.drain();
        assert_eq!(global_again, 0);
        assert!(per_channel_again.is_empty());
    }
}
