use rand::Rng;
use std::time::Duration;

/// Exponential backoff with full jitter, capped at `max`. Shared by the
/// IRC session's reconnect loop and the archive buffer's commit retry
/// loop so both back off with the same policy instead of each hand-
/// rolling their own.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// duration to sleep before the next attempt; advances internal state
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << self.attempt.min(20));
        let capped = exp.min(self.max.as_millis());
        self.attempt += 1;
        let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
        Duration::from_millis(jittered as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delays_stay_under_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));
        for _ in 0..50 {
            let d = b.next_delay();
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn reset_restarts_growth() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.attempt, 10);
        b.reset();
        assert_eq!(b.attempt, 0);
    }
}
