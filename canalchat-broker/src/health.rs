//! `GET /healthz` (spec.md §7's user-visible failure contract): healthy
//! when the store is reachable and the archive buffer isn't stuck in
//! persistent retry, degraded when it's retrying but still ingesting,
//! unhealthy when the store can't be reached at all. The broker only
//! exposes the status; the binary crate is responsible for observing
//! the store/archive and calling `HealthState::set`.

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub fn compute_status(store_reachable: bool, archive_persistent_retry: bool) -> HealthStatus {
    if !store_reachable {
        HealthStatus::Unhealthy
    } else if archive_persistent_retry {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub struct HealthState(Mutex<HealthStatus>);

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        HealthState(Mutex::new(HealthStatus::Healthy))
    }

    pub fn set(&self, status: HealthStatus) {
        *self.0.lock() = status;
    }

    pub fn get(&self) -> HealthStatus {
        *self.0.lock()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unreachable_store_is_always_unhealthy() {
        assert_eq!(compute_status(false, true), HealthStatus::Unhealthy);
        assert_eq!(compute_status(false, false), HealthStatus::Unhealthy);
    }

    #[test]
    fn reachable_store_with_stuck_archive_is_degraded() {
        assert_eq!(compute_status(true, true), HealthStatus::Degraded);
    }

    #[test]
    fn reachable_store_with_healthy_archive_is_healthy() {
        assert_eq!(compute_status(true, false), HealthStatus::Healthy);
    }
}
