//! Config surface: a single dhall-loaded file mirroring the teacher's
//! `GolemConfig::from_path("golem_config.dhall")` (`rustygolem/src/golem.rs`),
//! generalized from "plugin list + SASL password" to every knob spec.md §6
//! and SPEC_FULL.md §6 name. Library config types that are already plain
//! (`IrcConfig`, `LiveStatusConfig`) are embedded directly; types that carry
//! a `Duration` (which `serde_dhall` can't deserialize without a shim) get a
//! small scalar-field section here that's converted at startup.

use canalchat_bus::BusConfig;
use canalchat_irc::IrcConfig;
use canalchat_livestatus::LiveStatusConfig;
use canalchat_store::ArchiveConfig;
use canalchat_webhook::DispatcherConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// channels joined at startup, in addition to any `--channels` CLI override
    #[serde(default)]
    pub channels: Vec<String>,
    pub irc: IrcConfig,
    pub store: StoreSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub webhook: WebhookSection,
    pub livestatus: Option<LiveStatusConfig>,
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_shutdown_deadline_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub database_url: String,
    #[serde(default = "default_identity_cache_capacity")]
    pub identity_cache_capacity: usize,
}

fn default_identity_cache_capacity() -> usize {
    canalchat_store::DEFAULT_CACHE_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub max_batch_size: usize,
    pub max_batch_age_secs: u64,
    pub max_backlog: usize,
    pub backpressure_block_ms: u64,
    pub commit_backoff_base_ms: u64,
    pub commit_backoff_max_secs: u64,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        let d = ArchiveConfig::default();
        ArchiveSection {
            max_batch_size: d.max_batch_size,
            max_batch_age_secs: d.max_batch_age.as_secs(),
            max_backlog: d.max_backlog,
            backpressure_block_ms: d.backpressure_block.as_millis() as u64,
            commit_backoff_base_ms: d.commit_backoff_base.as_millis() as u64,
            commit_backoff_max_secs: d.commit_backoff_max.as_secs(),
        }
    }
}

impl ArchiveSection {
    pub fn into_archive_config(self) -> ArchiveConfig {
        ArchiveConfig {
            max_batch_size: self.max_batch_size,
            max_batch_age: Duration::from_secs(self.max_batch_age_secs),
            max_backlog: self.max_backlog,
            backpressure_block: Duration::from_millis(self.backpressure_block_ms),
            commit_backoff_base: Duration::from_millis(self.commit_backoff_base_ms),
            commit_backoff_max: Duration::from_secs(self.commit_backoff_max_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub subscriber_buffer_size: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        BusSection {
            subscriber_buffer_size: BusConfig::default().subscriber_buffer_size,
        }
    }
}

impl BusSection {
    pub fn into_bus_config(self) -> BusConfig {
        BusConfig {
            subscriber_buffer_size: self.subscriber_buffer_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub outbound_buffer_size: usize,
    pub listen_addr: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        BrokerSection {
            outbound_buffer_size: canalchat_broker::BrokerConfig::default().outbound_buffer_size,
            listen_addr: "0.0.0.0:8088".to_string(),
        }
    }
}

impl BrokerSection {
    pub fn into_broker_config(self) -> canalchat_broker::BrokerConfig {
        canalchat_broker::BrokerConfig {
            outbound_buffer_size: self.outbound_buffer_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub per_url_rate_per_sec: u32,
    pub max_concurrent_deliveries: usize,
}

impl Default for WebhookSection {
    fn default() -> Self {
        let d = DispatcherConfig::default();
        WebhookSection {
            queue_capacity: d.queue_capacity,
            max_attempts: d.max_attempts,
            backoff_base_ms: d.backoff_base.as_millis() as u64,
            backoff_max_secs: d.backoff_max.as_secs(),
            per_url_rate_per_sec: d.per_url_rate_per_sec,
            max_concurrent_deliveries: d.max_concurrent_deliveries,
        }
    }
}

impl WebhookSection {
    pub fn into_dispatcher_config(self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            per_url_rate_per_sec: self.per_url_rate_per_sec,
            max_concurrent_deliveries: self.max_concurrent_deliveries,
        }
    }
}
