//! Webhook Dispatcher (C8): lets registered destinations receive a
//! filtered, retried, rate-limited stream of archive events as HTTP
//! POSTs. See spec.md §4.8, §6 (body shape) and §7 (health/auto-mute).

mod body;
mod dispatcher;
mod error;
mod matcher;
mod registration;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Result, WebhookError};
pub use registration::{WebhookFilter, WebhookRegistration, AUTO_MUTE_THRESHOLD};
