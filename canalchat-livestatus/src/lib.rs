//! Live-status collaborator (C9): polls Helix for the active channel
//! set's online/offline state and game, publishing transitions onto
//! the bus. Deliberately thin and external: unlike the other
//! components it owns no persisted state of its own, only an
//! in-process last-known-online map used to detect transitions.

mod config;
mod poller;
mod token;

pub use config::LiveStatusConfig;
pub use poller::LiveStatusPoller;
