//! Domain types, error plumbing, and small shared utilities used across
//! every canalchat crate.

pub mod backoff;
pub mod error;
pub mod event;
pub mod types;

pub use backoff::Backoff;
pub use error::{Error, Result, WrapError};
pub use event::{ChatMessageEvent, Event};
pub use types::*;
