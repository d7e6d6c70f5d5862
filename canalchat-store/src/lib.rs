//! Identity Resolver (C4) and Archive Buffer (C5): Diesel/SQLite
//! persistence, full-text search over message text, and at-least-once
//! batched writes. See spec.md §4.4/§4.5.

#[macro_use]
extern crate diesel;

pub mod archive;
pub mod conn;
pub mod error;
pub mod identity;
pub mod models;
pub mod schema;
pub mod search;
pub mod webhook_store;

pub use archive::{ArchiveBuffer, ArchiveConfig, ArchiveStats};
pub use conn::{establish_pool, run_migrations, Pool};
pub use error::{Result, StoreError};
pub use identity::{IdentityResolver, DEFAULT_CACHE_CAPACITY};
