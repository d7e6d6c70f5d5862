use thiserror::Error;

/// Store-boundary error enum, mirroring the teacher's
/// `plugin_core::Error` / `twitch::errors::TwitchError` split: narrow
/// enum at the crate boundary, converted to `canalchat_core::Error` (or
/// `anyhow::Error` at the composition root) by callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("identity resolution race could not be resolved after retry for {what}: {source}")]
    IdentityRace {
        what: String,
        #[source]
        source: diesel::result::Error,
    },

    #[error("identity resolution task for {what} panicked: {source}")]
    IdentityTaskPanicked {
        what: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
