use thiserror::Error;

/// Error type shared by every canalchat crate. Individual crates may
/// define their own narrower error enum at their boundary and convert
/// into this one at the point where they hand control back to a caller
/// in another crate (same shape as `plugin-core::Error` in the bot this
/// workspace grew out of).
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Synthetic(String),

    #[error("wrapped error from {ctx}: {source}")]
    Wrapped {
        source: Box<dyn std::error::Error + Send + Sync>,
        ctx: String,
    },

    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait WrapError<T> {
    fn wrap(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T, E> WrapError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn wrap(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Wrapped {
            source: Box::new(source),
            ctx: ctx.into(),
        })
    }
}
