use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook delivery url must be https, got: {0}")]
    NotHttps(String),

    #[error("webhook delivery url is not a valid url: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
