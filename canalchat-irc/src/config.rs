use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    pub nickname: String,
    /// `oauth:...` token; `None` connects anonymously (read-only, no
    /// PRIVMSG capability, which is fine since this system never sends
    /// chat messages itself)
    pub oauth_password: Option<String>,
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    /// bound of the raw-frame handoff queue from the socket read loop
    /// to the Frame Parser (spec.md §4.2: "the session MUST NOT block
    /// the network read loop on downstream processing")
    #[serde(default = "default_frame_queue_size")]
    pub frame_queue_size: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

fn default_server() -> String {
    "irc.chat.twitch.tv".to_string()
}
fn default_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}
fn default_frame_queue_size() -> usize {
    4096
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_max_secs() -> u64 {
    30
}

impl IrcConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}
