use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LiveStatusConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl LiveStatusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
