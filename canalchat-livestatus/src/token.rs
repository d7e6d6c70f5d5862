//! App access token holder with a background refresh loop. Grounded on
//! `plugin-twitch/src/plugin.rs`'s `WrappedToken`, swapped to
//! `parking_lot::Mutex` for consistency with the rest of this workspace.

use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use twitch_api2::twitch_oauth2::{AppAccessToken, ClientId, ClientSecret, TwitchToken};

pub struct WrappedToken {
    tok: Arc<Mutex<AppAccessToken>>,
    client_id: ClientId,
    client_secret: ClientSecret,
}

impl WrappedToken {
    pub async fn new(client_id: ClientId, client_secret: ClientSecret) -> anyhow::Result<Self> {
        let token = Self::get_token(client_id.clone(), client_secret.clone()).await?;
        Ok(WrappedToken {
            tok: Arc::new(Mutex::new(token)),
            client_id,
            client_secret,
        })
    }

    pub fn get(&self) -> AppAccessToken {
        self.tok.lock().clone()
    }

    async fn get_token(client_id: ClientId, client_secret: ClientSecret) -> anyhow::Result<AppAccessToken> {
        let auth_client = reqwest::Client::default();
        AppAccessToken::get_app_access_token(&auth_client, client_id, client_secret, vec![])
            .await
            .context("cannot get app access token")
    }

    /// Spawns a task that keeps the held token fresh, waking 60s before
    /// expiry. Refresh failures are logged, never propagated: the next
    /// poll tick will simply fail and retry with the stale token.
    pub fn spawn_refresh(&self) -> tokio::task::JoinHandle<()> {
        let tok = Arc::clone(&self.tok);
        let client_id = self.client_id.clone();
        let client_secret = self.client_secret.clone();
        tokio::spawn(async move {
            loop {
                let d = {
                    let remaining = tok.lock().expires_in();
                    remaining.saturating_sub(Duration::from_secs(60))
                };
                tokio::time::sleep(d).await;
                match Self::get_token(client_id.clone(), client_secret.clone()).await {
                    Ok(new_token) => {
                        log::info!("refreshed twitch app access token");
                        *tok.lock() = new_token;
                    }
                    Err(err) => {
                        log::error!("failed to refresh twitch app access token: {err:?}");
                    }
                }
            }
        })
    }
}
