//! IRC Session (C2): owns the connection to Twitch IRC, authenticates,
//! keeps the joined-channel set in sync with the Channel Registry, and
//! hands off raw frames to whoever is downstream. See spec.md §4.2.

use crate::config::IrcConfig;
use crate::frame::RawFrame;
use canalchat_core::backoff::Backoff;
use canalchat_registry::{ChannelRegistry, Intent};
use futures::prelude::*;
use irc::client::prelude::Config as IrcLibConfig;
use irc::client::Client;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

pub struct IrcSession {
    config: IrcConfig,
    registry: ChannelRegistry,
    state: Arc<Mutex<SessionState>>,
    dropped_frames: Arc<AtomicU64>,
}

impl IrcSession {
    pub fn new(config: IrcConfig, registry: ChannelRegistry) -> Self {
        IrcSession {
            config,
            registry,
            state: Arc::new(Mutex::new(SessionState::Disconnected)),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// count of raw frames dropped because the handoff queue to the
    /// Frame Parser was full (spec.md §4.2: loss is preferable to
    /// stalling the socket read loop)
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Runs forever, reconnecting with jittered exponential backoff on
    /// any connection failure (spec.md §4.2: "the session MUST NOT give
    /// up; a disconnect is always followed by a reconnect attempt").
    /// Frames are pushed onto `out` as they arrive; the caller owns the
    /// receiving end (normally the Frame Parser).
    pub async fn run(&self, out: mpsc::Sender<RawFrame>) -> ! {
        let mut backoff = Backoff::new(self.config.backoff_base(), self.config.backoff_max());
        loop {
            match self.run_once(&out, &mut backoff).await {
                Ok(()) => {
                    log::warn!("irc stream ended cleanly, reconnecting");
                }
                Err(e) => {
                    log::error!("irc session error: {e:#}, reconnecting");
                }
            }
            self.set_state(SessionState::Disconnected);
            let delay = backoff.next_delay();
            log::info!("reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_once(
        &self,
        out: &mpsc::Sender<RawFrame>,
        backoff: &mut Backoff,
    ) -> anyhow::Result<()> {
        let irc_config = IrcLibConfig {
            nickname: Some(self.config.nickname.clone()),
            server: Some(self.config.server.clone()),
            port: Some(self.config.port),
            use_tls: Some(self.config.use_tls),
            password: self.config.oauth_password.clone(),
            ..IrcLibConfig::default()
        };

        self.set_state(SessionState::Connecting);
        let client = Client::from_config(irc_config).await?;

        self.set_state(SessionState::Authenticating);
        self.authenticate(&client)?;

        self.set_state(SessionState::Connected);
        let mut joined: HashSet<String> = HashSet::new();
        let mut intents = self.registry.watch_changes();
        let mut stream = client.stream()?;
        let mut seen_first_frame = false;

        loop {
            tokio::select! {
                biased;

                maybe_intent = intents.recv() => {
                    match maybe_intent {
                        Some(Intent::Join(name)) => self.apply_join(&client, &mut joined, &name)?,
                        Some(Intent::Part(name)) => self.apply_part(&client, &mut joined, &name)?,
                        None => return Err(anyhow::anyhow!("channel registry intent stream closed")),
                    }
                }

                maybe_msg = stream.next() => {
                    let irc_message = match maybe_msg {
                        Some(result) => result?,
                        None => return Err(anyhow::anyhow!("irc stream ended")),
                    };
                    if !seen_first_frame {
                        // first frame after connect proves the link is healthy
                        seen_first_frame = true;
                        backoff.reset();
                    }
                    let frame = RawFrame::from_irc_message(&irc_message);
                    // never block the socket read loop on downstream processing
                    // (spec.md §4.2): a full queue means we drop, not stall.
                    match out.try_send(frame) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            let n = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                            log::warn!("frame parser queue full, dropping frame (total dropped: {n})");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            return Err(anyhow::anyhow!("frame parser channel closed"));
                        }
                    }
                }
            }
        }
    }

    fn authenticate(&self, client: &Client) -> anyhow::Result<()> {
        match &self.config.oauth_password {
            None => {
                log::info!("no oauth password configured, connecting anonymously");
            }
            Some(_password) => {
                log::info!("authenticating with SASL PLAIN");
                client.send_cap_req(&[irc::proto::Capability::Sasl])?;
                client.send_sasl_plain()?;
                let nick = client.current_nickname();
                // the oauth password itself is the SASL password; Twitch
                // ignores the account-name field so nick is repeated
                let sasl_password = self
                    .config
                    .oauth_password
                    .as_deref()
                    .unwrap_or_default()
                    .trim_start_matches("oauth:");
                let sasl_str = base64::encode(format!("{nick}\0{nick}\0{sasl_password}"));
                client.send(irc::proto::Command::AUTHENTICATE(sasl_str))?;
            }
        }
        // commands-capability and membership-capability requests let
        // frames carry tags (badges, bits, msg-id) and JOIN/PART events
        client.send_cap_req(&[
            irc::proto::Capability::Custom("twitch.tv/tags"),
            irc::proto::Capability::Custom("twitch.tv/commands"),
            irc::proto::Capability::Custom("twitch.tv/membership"),
        ])?;
        client.identify()?;
        Ok(())
    }

    fn apply_join(
        &self,
        client: &Client,
        joined: &mut HashSet<String>,
        name: &str,
    ) -> anyhow::Result<()> {
        if joined.contains(name) {
            // the registry believes this channel needs (re)joining even
            // though our own bookkeeping says we already are -- the
            // upstream may have silently dropped it, so confirm via the
            // idempotent rejoin rather than treating this as a no-op.
            return self.rejoin(client, joined, name);
        }
        client.send_join(format!("#{name}"))?;
        joined.insert(name.to_string());
        Ok(())
    }

    fn apply_part(
        &self,
        client: &Client,
        joined: &mut HashSet<String>,
        name: &str,
    ) -> anyhow::Result<()> {
        if !joined.remove(name) {
            return Ok(());
        }
        client.send(irc::proto::Command::PART(format!("#{name}"), None))?;
        Ok(())
    }

    /// Idempotent: issues PART then JOIN regardless of whether PART was
    /// acknowledged (spec.md §4.2). Useful when the upstream has
    /// silently dropped a channel from the session's membership, unlike
    /// `apply_join`/`apply_part` which trust `joined`'s own bookkeeping.
    fn rejoin(&self, client: &Client, joined: &mut HashSet<String>, name: &str) -> anyhow::Result<()> {
        client.send(irc::proto::Command::PART(format!("#{name}"), None))?;
        client.send_join(format!("#{name}"))?;
        joined.insert(name.to_string());
        Ok(())
    }
}
