#[macro_use]
extern crate anyhow;

mod config;
mod pipeline;
mod shutdown;

use anyhow::{Context, Result};
use canalchat_broker::{Broker, HealthStatus};
use canalchat_bus::Bus;
use canalchat_irc::IrcSession;
use canalchat_registry::ChannelRegistry;
use canalchat_store::{ArchiveBuffer, IdentityResolver};
use canalchat_webhook::{Dispatcher, WebhookRegistration};
use config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Opt {
    /// config file path (dhall), mirroring the teacher's
    /// `golem_config.dhall` convention
    #[structopt(long, default_value = "canalchat_config.dhall")]
    config: PathBuf,

    /// channels to join, in addition to the config file's list
    #[structopt(long)]
    channels: Vec<String>,

    /// overrides the config file's log level (e.g. "debug", "warn")
    #[structopt(long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    let config: AppConfig = serde_dhall::from_file(&opt.config)
        .parse()
        .with_context(|| format!("cannot load config from {:?}", opt.config))
        .map_err(init_error)?;

    init_logging(opt.log_level.as_deref().unwrap_or(&config.log_level));

    canalchat_store::run_migrations(&config.store.database_url)
        .context("cannot run store migrations")
        .map_err(init_error)?;
    let pool = canalchat_store::establish_pool(&config.store.database_url)
        .context("cannot connect to store")
        .map_err(init_error)?;

    let registry = Arc::new(ChannelRegistry::new());
    let resolver = Arc::new(IdentityResolver::new(
        pool.clone(),
        config.store.identity_cache_capacity,
    ));
    let bus = Bus::new(config.bus.clone().into_bus_config());
    let archive = ArchiveBuffer::spawn(
        pool.clone(),
        bus.clone(),
        config.archive.clone().into_archive_config(),
    );

    let initial_channels: Vec<String> = config
        .channels
        .iter()
        .chain(opt.channels.iter())
        .cloned()
        .collect();
    if initial_channels.is_empty() {
        return Err(init_error(anyhow!("no channels configured, aborting")));
    }
    for name in &initial_channels {
        // Per DESIGN.md's Open Question decision, the registry never
        // mints its own id for a channel the store already knows about:
        // resolve through the Identity Resolver first, then hand the
        // resolved row to the registry as-is.
        let channel = resolver
            .resolve_channel(name, None)
            .await
            .with_context(|| format!("cannot resolve channel {name:?}"))
            .map_err(init_error)?;
        registry.sync_resolved(channel);
    }
    log::info!("joining channel(s): {initial_channels:?}");

    let dispatcher = Dispatcher::new(config.webhook.clone().into_dispatcher_config());
    load_webhook_registrations(&pool, &dispatcher, &bus)
        .context("cannot load webhook registrations")
        .map_err(init_error)?;
    dispatcher.spawn_bus_consumer(bus.subscribe_global());

    let broker = Broker::new(config.broker.clone().into_broker_config());
    broker.spawn(bus.clone());
    let broker_addr: std::net::SocketAddr = config
        .broker
        .listen_addr
        .parse()
        .with_context(|| format!("invalid broker listen_addr {:?}", config.broker.listen_addr))
        .map_err(init_error)?;
    let router = broker.router(Arc::clone(&registry));
    tokio::spawn(async move {
        if let Err(e) = axum::Server::bind(&broker_addr)
            .serve(router.into_make_service())
            .await
        {
            log::error!("broker http server crashed: {e:#}");
        }
    });
    log::info!("broker listening on {broker_addr}");

    if let Some(livestatus_config) = config.livestatus.clone() {
        let poller = canalchat_livestatus::LiveStatusPoller::new(
            livestatus_config,
            Arc::clone(&registry),
            bus.clone(),
        )
        .await
        .context("cannot initialize live-status poller")
        .map_err(init_error)?;
        tokio::spawn(Arc::new(poller).run());
    } else {
        log::info!("no livestatus credentials configured, skipping C9");
    }

    let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(config.irc.frame_queue_size);
    let session = Arc::new(IrcSession::new(config.irc.clone(), (*registry).clone()));
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run(frame_tx).await });
    }
    let pipeline_stats = Arc::new(pipeline::PipelineStats::default());
    tokio::spawn(pipeline::run(
        frame_rx,
        Arc::clone(&resolver),
        Arc::clone(&archive),
        bus.clone(),
        Arc::clone(&pipeline_stats),
    ));

    spawn_health_monitor(pool.clone(), Arc::clone(&archive), broker.health());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    shutdown::run(archive, config.shutdown_deadline()).await;
    log::info!("shutdown complete");
    Ok(())
}

fn init_logging(level: &str) {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", level);
    }
    env_logger::init();
}

/// Init-time failures are fatal per spec.md §6's exit code contract
/// (bad config, store unreachable on boot -> exit code 1). `anyhow`'s
/// default `main` handler would print the error and return a generic
/// failure exit code; this makes the "1" explicit instead of
/// incidental.
fn init_error(err: anyhow::Error) -> anyhow::Error {
    log::error!("fatal init error: {err:#}");
    std::process::exit(1);
}

fn load_webhook_registrations(
    pool: &canalchat_store::Pool,
    dispatcher: &Arc<Dispatcher>,
    bus: &Bus,
) -> Result<()> {
    let rows = canalchat_store::webhook_store::list_webhook_registrations(pool)?;
    for row in rows {
        let filter = match serde_json::from_str(&row.filter_json) {
            Ok(filter) => filter,
            Err(e) => {
                log::error!("skipping webhook registration {}: bad filter_json: {e}", row.id);
                continue;
            }
        };
        let registration = WebhookRegistration::from_persisted(
            row.id,
            row.owner_id,
            filter,
            row.url,
            row.url_mask,
            row.enabled,
            row.muted,
            row.consecutive_failures.max(0) as u32,
            row.last_triggered_at
                .map(|ts| chrono::DateTime::<chrono::Utc>::from_utc(ts, chrono::Utc)),
            row.trigger_count.max(0) as u64,
        );
        dispatcher.register(registration, bus.clone());
    }
    Ok(())
}

/// Drives the broker's `/healthz` status (spec.md §7): degraded once the
/// archive has accumulated flush errors (it's stuck retrying against the
/// store, per §4.5's at-least-once model), unhealthy once the store
/// itself stops answering a trivial `pool.get()`.
fn spawn_health_monitor(
    pool: canalchat_store::Pool,
    archive: Arc<ArchiveBuffer>,
    health: Arc<canalchat_broker::HealthState>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        let mut last_flush_errors = 0u64;
        loop {
            interval.tick().await;
            let store_reachable = pool.get().is_ok();
            let stats = archive.stats();
            // persistent retry: flush_errors kept climbing since the
            // last tick while nothing has successfully flushed since.
            let persistent_retry = stats.flush_errors > last_flush_errors && stats.inflight > 0;
            last_flush_errors = stats.flush_errors;
            let status = canalchat_broker::compute_status(store_reachable, persistent_retry);
            if status != HealthStatus::Healthy {
                log::warn!("health status: {status:?}");
            }
            health.set(status);
        }
    });
}
