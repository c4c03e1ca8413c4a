//! meshlinkd — mesh router link daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use meshlink_core::MeshlinkConfig;
use meshlink_services::{
    CloseNotify, ControllerSet, CtrlHandler, LinkRegistry, Pool, RegistryEnv, SharedDialer,
    SharedLink, UsageRegistry, WorkerPool,
};

mod status;
mod transport;

use transport::dialer::TcpDialer;
use transport::listener::LinkListener;
use transport::LinkContext;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshlinkConfig::default()
    });
    config.validate().context("invalid configuration")?;

    if config.router.id.is_empty() {
        let id = uuid::Uuid::new_v4().simple().to_string();
        config.router.id = format!("router-{}", &id[..8]);
        tracing::warn!(router_id = %config.router.id, "no router id configured, generated one");
    }
    tracing::info!(
        router_id = %config.router.id,
        version = %config.router.version,
        "meshlinkd starting"
    );

    // Shared state
    let close = CloseNotify::new();
    let metrics = Arc::new(UsageRegistry::new());
    let ctrls = Arc::new(ControllerSet::new(config.links.notify_send_timeout()));

    let dialer_pool = Arc::new(WorkerPool::new(
        "link.dialer",
        config.pools.dialer_workers,
        config.pools.dialer_queue,
    ));
    let rate_limiter_pool = Arc::new(WorkerPool::new(
        "link.rate_limiter",
        config.pools.rate_limiter_workers,
        config.pools.rate_limiter_queue,
    ));

    // Links report themselves here when they go down
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<SharedLink>();
    let ctx = LinkContext {
        metrics: metrics.clone(),
        closed_tx,
    };

    let dialer: SharedDialer = Arc::new(TcpDialer::new(
        &config.dialer,
        &config.router.id,
        &config.router.version,
        ctx.clone(),
    ));

    let registry = LinkRegistry::new(RegistryEnv {
        router_id: config.router.id.clone(),
        ctrls,
        dialers: vec![dialer],
        dialer_pool: dialer_pool.clone() as Arc<dyn Pool>,
        rate_limiter_pool: rate_limiter_pool.clone() as Arc<dyn Pool>,
        metrics,
        close: close.clone(),
        config: config.links.clone(),
    });

    registry
        .load_config(&toml::Table::new())
        .context("link registry rejected its config")?;
    if registry.enabled() {
        registry.run().context("failed to start link registry")?;
    }

    {
        let registry = registry.clone();
        tokio::spawn(async move {
            while let Some(link) = closed_rx.recv().await {
                registry.link_closed(link);
            }
        });
    }

    // ── Listeners ────────────────────────────────────────────────────────────

    for listener_config in config.listeners.clone() {
        let listener = LinkListener::bind(listener_config, registry.clone(), ctx.clone(), close.clone()).await?;
        tokio::spawn(listener.run());
    }

    // ── Static destinations ──────────────────────────────────────────────────

    for dest in &config.destinations {
        if dest.id.is_empty() {
            tracing::warn!("skipping configured destination without id");
            continue;
        }
        tracing::info!(dest = %dest.id, listeners = dest.listeners.len(), "adding configured destination");
        registry.update_link_destination(&dest.id, &dest.version, true, dest.listeners.clone());
    }

    // ── Local API ────────────────────────────────────────────────────────────

    let api_port = config.api.port;
    let api_task = {
        let state = status::StatusState {
            registry: registry.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        }
        r = api_task => tracing::error!("status server exited: {:?}", r),
    }

    close.close();
    registry.shutdown();
    dialer_pool.shutdown();
    rate_limiter_pool.shutdown();
    tracing::info!("meshlinkd stopped");

    Ok(())
}
