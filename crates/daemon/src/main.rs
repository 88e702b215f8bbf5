//! Ticketline daemon
//!
//! One client of the shared queue space: opens the local store replica,
//! binds the configured identity, resumes expiry timers for managed
//! locations and serves the JSON-RPC API until Ctrl+C.

mod config;
mod telemetry;

use anyhow::{Context, Result};
use config::{DaemonConfig, LogFormat};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ticketline_api_rpc::{RpcServer, RpcServerConfig};
use ticketline_core::application::{cancel_channel, QueueConfig, QueueDeps, QueueServices};
use ticketline_core::domain::Identity;
use ticketline_core::port::id_provider::UuidProvider;
use ticketline_core::port::time_provider::SystemTimeProvider;
use ticketline_core::port::{NotificationTransport, SessionIdentity, TimeProvider};
use ticketline_infra_push::{HttpPushTransport, LogOnlyTransport};
use ticketline_infra_sqlite::{database_url, SqliteStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("ticketline=info"))
        .context("Failed to create env filter")?;

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry::layer()?);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
    Ok(())
}

fn push_transport(config: &DaemonConfig) -> Result<Arc<dyn NotificationTransport>> {
    match &config.push_relay_url {
        Some(url) => {
            info!(relay_url = %url, "Push notifications via relay");
            let transport = HttpPushTransport::new(url.clone())
                .map_err(|e| anyhow::anyhow!("Push transport setup failed: {}", e))?;
            Ok(Arc::new(transport))
        }
        None => {
            info!("No push relay configured, notifications are only logged");
            Ok(Arc::new(LogOnlyTransport::new()))
        }
    }
}

/// Start expiry timers for every auto-serve location this identity manages
async fn resume_expiry_timers(services: &QueueServices) -> usize {
    let locations = match services.registry.my_locations().await {
        Ok(locations) => locations,
        Err(e) => {
            warn!(error = %e, "Could not list managed locations, no expiry timers started");
            return 0;
        }
    };

    let mut started = 0;
    for location in locations.iter().filter(|l| l.auto_serve_enabled()) {
        match services.expiry.start(&location.id).await {
            Ok(()) => started += 1,
            Err(e) => warn!(location_id = %location.id, error = %e, "Expiry timer not started"),
        }
    }
    started
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    init_logging(config.log_format)?;

    info!("Ticketline v{} starting...", VERSION);

    // 2. Store replica
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    info!(db_path = %config.db_path.display(), "Opening store...");

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(
        SqliteStore::connect(&database_url(&config.db_path), Arc::clone(&time_provider))
            .await
            .map_err(|e| anyhow::anyhow!("Store setup failed: {}", e))?,
    );

    // 3. Session identity
    let session = Arc::new(match &config.identity {
        Some(public_id) => SessionIdentity::bound(Identity::new(public_id.clone())),
        None => SessionIdentity::new(),
    });

    // 4. Use cases (DI wiring)
    let deps = QueueDeps {
        store: store.clone(),
        identity: session.clone(),
        transport: push_transport(&config)?,
        time_provider,
        id_provider: Arc::new(UuidProvider),
    };
    let queue_config = QueueConfig::default().with_expiry_tick(config.expiry_tick);
    let services = Arc::new(QueueServices::new(deps, queue_config));

    if let (Some(_), Some(name)) = (&config.identity, &config.display_name) {
        if let Err(e) = services.profile.set_display_name(name).await {
            warn!(error = %e, "Failed to store display name");
        }
    }

    // 5. Cross-process change delivery
    let (stop_poller, poller_token) = cancel_channel();
    let poller = store.spawn_change_poller(config.poll_interval, poller_token);

    // 6. Expiry timers for managed locations
    if config.identity.is_some() {
        let started = resume_expiry_timers(&services).await;
        info!(timers = started, "Expiry timers resumed");
    }

    // 7. JSON-RPC server
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
        op_timeout: config.op_timeout,
    };
    let (addr, rpc_handle) = RpcServer::new(rpc_config, services.clone(), session)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown
    services.expiry.stop_all();
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server stop failed");
    }
    stop_poller.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, poller).await.is_err() {
        warn!("Change poller did not stop in time");
    }
    telemetry::shutdown();

    info!("Shutdown complete.");

    Ok(())
}
