use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use labdesk::config::Config;
use labdesk::lab::Lab;
use labdesk::notify::NotifyHub;
use labdesk::seed::{self, Catalog};
use labdesk::store::DurableStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    labdesk::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(DurableStore::open(&config.wal_path())?);
    let notify = Arc::new(NotifyHub::new());
    let lab = Lab::new(store.clone(), notify.clone(), config.lab_hours());

    if let Some(path) = &config.seed_file {
        let catalog = Catalog::load(path)?;
        seed::apply(&lab, catalog).await?;
    }

    let stats = store.stats().await;
    info!("labdesk ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  utc_offset_minutes: {}", config.utc_offset_minutes);
    info!(
        "  catalog: {} items, {} resources; {} reservations, {} loan requests",
        stats.items, stats.resources, stats.reservations, stats.loan_requests
    );
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let compactor_store = store.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        labdesk::compactor::run_compactor(compactor_store, threshold).await;
    });

    let mut refreshes = notify.subscribe_all();
    tokio::spawn(async move {
        loop {
            match refreshes.recv().await {
                Ok(signal) => debug!(subject = ?signal.subject, op = signal.op, "refresh"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("refresh log lagged by {n} signals")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    match store.compact().await {
        Ok(events) => info!(events, "compacted WAL on shutdown"),
        Err(e) => warn!("WAL compaction on shutdown failed: {e}"),
    }
    info!("labdesk stopped");
    Ok(())
}
