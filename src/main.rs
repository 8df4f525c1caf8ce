//! MarketPulse backend entry point. Thin binary: load config, open the
//! store, spawn the background components (ingestion sessions, Batch
//! Writer, Arbitrage Scanner, Relationship Classifier), then serve the
//! dashboard API until shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketpulse_backend::arbitrage::scanner::ArbitrageScanner;
use marketpulse_backend::batch_writer::BatchWriter;
use marketpulse_backend::classifier::RelationshipClassifier;
use marketpulse_backend::ingest;
use marketpulse_backend::llm::AnalystClient;
use marketpulse_backend::models::Config;
use marketpulse_backend::scenario::ScenarioEngine;
use marketpulse_backend::store::Store;
use marketpulse_backend::{build_router, AppState};

/// Grace period for in-flight `/api/scenario` requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!("market pulse backend starting on port {}", config.port);

    let store = Arc::new(Store::open(&config.database_path).context("failed to open store")?);
    let llm = AnalystClient::from_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (quote_rx, ingest_handles) = ingest::spawn_sessions(&config, shutdown_rx.clone());

    let batch_writer = BatchWriter::new(store.clone(), config.batch_size, config.batch_flush_interval_ms);
    let batch_writer_handle = tokio::spawn(batch_writer.clone().run(quote_rx, shutdown_rx.clone()));

    let scanner = ArbitrageScanner::new(store.clone(), &config);
    let scanner_handle = tokio::spawn(scanner.run(shutdown_rx.clone()));

    let classifier = Arc::new(RelationshipClassifier::new(
        store.clone(),
        llm.clone(),
        config.classifier_concurrency,
        config.divergence_threshold_pct,
        config.arbitrage_flag_threshold_pct,
        config.hub_link_threshold,
    ));
    let classifier_handle = {
        let classifier = classifier.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                match classifier.run().await {
                    Ok(count) => info!(pairs = count, "relationship classifier: sweep complete"),
                    Err(e) => warn!(error = %e, "relationship classifier: sweep failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_ok() && *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    };

    let scenario_engine = Arc::new(ScenarioEngine::new(store.clone(), llm, &config));

    let app_state = AppState {
        store: store.clone(),
        scenario_engine,
        hub_link_threshold: config.hub_link_threshold,
        active_scenarios: Arc::new(AtomicU64::new(0)),
    };

    let app = build_router(app_state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("api server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown signal received, stopping ingestion and timers");
    let _ = shutdown_tx.send(true);

    for handle in ingest_handles {
        let _ = handle.await;
    }
    let _ = scanner_handle.await;
    classifier_handle.abort();
    let _ = batch_writer_handle.await;

    let grace_deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while app_state.active_scenarios.load(Ordering::SeqCst) > 0 {
        if tokio::time::Instant::now() >= grace_deadline {
            warn!("shutdown grace period elapsed with scenario requests still in flight");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketpulse_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
