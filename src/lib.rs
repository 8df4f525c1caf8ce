//! MarketPulse backend library. The binary (`src/main.rs`) is a thin
//! wrapper that wires `Config::from_env()`, builds `AppState`, spawns the
//! background components, and serves the router this crate assembles.

pub mod api;
pub mod arbitrage;
pub mod batch_writer;
pub mod classifier;
pub mod ingest;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod pricing;
pub mod scenario;
pub mod store;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::scenario::ScenarioEngine;
use crate::store::Store;

/// Shared application state: a plain `Clone` struct of `Arc`-wrapped
/// components passed to `axum::Router::with_state`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub scenario_engine: Arc<ScenarioEngine>,
    pub hub_link_threshold: usize,
    /// Count of in-flight `/api/scenario` requests, polled during shutdown
    /// to honor the grace period before the process exits.
    pub active_scenarios: Arc<AtomicU64>,
}

/// Assembles the dashboard-facing router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/api/graph-data", get(api::get_graph_data))
        .route("/api/scenario", post(api::post_scenario))
        .route("/api/scenarios", get(api::get_scenarios))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_simple,
        ))
        .with_state(state)
}
