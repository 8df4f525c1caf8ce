//! Dashboard-facing HTTP handlers: `GET /health`,
//! `GET /api/graph-data`, `POST /api/scenario`, `GET /api/scenarios`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;

use axum::{
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::models::{RelationshipType, ScenarioReport};
use crate::pricing::{demo_probability_table, resolve_probability_pct};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct GraphNode {
    pub market_key: String,
    pub event_name: String,
    pub proposition_text: String,
    pub current_probability_pct: Option<f64>,
    pub is_demo_priced: bool,
}

#[derive(Debug, Serialize)]
pub struct GraphEdge {
    pub market_key_a: String,
    pub market_key_b: String,
    pub relationship_type: RelationshipType,
    pub confidence_score: f64,
    pub probability_spread: Option<f64>,
    pub arbitrage_flag: Option<String>,
    pub risk_alert: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GraphMeta {
    pub total_markets: usize,
    pub total_relationships: usize,
    pub hub_nodes: Vec<String>,
    pub arbitrage_flag_count: usize,
    pub divergence_count: usize,
}

#[derive(Debug, Serialize)]
pub struct GraphDataResponse {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub meta: GraphMeta,
}

/// Catalog + relationships + latest-per-identifier probability joined into
/// nodes and edges, with a summary `meta` block.
pub async fn get_graph_data(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<GraphDataResponse>, StatusCode> {
    let catalog = state.store.get_catalog().map_err(internal_error)?;
    let relationships = state.store.get_all_relationships().map_err(internal_error)?;

    let demo_table = demo_probability_table();
    let identifiers: Vec<String> = catalog
        .iter()
        .filter_map(|m| m.preferred_identifier().map(String::from))
        .collect();
    let live = state
        .store
        .latest_quotes_by_identifiers(&identifiers)
        .map_err(internal_error)?;

    let nodes: Vec<GraphNode> = catalog
        .iter()
        .map(|m| {
            let resolved = resolve_probability_pct(m, &live, &demo_table);
            GraphNode {
                market_key: m.market_key.clone(),
                event_name: m.event_name.clone(),
                proposition_text: m.proposition_text.clone(),
                current_probability_pct: resolved.map(|(pct, _)| pct),
                is_demo_priced: resolved.map(|(_, demo)| demo).unwrap_or(false),
            }
        })
        .collect();

    let mut hub_counts: HashMap<String, usize> = HashMap::new();
    for rel in &relationships {
        if matches!(
            rel.relationship_type,
            RelationshipType::Implied | RelationshipType::Correlated
        ) {
            *hub_counts.entry(rel.market_key_a.clone()).or_insert(0) += 1;
            *hub_counts.entry(rel.market_key_b.clone()).or_insert(0) += 1;
        }
    }
    let mut hub_nodes: HashSet<String> = HashSet::new();
    for (market_key, count) in &hub_counts {
        if *count > state.hub_link_threshold {
            hub_nodes.insert(market_key.clone());
        }
    }
    let mut hub_nodes: Vec<String> = hub_nodes.into_iter().collect();
    hub_nodes.sort();

    let arbitrage_flag_count = relationships
        .iter()
        .filter(|r| r.arbitrage_flag.is_some())
        .count();
    let divergence_count = relationships
        .iter()
        .filter(|r| r.risk_alert.as_deref() == Some("venue_divergence"))
        .count();

    let edges: Vec<GraphEdge> = relationships
        .iter()
        .map(|r| GraphEdge {
            market_key_a: r.market_key_a.clone(),
            market_key_b: r.market_key_b.clone(),
            relationship_type: r.relationship_type,
            confidence_score: r.confidence_score,
            probability_spread: r.probability_spread,
            arbitrage_flag: r.arbitrage_flag.clone(),
            risk_alert: r.risk_alert.clone(),
        })
        .collect();

    Ok(Json(GraphDataResponse {
        meta: GraphMeta {
            total_markets: nodes.len(),
            total_relationships: edges.len(),
            hub_nodes,
            arbitrage_flag_count,
            divergence_count,
        },
        nodes,
        edges,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScenarioRequest {
    pub query: String,
}

/// Runs the Scenario Engine synchronously and returns the completed (or
/// failed) report.
pub async fn post_scenario(
    AxumState(state): AxumState<AppState>,
    Json(request): Json<ScenarioRequest>,
) -> Result<Json<ScenarioReport>, StatusCode> {
    if request.query.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    state.active_scenarios.fetch_add(1, Ordering::SeqCst);
    let result = state.scenario_engine.handle_query(request.query).await;
    state.active_scenarios.fetch_sub(1, Ordering::SeqCst);

    let report = result.map_err(internal_error)?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ScenariosQuery {
    pub limit: Option<usize>,
}

pub async fn get_scenarios(
    Query(params): Query<ScenariosQuery>,
    AxumState(state): AxumState<AppState>,
) -> Result<Json<Vec<ScenarioReport>>, StatusCode> {
    let limit = params.limit.unwrap_or(50);
    let reports = state.store.list_scenarios(limit).map_err(internal_error)?;
    Ok(Json(reports))
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    tracing::warn!(error = %e, "api: request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_ok() {
        let Json(response) = health_check().await;
        assert_eq!(response.status, "ok");
    }
}
