//! Scenario Engine: an on-demand request-response workflow —
//! parse a shock, traverse the relationship graph, build a retrieval
//! context, and ask the analyst model for a narrative.

pub mod graph;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{extract_json, AnalystClient};
use crate::models::{
    CausalStep, Config, Direction, Market, ScenarioReport, ScenarioStatus,
};
use crate::pricing::{demo_probability_table, resolve_probability_pct};
use crate::store::Store;

const SHOCK_PARSE_PROMPT: &str = r#"You identify the prediction market most directly shocked by a natural-language event. Given a catalog of markets and a user query, you must always return a market (never "no match") — if the query is geopolitical, pick the most economically downstream market in the catalog. Return a single JSON object: {"target_market": <market_key>, "assumed_change": <at most 15 words>, "direction": "UP"|"DOWN"}. Return JSON only."#;

const NARRATIVE_PROMPT: &str = r#"You are a senior prediction-market analyst. Given a scenario and a list of impacted markets with their causal relationships, write a concise executive summary and a one-line statement per impact. Return a single JSON object: {"executive_summary": <text>, "market_impacts": [{"market_key": <key>, "order": <int>, "direction": "UP"|"DOWN", "confidence_pct": <number>, "statement": <text>}]}. Each statement must follow: "If [A] moves [UP/DOWN], then [B] is [X]% likely to move [Y] because of their [relationship_type] link." Return JSON only."#;

#[derive(Debug, Deserialize)]
struct ShockParse {
    target_market: String,
    assumed_change: String,
    direction: String,
}

#[derive(Debug, Serialize)]
struct ShockParsePayload<'a> {
    query: &'a str,
    catalog: Vec<CatalogEntryPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct CatalogEntryPayload<'a> {
    market_key: &'a str,
    event_name: &'a str,
    proposition_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct NarrativeResponse {
    executive_summary: String,
    market_impacts: Vec<NarrativeImpact>,
}

#[derive(Debug, Deserialize)]
struct NarrativeImpact {
    #[allow(dead_code)]
    market_key: String,
    #[allow(dead_code)]
    order: u32,
    #[allow(dead_code)]
    direction: String,
    #[allow(dead_code)]
    confidence_pct: f64,
    statement: String,
}

#[derive(Debug, Serialize)]
struct RagContext<'a> {
    scenario: RagScenario<'a>,
    impacted_markets: Vec<RagImpact<'a>>,
}

#[derive(Debug, Serialize)]
struct RagScenario<'a> {
    target_market: &'a str,
    event_name: &'a str,
    proposition_text: &'a str,
    assumed_change: &'a str,
    direction: &'a str,
    current_probability_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RagImpact<'a> {
    market_key: &'a str,
    event_name: &'a str,
    proposition_text: &'a str,
    order_label: &'static str,
    relationship_type: &'static str,
    direction: &'static str,
    cumulative_confidence_pct: f64,
    current_probability_pct: Option<f64>,
    causal_path: &'a [String],
    justification: &'a str,
    insight: &'a str,
}

pub struct ScenarioEngine {
    store: Arc<Store>,
    llm: AnalystClient,
    max_depth: u32,
    min_path_confidence: f64,
}

impl ScenarioEngine {
    pub fn new(store: Arc<Store>, llm: AnalystClient, config: &Config) -> Self {
        Self {
            store,
            llm,
            max_depth: config.scenario_max_depth,
            min_path_confidence: config.scenario_min_path_confidence,
        }
    }

    pub async fn handle_query(&self, query: String) -> anyhow::Result<ScenarioReport> {
        let id = Uuid::new_v4().to_string();
        self.store.create_pending_scenario(&id, &query)?;

        match self.run(&id, &query).await {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::warn!(error = %e, scenario_id = %id, "scenario_engine: request failed");
                self.store.fail_scenario(&id)?;
                Ok(ScenarioReport {
                    id,
                    query,
                    trigger_market: None,
                    causal_chain: Vec::new(),
                    narrative: Some(format!("Scenario failed: {e}")),
                    affected_nodes: Vec::new(),
                    affected_edges: Vec::new(),
                    status: ScenarioStatus::Failed,
                    created_at: chrono::Utc::now(),
                })
            }
        }
    }

    async fn run(&self, id: &str, query: &str) -> anyhow::Result<ScenarioReport> {
        let catalog = self.store.get_catalog()?;
        let relationships = self.store.get_all_relationships()?;
        let demo_table = demo_probability_table();

        let identifiers: Vec<String> = catalog
            .iter()
            .filter_map(|m| m.preferred_identifier().map(String::from))
            .collect();
        let live = self.store.latest_quotes_by_identifiers(&identifiers)?;

        let price_map: HashMap<String, f64> = catalog
            .iter()
            .filter_map(|m| {
                resolve_probability_pct(m, &live, &demo_table).map(|(pct, _)| (m.market_key.clone(), pct))
            })
            .collect();

        let by_key: HashMap<&str, &Market> =
            catalog.iter().map(|m| (m.market_key.as_str(), m)).collect();

        let shock = self.parse_shock(query, &catalog).await?;
        let direction = Direction::parse(&shock.direction).unwrap_or(Direction::Up);

        if !by_key.contains_key(shock.target_market.as_str()) {
            tracing::warn!(target = %shock.target_market, "scenario_engine: target market not found in catalog");
        }

        let impacts = graph::traverse(
            &shock.target_market,
            &relationships,
            direction,
            self.max_depth,
            self.min_path_confidence,
        );

        let narrative = if impacts.is_empty() {
            "No connected markets were found within the traversal depth; this shock has no modeled downstream impact.".to_string()
        } else {
            self.build_narrative(&shock, &by_key, &price_map, &impacts).await?
        };

        let affected_nodes = graph::affected_nodes(&impacts);
        let affected_edges = graph::affected_edges(&impacts);

        let report = ScenarioReport {
            id: id.to_string(),
            query: query.to_string(),
            trigger_market: Some(shock.target_market.clone()),
            causal_chain: impacts,
            narrative: Some(narrative),
            affected_nodes,
            affected_edges,
            status: ScenarioStatus::Complete,
            created_at: chrono::Utc::now(),
        };

        self.store.complete_scenario(&report)?;
        Ok(report)
    }

    async fn parse_shock(&self, query: &str, catalog: &[Market]) -> anyhow::Result<ShockParse> {
        let payload = ShockParsePayload {
            query,
            catalog: catalog
                .iter()
                .map(|m| CatalogEntryPayload {
                    market_key: &m.market_key,
                    event_name: &m.event_name,
                    proposition_text: &m.proposition_text,
                })
                .collect(),
        };
        let user_content = serde_json::to_string(&payload)?;
        let response_text = self.llm.complete(SHOCK_PARSE_PROMPT, &user_content).await?;
        extract_json(&response_text)
            .ok_or_else(|| anyhow::anyhow!("could not parse shock from analyst model response"))
    }

    async fn build_narrative(
        &self,
        shock: &ShockParse,
        by_key: &HashMap<&str, &Market>,
        price_map: &HashMap<String, f64>,
        impacts: &[CausalStep],
    ) -> anyhow::Result<String> {
        let target = by_key.get(shock.target_market.as_str());

        let rag = RagContext {
            scenario: RagScenario {
                target_market: &shock.target_market,
                event_name: target.map(|m| m.event_name.as_str()).unwrap_or(""),
                proposition_text: target.map(|m| m.proposition_text.as_str()).unwrap_or(""),
                assumed_change: &shock.assumed_change,
                direction: shock.direction.as_str(),
                current_probability_pct: price_map.get(&shock.target_market).copied(),
            },
            impacted_markets: impacts
                .iter()
                .map(|impact| {
                    let market = by_key.get(impact.market_key.as_str());
                    RagImpact {
                        market_key: &impact.market_key,
                        event_name: market.map(|m| m.event_name.as_str()).unwrap_or(""),
                        proposition_text: market.map(|m| m.proposition_text.as_str()).unwrap_or(""),
                        order_label: order_label(impact.propagation_order),
                        relationship_type: impact.relationship_type.as_str(),
                        direction: impact.direction.as_str(),
                        cumulative_confidence_pct: impact.cumulative_confidence * 100.0,
                        current_probability_pct: price_map.get(&impact.market_key).copied(),
                        causal_path: &impact.path,
                        justification: &impact.justification,
                        insight: &impact.insight,
                    }
                })
                .collect(),
        };

        let user_content = serde_json::to_string(&rag)?;
        let response_text = self.llm.complete(NARRATIVE_PROMPT, &user_content).await?;
        let parsed: NarrativeResponse = extract_json(&response_text)
            .ok_or_else(|| anyhow::anyhow!("could not parse narrative from analyst model response"))?;

        let mut narrative = parsed.executive_summary;
        for impact in &parsed.market_impacts {
            narrative.push(' ');
            narrative.push_str(&impact.statement);
        }
        Ok(narrative)
    }
}

fn order_label(order: u32) -> &'static str {
    match order {
        1 => "first-order",
        2 => "second-order",
        _ => "downstream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_label_matches_propagation_depth() {
        assert_eq!(order_label(1), "first-order");
        assert_eq!(order_label(2), "second-order");
    }
}
