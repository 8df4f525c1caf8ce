//! Relationship Classifier: a one-shot, catalog-wide pairwise
//! classification workflow over the analyst model, bounded in concurrency
//! with a semaphore-gated fan-out rather than a sequential loop, since
//! pairs are independent.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::llm::{extract_json, AnalystClient};
use crate::models::{
    CorrelationStrength, ImpactDirection, LogicalLayer, Market, Relationship, RelationshipType,
};
use crate::pricing::{demo_probability_table, resolve_probability_pct};
use crate::store::Store;

const SYSTEM_PROMPT: &str = r#"You are a prediction-market relationship classifier. Given two markets and their current probabilities, reason in three dimensions before classifying:
1. Temporal hierarchy - which resolves first, and can it serve as a leading indicator.
2. Conditionality - does A=YES materially raise or lower P(B=YES), and what is the sign.
3. Synthetic arbitrage - is this pair part of a triangle constraint where a third leg must close the probability sum.
Return a single JSON object with fields: relationship_type (equivalent|implied|mutually_exclusive|correlated), confidence_score (0-1), logic_justification, impact_direction (positive|negative|neutral), correlation_strength (low|medium|high|extreme), logical_layer (financial|political|statistical|direct), vantage_insight. Return JSON only."#;

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    relationship_type: String,
    confidence_score: f64,
    logic_justification: String,
    impact_direction: String,
    correlation_strength: String,
    logical_layer: String,
    vantage_insight: String,
}

#[derive(Debug, Serialize)]
struct PairPayload<'a> {
    market_a: &'a str,
    proposition_a: &'a str,
    probability_a_pct: Option<f64>,
    market_b: &'a str,
    proposition_b: &'a str,
    probability_b_pct: Option<f64>,
}

pub struct RelationshipClassifier {
    store: Arc<Store>,
    llm: AnalystClient,
    concurrency: usize,
    divergence_threshold_pct: f64,
    arbitrage_flag_threshold_pct: f64,
    hub_link_threshold: usize,
}

impl RelationshipClassifier {
    pub fn new(
        store: Arc<Store>,
        llm: AnalystClient,
        concurrency: usize,
        divergence_threshold_pct: f64,
        arbitrage_flag_threshold_pct: f64,
        hub_link_threshold: usize,
    ) -> Self {
        Self {
            store,
            llm,
            concurrency,
            divergence_threshold_pct,
            arbitrage_flag_threshold_pct,
            hub_link_threshold,
        }
    }

    /// Enumerates all unordered pairs from the catalog and classifies each,
    /// bounded to `concurrency` in-flight analyst-model calls.
    pub async fn run(&self) -> anyhow::Result<usize> {
        let catalog = self.store.get_catalog()?;
        let demo_table = demo_probability_table();
        let identifiers: Vec<String> = catalog
            .iter()
            .filter_map(|m| m.preferred_identifier().map(String::from))
            .collect();
        let live = self.store.latest_quotes_by_identifiers(&identifiers)?;

        let pairs = unordered_pairs(&catalog);
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut handles = Vec::with_capacity(pairs.len());

        for (a, b) in pairs {
            let permit = semaphore.clone();
            let llm = self.llm.clone();
            let prob_a = resolve_probability_pct(a, &live, &demo_table).map(|(p, _)| p);
            let prob_b = resolve_probability_pct(b, &live, &demo_table).map(|(p, _)| p);
            let a = a.clone();
            let b = b.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                classify_pair(&llm, &a, &b, prob_a, prob_b).await
            }));
        }

        let mut classified = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Some(rel)) => {
                    let rel = self.apply_derived_tags(rel);
                    self.store.upsert_relationship(&rel)?;
                    classified += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "classifier: pair task panicked"),
            }
        }

        self.log_hub_nodes()?;
        Ok(classified)
    }

    /// Post-processing: `probability_spread`, `risk_alert`, `arbitrage_flag`
    /// for `equivalent` and `mutually_exclusive` pairs.
    fn apply_derived_tags(&self, mut rel: Relationship) -> Relationship {
        let (Some(a), Some(b)) = (rel.probability_a, rel.probability_b) else {
            return rel;
        };

        match rel.relationship_type {
            RelationshipType::Equivalent => {
                let spread = (a - b).abs();
                rel.probability_spread = Some(spread);
                if spread > self.divergence_threshold_pct {
                    rel.risk_alert = Some("venue_divergence".to_string());
                }
                if spread > self.arbitrage_flag_threshold_pct {
                    rel.arbitrage_flag = Some("high_value_arbitrage".to_string());
                    rel.logic_justification = format!(
                        "{} Observed spread of {spread:.2} percentage points exceeds the arbitrage threshold.",
                        rel.logic_justification
                    );
                }
            }
            RelationshipType::MutuallyExclusive => {
                let deviation = (a + b - 100.0).abs();
                rel.probability_spread = Some(deviation);
                if deviation > self.arbitrage_flag_threshold_pct {
                    rel.arbitrage_flag = Some("high_value_arbitrage".to_string());
                    rel.logic_justification = format!(
                        "{} Combined probability deviates from 100% by {deviation:.2} points.",
                        rel.logic_justification
                    );
                }
            }
            _ => {}
        }
        rel
    }

    /// Logs markets with strictly more than `hub_link_threshold`
    /// (implied + correlated) edges; advisory only.
    fn log_hub_nodes(&self) -> anyhow::Result<()> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for rtype in [RelationshipType::Implied, RelationshipType::Correlated] {
            for rel in self.store.get_relationships_by_type(rtype)? {
                *counts.entry(rel.market_key_a.clone()).or_insert(0) += 1;
                *counts.entry(rel.market_key_b.clone()).or_insert(0) += 1;
            }
        }
        for (market_key, count) in counts {
            if count > self.hub_link_threshold {
                tracing::info!(market_key, count, "classifier: hub node detected");
            }
        }
        Ok(())
    }
}

fn unordered_pairs(catalog: &[Market]) -> Vec<(&Market, &Market)> {
    let mut pairs = Vec::new();
    for i in 0..catalog.len() {
        for j in (i + 1)..catalog.len() {
            pairs.push((&catalog[i], &catalog[j]));
        }
    }
    pairs
}

async fn classify_pair(
    llm: &AnalystClient,
    a: &Market,
    b: &Market,
    prob_a: Option<f64>,
    prob_b: Option<f64>,
) -> Option<Relationship> {
    let payload = PairPayload {
        market_a: &a.market_key,
        proposition_a: &a.proposition_text,
        probability_a_pct: prob_a,
        market_b: &b.market_key,
        proposition_b: &b.proposition_text,
        probability_b_pct: prob_b,
    };
    let user_content = serde_json::to_string(&payload).ok()?;

    let response_text = match llm.complete(SYSTEM_PROMPT, &user_content).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, market_a = %a.market_key, market_b = %b.market_key, "classifier: analyst model call failed, skipping pair");
            return None;
        }
    };

    let parsed: ClassificationResponse = match extract_json(&response_text) {
        Some(p) => p,
        None => {
            tracing::warn!(market_a = %a.market_key, market_b = %b.market_key, "classifier: could not extract JSON from analyst response, skipping pair");
            return None;
        }
    };

    let relationship_type = RelationshipType::parse(&parsed.relationship_type)?;

    Some(Relationship::new(
        a.market_key.clone(),
        b.market_key.clone(),
        relationship_type,
        parsed.confidence_score,
        parsed.logic_justification,
        ImpactDirection::parse(&parsed.impact_direction),
        CorrelationStrength::parse(&parsed.correlation_strength),
        LogicalLayer::parse(&parsed.logical_layer),
        parsed.vantage_insight,
        prob_a,
        prob_b,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(key: &str) -> Market {
        Market {
            market_key: key.to_string(),
            event_name: key.to_string(),
            proposition_text: format!("Will {key} happen?"),
            exchange_a_id: Some(format!("{key}-a")),
            exchange_b_id: None,
            resolution_date: None,
            settlement_source: None,
        }
    }

    #[test]
    fn unordered_pairs_covers_every_combination_once() {
        let catalog = vec![market("a"), market("b"), market("c")];
        let pairs = unordered_pairs(&catalog);
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn scenario_four_equivalent_tags_high_value_arbitrage() {
        let rel = Relationship::new(
            "a".into(),
            "b".into(),
            RelationshipType::Equivalent,
            0.9,
            "base justification".into(),
            ImpactDirection::Neutral,
            CorrelationStrength::High,
            LogicalLayer::Financial,
            "insight".into(),
            Some(90.0),
            Some(20.0),
        );
        let classifier = RelationshipClassifier {
            store: Arc::new(Store::open(":memory:").unwrap()),
            llm: AnalystClient::from_config(&test_config()),
            concurrency: 5,
            divergence_threshold_pct: 5.0,
            arbitrage_flag_threshold_pct: 10.0,
            hub_link_threshold: 3,
        };
        let tagged = classifier.apply_derived_tags(rel);
        assert_eq!(tagged.probability_spread, Some(70.0));
        assert_eq!(tagged.risk_alert.as_deref(), Some("venue_divergence"));
        assert_eq!(tagged.arbitrage_flag.as_deref(), Some("high_value_arbitrage"));
        assert!(tagged.logic_justification.contains("70.00"));
    }

    fn test_config() -> crate::models::Config {
        crate::models::Config {
            database_path: ":memory:".into(),
            port: 8080,
            exchange_a_asset_ids: vec![],
            exchange_a_api_key: None,
            exchange_b_tickers: vec![],
            exchange_b_api_key: None,
            exchange_b_private_key_base64: None,
            batch_size: 25,
            batch_flush_interval_ms: 2000,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            arbitrage_poll_interval_ms: 30000,
            arbitrage_spread_threshold_pct: 3.0,
            arbitrage_liquidity_threshold_usd: 500.0,
            classifier_concurrency: 5,
            arbitrage_flag_threshold_pct: 10.0,
            divergence_threshold_pct: 5.0,
            hub_link_threshold: 3,
            scenario_max_depth: 2,
            scenario_min_path_confidence: 0.05,
            analyst_model_endpoint: None,
            analyst_model_api_key: None,
            analyst_model_name: "gpt-4o-mini".into(),
        }
    }
}
