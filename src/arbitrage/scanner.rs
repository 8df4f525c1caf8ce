//! Arbitrage Scanner. Periodic cross-venue spread hunter over
//! markets flagged `equivalent` in the relationship graph: a struct holding
//! its dependencies, a `scan_*` entry point, a confidence/threshold gate,
//! and a colocated `#[cfg(test)]` module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::{AlertStatus, ArbitrageAlert, Config, Market, RelationshipType};
use crate::pricing::{demo_probability_table, resolve_depth_usd, resolve_probability_pct};
use crate::store::Store;

pub struct ArbitrageScanner {
    store: Arc<Store>,
    poll_interval: Duration,
    spread_threshold_pct: f64,
    liquidity_threshold_usd: f64,
    demo_table: HashMap<String, f64>,
}

impl ArbitrageScanner {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        Self {
            store,
            poll_interval: Duration::from_millis(config.arbitrage_poll_interval_ms),
            spread_threshold_pct: config.arbitrage_spread_threshold_pct,
            liquidity_threshold_usd: config.arbitrage_liquidity_threshold_usd,
            demo_table: demo_probability_table(),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once() {
                        tracing::warn!(error = %e, "arbitrage_scanner: scan cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    pub fn scan_once(&self) -> anyhow::Result<usize> {
        let equivalent_pairs = self.store.get_relationships_by_type(RelationshipType::Equivalent)?;
        if equivalent_pairs.is_empty() {
            return Ok(0);
        }

        let catalog = self.store.get_catalog()?;
        let by_key: HashMap<&str, &Market> = catalog
            .iter()
            .map(|m| (m.market_key.as_str(), m))
            .collect();

        let identifiers: Vec<String> = catalog
            .iter()
            .filter_map(|m| m.preferred_identifier().map(String::from))
            .collect();
        let latest = self.store.latest_quotes_by_identifiers(&identifiers)?;

        let mut alerts_emitted = 0usize;
        for pair in &equivalent_pairs {
            let market_a = match by_key.get(pair.market_key_a.as_str()) {
                Some(m) => *m,
                None => continue,
            };
            let market_b = match by_key.get(pair.market_key_b.as_str()) {
                Some(m) => *m,
                None => continue,
            };

            let resolved_a = resolve_probability_pct(market_a, &latest, &self.demo_table);
            let resolved_b = resolve_probability_pct(market_b, &latest, &self.demo_table);
            let (Some((pct_a, demo_a)), Some((pct_b, demo_b))) = (resolved_a, resolved_b) else {
                continue;
            };

            let spread = (pct_a - pct_b).abs();
            let depth_a = resolve_depth_usd(market_a, &latest);
            let depth_b = resolve_depth_usd(market_b, &latest);

            if spread > self.spread_threshold_pct
                && depth_a > self.liquidity_threshold_usd
                && depth_b > self.liquidity_threshold_usd
            {
                let status = if demo_a || demo_b {
                    AlertStatus::Simulated
                } else {
                    AlertStatus::Alert
                };
                let alert = ArbitrageAlert {
                    id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    market_pair: format!("{} \u{2194} {}", market_a.market_key, market_b.market_key),
                    spread,
                    potential_profit_pct: spread,
                    status,
                };
                self.store.insert_alert(&alert)?;
                alerts_emitted += 1;
            }
        }
        Ok(alerts_emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CorrelationStrength, ImpactDirection, LogicalLayer, Platform, Probability,
        Relationship, Side,
    };

    fn setup(store: &Store) {
        for (key, a_id) in [("market-a", "ex-a-id"), ("market-b", "ex-b-id")] {
            let market = crate::models::Market {
                market_key: key.to_string(),
                event_name: key.to_string(),
                proposition_text: key.to_string(),
                exchange_a_id: Some(a_id.to_string()),
                exchange_b_id: None,
                resolution_date: None,
                settlement_source: None,
            };
            store.upsert_market(&market).unwrap();
        }
        let rel = Relationship::new(
            "market-a".into(),
            "market-b".into(),
            RelationshipType::Equivalent,
            0.9,
            "j".into(),
            ImpactDirection::Neutral,
            CorrelationStrength::High,
            LogicalLayer::Financial,
            "insight".into(),
            None,
            None,
        );
        store.upsert_relationship(&rel).unwrap();
    }

    fn quote(event_id: &str, pct: f64, depth: f64) -> crate::models::Quote {
        crate::models::Quote {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            platform: Platform::VenueA,
            event_id: event_id.to_string(),
            proposition_name: None,
            price: Probability::from_fraction_clamped(pct / 100.0),
            side: Side::Buy,
            size: 0.0,
            liquidity_depth_usd: depth,
            bid_ask_spread_pct: None,
            volume_24h: None,
            confidence_flag: None,
            raw_payload: "{}".into(),
        }
    }

    #[test]
    fn scenario_two_emits_alert_when_liquid_and_above_threshold() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        setup(&store);
        store
            .insert_quotes_batch(&[quote("ex-a-id", 82.0, 1000.0), quote("ex-b-id", 76.0, 800.0)])
            .unwrap();

        let config = Config {
            arbitrage_poll_interval_ms: 30_000,
            arbitrage_spread_threshold_pct: 3.0,
            arbitrage_liquidity_threshold_usd: 500.0,
            ..test_config()
        };
        let scanner = ArbitrageScanner::new(store.clone(), &config);
        let emitted = scanner.scan_once().unwrap();
        assert_eq!(emitted, 1);

        let alerts = store.recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].spread - 6.0).abs() < 1e-9);
        assert!((alerts[0].potential_profit_pct - 6.0).abs() < 1e-9);
        assert_eq!(alerts[0].status, AlertStatus::Alert);
    }

    #[test]
    fn scenario_three_gated_by_liquidity() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        setup(&store);
        store
            .insert_quotes_batch(&[quote("ex-a-id", 82.0, 1000.0), quote("ex-b-id", 76.0, 200.0)])
            .unwrap();

        let config = test_config();
        let scanner = ArbitrageScanner::new(store.clone(), &config);
        let emitted = scanner.scan_once().unwrap();
        assert_eq!(emitted, 0);
        assert!(store.recent_alerts(10).unwrap().is_empty());
    }

    fn test_config() -> Config {
        Config {
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
