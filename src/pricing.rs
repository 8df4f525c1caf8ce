//! Single price-priority lookup shared by the Classifier, Arbitrage
//! Scanner, and Scenario Engine, so all three agree on which price wins
//! when a market has both live and demo data available.

use std::collections::HashMap;

use crate::models::{Market, Quote};

/// Resolves a market's current probability percentage: live quote on
/// exchange A's identifier, else exchange B's, else the demo fallback
/// table, else `None`. Returns whether the value was demo-derived.
pub fn resolve_probability_pct(
    market: &Market,
    live_by_identifier: &HashMap<String, Quote>,
    demo_table: &HashMap<String, f64>,
) -> Option<(f64, bool)> {
    if let Some(id) = &market.exchange_a_id {
        if let Some(quote) = live_by_identifier.get(id) {
            return Some((quote.probability_pct(), false));
        }
    }
    if let Some(id) = &market.exchange_b_id {
        if let Some(quote) = live_by_identifier.get(id) {
            return Some((quote.probability_pct(), false));
        }
    }
    demo_table
        .get(&market.market_key)
        .map(|pct| (*pct, true))
}

/// Hard-coded demo-probability fallback. Production keeps this fallback
/// rather than treating missing live data as "no alert/edge possible",
/// and callers tag demo-derived results distinctly rather than silently
/// treating them as live. Shared by the Classifier, Arbitrage Scanner,
/// and Scenario Engine.
///
/// Entries are keyed by `market_key` and cover markets the catalog can
/// carry without either venue ever quoting them (delisted, thinly
/// traded, or seeded for a demo walkthrough).
pub fn demo_probability_table() -> HashMap<String, f64> {
    [
        ("fed-25bps-cut-q3", 62.0),
        ("recession-call-2026", 18.0),
        ("gov-shutdown-q4", 34.0),
        ("cpi-above-3pct-next", 41.0),
        ("debt-ceiling-resolved-on-time", 71.0),
    ]
    .into_iter()
    .map(|(key, pct)| (key.to_string(), pct))
    .collect()
}

/// Depth in USD for whichever identifier actually resolved the price above,
/// used by the Arbitrage Scanner's liquidity gate. Demo-resolved prices
/// have no live depth.
pub fn resolve_depth_usd(market: &Market, live_by_identifier: &HashMap<String, Quote>) -> f64 {
    market
        .exchange_a_id
        .as_ref()
        .and_then(|id| live_by_identifier.get(id))
        .or_else(|| {
            market
                .exchange_b_id
                .as_ref()
                .and_then(|id| live_by_identifier.get(id))
        })
        .map(|q| q.liquidity_depth_usd)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, Probability, Side};
    use chrono::Utc;

    fn market(key: &str, a: Option<&str>, b: Option<&str>) -> Market {
        Market {
            market_key: key.to_string(),
            event_name: key.to_string(),
            proposition_text: key.to_string(),
            exchange_a_id: a.map(String::from),
            exchange_b_id: b.map(String::from),
            resolution_date: None,
            settlement_source: None,
        }
    }

    fn quote(pct: f64, depth: f64) -> Quote {
        Quote {
            id: "q".into(),
            timestamp: Utc::now(),
            platform: Platform::VenueA,
            event_id: "id".into(),
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
    fn prefers_identifier_a_over_b() {
        let m = market("m1", Some("a-id"), Some("b-id"));
        let mut live = HashMap::new();
        live.insert("a-id".to_string(), quote(80.0, 100.0));
        live.insert("b-id".to_string(), quote(20.0, 100.0));
        let (pct, demo) = resolve_probability_pct(&m, &live, &HashMap::new()).unwrap();
        assert_eq!(pct, 80.0);
        assert!(!demo);
    }

    #[test]
    fn falls_back_to_demo_when_no_live_quote() {
        let m = market("m1", Some("a-id"), None);
        let mut demo = HashMap::new();
        demo.insert("m1".to_string(), 55.0);
        let (pct, is_demo) = resolve_probability_pct(&m, &HashMap::new(), &demo).unwrap();
        assert_eq!(pct, 55.0);
        assert!(is_demo);
    }

    #[test]
    fn none_when_neither_live_nor_demo_available() {
        let m = market("m1", Some("a-id"), None);
        assert!(resolve_probability_pct(&m, &HashMap::new(), &HashMap::new()).is_none());
    }
}
