//! Process-local, non-persistent microstructure cache keyed by exchange-side
//! asset identifier. Disjoint per venue — each session
//! only ever touches the keys for its own venue, so a plain `RwLock<HashMap>`
//! is enough; no cross-venue coordination is needed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, Default)]
pub struct MicrostructureEntry {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub depth_usd: Option<f64>,
    pub spread_pct: Option<f64>,
    pub volume_24h: Option<f64>,
}

impl MicrostructureEntry {
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct MicrostructureCache {
    inner: Arc<RwLock<HashMap<String, MicrostructureEntry>>>,
}

impl MicrostructureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset_id: &str) -> Option<MicrostructureEntry> {
        self.inner.read().get(asset_id).copied()
    }

    /// Overwrites the entry for `asset_id` wholesale — book/ticker updates
    /// are snapshots, not deltas.
    pub fn set(&self, asset_id: &str, entry: MicrostructureEntry) {
        self.inner.write().insert(asset_id.to_string(), entry);
    }

    pub fn update(&self, asset_id: &str, f: impl FnOnce(&mut MicrostructureEntry)) {
        let mut guard = self.inner.write();
        let entry = guard.entry(asset_id.to_string()).or_default();
        f(entry);
    }
}

/// Computes ladder depth (sum of price*size) within ±2% of `mid` on each
/// side.
pub fn ladder_depth_within_band(
    bids: &[(f64, f64)],
    asks: &[(f64, f64)],
    mid: f64,
) -> f64 {
    if mid <= 0.0 {
        return 0.0;
    }
    let lower = mid * 0.98;
    let upper = mid * 1.02;
    let bid_depth: f64 = bids
        .iter()
        .filter(|(price, _)| *price >= lower && *price <= upper)
        .map(|(price, size)| price * size)
        .sum();
    let ask_depth: f64 = asks
        .iter()
        .filter(|(price, _)| *price >= lower && *price <= upper)
        .map(|(price, size)| price * size)
        .sum();
    bid_depth + ask_depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_sums_only_levels_within_band() {
        let bids = vec![(0.63, 100.0), (0.40, 1000.0)];
        let asks = vec![(0.65, 100.0), (0.90, 1000.0)];
        let depth = ladder_depth_within_band(&bids, &asks, 0.64);
        assert!((depth - 128.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_keys_do_not_clobber_each_other() {
        let cache = MicrostructureCache::new();
        cache.set(
            "venue-a-asset",
            MicrostructureEntry {
                best_bid: Some(0.5),
                ..Default::default()
            },
        );
        cache.set(
            "venue-b-asset",
            MicrostructureEntry {
                best_ask: Some(0.9),
                ..Default::default()
            },
        );
        assert_eq!(cache.get("venue-a-asset").unwrap().best_bid, Some(0.5));
        assert_eq!(cache.get("venue-b-asset").unwrap().best_ask, Some(0.9));
    }
}
