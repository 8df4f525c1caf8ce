//! Exchange A (order-book venue) ingestion session: a single
//! `tokio::select!` loop over a ping interval, subscribe commands, and
//! incoming frames, with capped exponential-backoff reconnection.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::ingest::microstructure::{ladder_depth_within_band, MicrostructureCache, MicrostructureEntry};
use crate::ingest::normalize::{clamp_probability, confidence_flag};
use crate::models::{Platform, Quote, Side};

const EXCHANGE_A_WS_URL: &str = "wss://exchange-a.example/ws/market";
const PING_INTERVAL_SECS: u64 = 20;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LadderEntry {
    Object { price: f64, size: f64 },
    Tuple(f64, f64),
}

impl LadderEntry {
    fn as_pair(&self) -> (f64, f64) {
        match self {
            LadderEntry::Object { price, size } => (*price, *size),
            LadderEntry::Tuple(price, size) => (*price, *size),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
enum InboundMessage {
    Trade {
        asset: String,
        price: f64,
        size: f64,
        side: String,
        #[allow(dead_code)]
        timestamp: Option<i64>,
    },
    LastTradePrice {
        asset: String,
        price: f64,
    },
    PriceChange {
        asset: String,
        best_bid: f64,
        best_ask: f64,
    },
    Book {
        asset: String,
        #[serde(default)]
        bids: Vec<LadderEntry>,
        #[serde(default)]
        asks: Vec<LadderEntry>,
    },
    BookSnapshot {
        asset: String,
        #[serde(default)]
        bids: Vec<LadderEntry>,
        #[serde(default)]
        asks: Vec<LadderEntry>,
    },
    #[serde(other)]
    Unknown,
}

pub struct ExchangeASession {
    asset_ids: Vec<String>,
    api_key: Option<String>,
    cache: MicrostructureCache,
    quote_tx: mpsc::Sender<Quote>,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl ExchangeASession {
    pub fn new(
        asset_ids: Vec<String>,
        api_key: Option<String>,
        cache: MicrostructureCache,
        quote_tx: mpsc::Sender<Quote>,
        base_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Self {
        Self {
            asset_ids,
            api_key,
            cache,
            quote_tx,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Independent recovery loop: never shares fate with exchange B's
    /// session.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.asset_ids.is_empty() {
            tracing::warn!("exchange_a: no asset ids configured, session opens but receives no data");
        }

        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    tracing::info!("exchange_a: session closed cleanly");
                    attempt = 0;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "exchange_a: session error, reconnecting");
                }
            }
            if *shutdown.borrow() {
                return;
            }
            let delay = backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(EXCHANGE_A_WS_URL)
            .await
            .context("connecting to exchange A")?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "type": "subscribe",
            "channel": "market",
            "assets": self.asset_ids,
            "api_key": self.api_key,
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .context("sending subscribe frame")?;

        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        let desired: HashSet<&str> = self.asset_ids.iter().map(String::as_str).collect();

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    let ping = serde_json::json!({ "type": "ping" });
                    write.send(Message::Text(ping.to_string())).await.context("sending ping frame")?;
                }
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text, &desired);
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e).context("reading exchange A frame"),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str, desired: &HashSet<&str>) {
        let parsed: InboundMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "exchange_a: malformed frame, dropping");
                return;
            }
        };

        match parsed {
            InboundMessage::Book { asset, bids, asks } | InboundMessage::BookSnapshot { asset, bids, asks } => {
                if !desired.contains(asset.as_str()) {
                    return;
                }
                self.apply_book(&asset, &bids, &asks);
            }
            InboundMessage::PriceChange { asset, best_bid, best_ask } => {
                if !desired.contains(asset.as_str()) {
                    return;
                }
                self.cache.update(&asset, |entry| {
                    entry.best_bid = Some(best_bid);
                    entry.best_ask = Some(best_ask);
                    entry.spread_pct = mid_spread_pct(best_bid, best_ask);
                });
            }
            InboundMessage::Trade { asset, price, size, side, .. } => {
                if !desired.contains(asset.as_str()) {
                    return;
                }
                self.emit_trade_quote(&asset, price, size, &side);
            }
            InboundMessage::LastTradePrice { asset, price } => {
                if !desired.contains(asset.as_str()) {
                    return;
                }
                self.emit_trade_quote(&asset, price, 0.0, "buy");
            }
            InboundMessage::Unknown => {}
        }
    }

    fn apply_book(&self, asset: &str, bids: &[LadderEntry], asks: &[LadderEntry]) {
        let bid_pairs: Vec<(f64, f64)> = bids.iter().map(LadderEntry::as_pair).collect();
        let ask_pairs: Vec<(f64, f64)> = asks.iter().map(LadderEntry::as_pair).collect();

        let best_bid = bid_pairs.iter().map(|(p, _)| *p).fold(None, max_opt);
        let best_ask = ask_pairs.iter().map(|(p, _)| *p).fold(None, min_opt);
        let mid = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        };
        let depth = mid.map(|m| ladder_depth_within_band(&bid_pairs, &ask_pairs, m));

        self.cache.set(
            asset,
            MicrostructureEntry {
                best_bid,
                best_ask,
                depth_usd: depth,
                spread_pct: best_bid.zip(best_ask).and_then(|(b, a)| mid_spread_pct(b, a)),
                volume_24h: self.cache.get(asset).and_then(|e| e.volume_24h),
            },
        );
    }

    /// Price preference: mid of best bid/ask if available, else trade
    /// price.
    fn emit_trade_quote(&self, asset: &str, trade_price: f64, trade_size: f64, side: &str) {
        let entry = self.cache.get(asset).unwrap_or_default();
        let price = entry.mid().unwrap_or(trade_price);
        let depth = entry.depth_usd.unwrap_or(0.0);
        let spread_pct = entry.spread_pct.or_else(|| {
            entry
                .best_bid
                .zip(entry.best_ask)
                .and_then(|(b, a)| mid_spread_pct(b, a))
        });

        let quote = Quote {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            platform: Platform::VenueA,
            event_id: asset.to_string(),
            proposition_name: None,
            price: clamp_probability(price),
            side: if side.eq_ignore_ascii_case("sell") {
                Side::Sell
            } else {
                Side::Buy
            },
            size: trade_size.max(0.0),
            liquidity_depth_usd: depth,
            bid_ask_spread_pct: spread_pct,
            volume_24h: entry.volume_24h,
            confidence_flag: confidence_flag(depth, spread_pct),
            raw_payload: asset.to_string(),
        };

        if self.quote_tx.try_send(quote).is_err() {
            tracing::warn!(asset, "exchange_a: ingestion queue full, dropping quote for asset");
        }
    }
}

fn mid_spread_pct(best_bid: f64, best_ask: f64) -> Option<f64> {
    let mid = (best_bid + best_ask) / 2.0;
    if mid > 0.0 {
        Some(((best_ask - best_bid).max(0.0) / mid) * 100.0)
    } else {
        None
    }
}

fn max_opt(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.max(x)))
}

fn min_opt(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.min(x)))
}

/// `min(base * 2^attempt + jitter, cap)`.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
    let jitter = (attempt as u64 * 37) % 250;
    Duration::from_millis(exp.saturating_add(jitter).min(cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_entry_accepts_object_and_tuple_forms() {
        let obj: LadderEntry = serde_json::from_str(r#"{"price":0.63,"size":100}"#).unwrap();
        let tuple: LadderEntry = serde_json::from_str(r#"[0.63,100]"#).unwrap();
        assert_eq!(obj.as_pair(), (0.63, 100.0));
        assert_eq!(tuple.as_pair(), (0.63, 100.0));
    }

    #[test]
    fn backoff_is_capped() {
        let d = backoff_delay(30, 1000, 30_000);
        assert!(d.as_millis() as u64 <= 30_000);
    }

    #[test]
    fn scenario_one_book_then_trade_prefers_mid() {
        let cache = MicrostructureCache::new();
        let (tx, mut rx) = mpsc::channel(8);
        let session = ExchangeASession::new(
            vec!["asset-x".to_string()],
            None,
            cache.clone(),
            tx,
            1000,
            30_000,
        );
        let desired: HashSet<&str> = ["asset-x"].into_iter().collect();

        session.handle_text_message(
            r#"{"event_type":"trade","asset":"asset-x","price":0.64,"size":50,"side":"buy"}"#,
            &desired,
        );
        session.handle_text_message(
            r#"{"event_type":"trade","asset":"asset-x","price":0.66,"size":50,"side":"buy"}"#,
            &desired,
        );
        session.handle_text_message(
            r#"{"event_type":"book","asset":"asset-x","bids":[{"price":0.63,"size":100}],"asks":[{"price":0.65,"size":100}]}"#,
            &desired,
        );
        session.handle_text_message(
            r#"{"event_type":"trade","asset":"asset-x","price":0.66,"size":50,"side":"buy"}"#,
            &desired,
        );

        let q1 = rx.try_recv().unwrap();
        assert_eq!(q1.price.value(), 0.64);
        let q2 = rx.try_recv().unwrap();
        assert_eq!(q2.price.value(), 0.66);
        // After the book update, mid of 0.63/0.65 is preferred over the raw
        // trade price of 0.66.
        let q3 = rx.try_recv().unwrap();
        assert_eq!(q3.price.value(), 0.64);
        assert_eq!(q3.liquidity_depth_usd, 128.0);
    }
}
