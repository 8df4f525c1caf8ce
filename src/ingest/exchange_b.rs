//! Exchange B (ticker venue) ingestion session: the same outer
//! reconnect loop and subscribe-frame shape as Exchange A, plus a
//! request-signing header built per this venue's RSA-PSS/SHA-256 auth
//! scheme.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::SigningKey;
use rsa::signature::RandomizedSigner;
use rsa::RsaPrivateKey;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::ingest::exchange_a::backoff_delay;
use crate::ingest::microstructure::MicrostructureCache;
use crate::ingest::normalize::{clamp_probability, confidence_flag};
use crate::models::{Platform, Quote, Side};

const EXCHANGE_B_WS_URL: &str = "wss://exchange-b.example/trade-api/ws/v2";
const SIGNED_PATH: &str = "/trade-api/ws/v2";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Trade {
        ticker: String,
        yes_price: f64,
        #[allow(dead_code)]
        no_price: f64,
        count: Option<f64>,
        taker_side: String,
        #[allow(dead_code)]
        timestamp: Option<i64>,
    },
    Ticker {
        ticker: String,
        yes_bid: f64,
        yes_ask: f64,
        #[allow(dead_code)]
        no_bid: Option<f64>,
        #[allow(dead_code)]
        no_ask: Option<f64>,
        volume: Option<f64>,
    },
    Subscribed,
    Error {
        #[allow(dead_code)]
        message: Option<String>,
    },
    Pong,
    #[serde(other)]
    Unknown,
}

pub struct ExchangeBSession {
    tickers: Vec<String>,
    api_key: Option<String>,
    private_key_b64: Option<String>,
    cache: MicrostructureCache,
    quote_tx: mpsc::Sender<Quote>,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl ExchangeBSession {
    pub fn new(
        tickers: Vec<String>,
        api_key: Option<String>,
        private_key_b64: Option<String>,
        cache: MicrostructureCache,
        quote_tx: mpsc::Sender<Quote>,
        base_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Self {
        Self {
            tickers,
            api_key,
            private_key_b64,
            cache,
            quote_tx,
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.tickers.is_empty() {
            tracing::warn!("exchange_b: no tickers configured, session opens but receives no data");
        }

        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    tracing::info!("exchange_b: session closed cleanly");
                    attempt = 0;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "exchange_b: session error, reconnecting");
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
        let mut request = EXCHANGE_B_WS_URL
            .into_client_request()
            .context("building exchange B request")?;

        if let (Some(api_key), Some(private_key_b64)) = (&self.api_key, &self.private_key_b64) {
            let timestamp_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            let signature = sign_request(private_key_b64, timestamp_ms)
                .context("signing exchange B auth headers")?;
            let headers = request.headers_mut();
            headers.insert("X-ACCESS-KEY", HeaderValue::from_str(api_key)?);
            headers.insert("X-ACCESS-TIMESTAMP", HeaderValue::from_str(&timestamp_ms.to_string())?);
            headers.insert("X-ACCESS-SIGNATURE", HeaderValue::from_str(&signature)?);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("connecting to exchange B")?;
        let (mut write, mut read) = ws_stream.split();

        let trade_sub = serde_json::json!({
            "action": "subscribe",
            "channel": "trade",
            "tickers": self.tickers,
        });
        let ticker_sub = serde_json::json!({
            "action": "subscribe",
            "channel": "ticker",
            "tickers": self.tickers,
        });
        write.send(Message::Text(trade_sub.to_string())).await.context("subscribing trade channel")?;
        write.send(Message::Text(ticker_sub.to_string())).await.context("subscribing ticker channel")?;

        // This venue rejects application-level pings; rely on the native
        // WS keep-alive frame instead.
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text_message(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await.context("ponging exchange B")?;
                        }
                        Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e).context("reading exchange B frame"),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str) {
        let parsed: InboundMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "exchange_b: malformed frame, dropping");
                return;
            }
        };

        match parsed {
            InboundMessage::Ticker { ticker, yes_bid, yes_ask, volume, .. } => {
                let yes_bid = yes_bid / 100.0;
                let yes_ask = yes_ask / 100.0;
                let spread_pct = if (yes_bid + yes_ask) > 0.0 {
                    Some(((yes_ask - yes_bid).max(0.0) / ((yes_bid + yes_ask) / 2.0)) * 100.0)
                } else {
                    None
                };
                self.cache.update(&ticker, |entry| {
                    entry.best_bid = Some(yes_bid);
                    entry.best_ask = Some(yes_ask);
                    entry.spread_pct = spread_pct;
                    entry.volume_24h = volume;
                });
            }
            InboundMessage::Trade { ticker, yes_price, count, taker_side, .. } => {
                let entry = self.cache.get(&ticker).unwrap_or_default();
                let price = entry.mid().unwrap_or(yes_price / 100.0);
                let depth = entry.depth_usd.unwrap_or(0.0);

                let quote = Quote {
                    id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    platform: Platform::VenueB,
                    event_id: ticker.clone(),
                    proposition_name: None,
                    price: clamp_probability(price),
                    side: if taker_side.eq_ignore_ascii_case("no") {
                        Side::Sell
                    } else {
                        Side::Buy
                    },
                    size: count.unwrap_or(0.0).max(0.0),
                    liquidity_depth_usd: depth,
                    bid_ask_spread_pct: entry.spread_pct,
                    volume_24h: entry.volume_24h,
                    confidence_flag: confidence_flag(depth, entry.spread_pct),
                    raw_payload: ticker,
                };

                if self.quote_tx.try_send(quote).is_err() {
                    tracing::warn!("exchange_b: ingestion queue full, dropping quote");
                }
            }
            InboundMessage::Subscribed | InboundMessage::Pong => {}
            InboundMessage::Error { message } => {
                tracing::warn!(?message, "exchange_b: venue reported error frame");
            }
            InboundMessage::Unknown => {}
        }
    }
}

/// RSA-PSS over SHA-256 (MGF1 SHA-256, salt length = digest length = 32
/// bytes) of `timestamp || "GET" || path`.
fn sign_request(private_key_b64: &str, timestamp_ms: u128) -> Result<String> {
    let pem_bytes = base64::engine::general_purpose::STANDARD
        .decode(private_key_b64)
        .context("decoding base64 PEM private key")?;
    let pem = String::from_utf8(pem_bytes).context("private key PEM is not valid UTF-8")?;
    let private_key =
        RsaPrivateKey::from_pkcs8_pem(&pem).context("parsing RSA private key")?;
    let signing_key = SigningKey::<Sha256>::new(private_key);

    let message = format!("{timestamp_ms}GET{SIGNED_PATH}");
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, message.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(signature.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_prices_are_rescaled_from_cents() {
        let cache = MicrostructureCache::new();
        let (tx, _rx) = mpsc::channel(8);
        let session = ExchangeBSession::new(
            vec!["KXTICKER".to_string()],
            None,
            None,
            cache.clone(),
            tx,
            1000,
            30_000,
        );
        session.handle_text_message(
            r#"{"type":"ticker","ticker":"KXTICKER","yes_bid":62,"yes_ask":64,"no_bid":36,"no_ask":38,"volume":1000}"#,
        );
        let entry = cache.get("KXTICKER").unwrap();
        assert_eq!(entry.best_bid, Some(0.62));
        assert_eq!(entry.best_ask, Some(0.64));
    }
}
