//! Quote Ingestor: one independent session per exchange,
//! each normalizing venue frames into the shared `Quote` stream consumed
//! by the Batch Writer.

pub mod exchange_a;
pub mod exchange_b;
pub mod microstructure;
pub mod normalize;

use tokio::sync::{mpsc, watch};

use crate::models::{Config, Quote};
use microstructure::MicrostructureCache;

/// Spawns both exchange sessions, wired to a shared (but key-disjoint)
/// microstructure cache and a common quote channel feeding the Batch
/// Writer, one task per exchange session.
pub fn spawn_sessions(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> (mpsc::Receiver<Quote>, Vec<tokio::task::JoinHandle<()>>) {
    let cache = MicrostructureCache::new();
    let (quote_tx, quote_rx) = mpsc::channel(4096);

    let session_a = exchange_a::ExchangeASession::new(
        config.exchange_a_asset_ids.clone(),
        config.exchange_a_api_key.clone(),
        cache.clone(),
        quote_tx.clone(),
        config.reconnect_base_delay_ms,
        config.reconnect_max_delay_ms,
    );
    let session_b = exchange_b::ExchangeBSession::new(
        config.exchange_b_tickers.clone(),
        config.exchange_b_api_key.clone(),
        config.exchange_b_private_key_base64.clone(),
        cache,
        quote_tx,
        config.reconnect_base_delay_ms,
        config.reconnect_max_delay_ms,
    );

    let shutdown_a = shutdown.clone();
    let handle_a = tokio::spawn(async move { session_a.run(shutdown_a).await });
    let handle_b = tokio::spawn(async move { session_b.run(shutdown).await });

    (quote_rx, vec![handle_a, handle_b])
}
