//! Batch Writer: accumulates normalized quotes and flushes them
//! to the persistent store in bounded bursts, bounded by size or time, with
//! retry and bounded back-pressure. The size/time race uses a `Notify` for
//! the size-triggered flush path alongside a plain interval ticker for the
//! time-triggered one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};

use crate::models::Quote;
use crate::store::Store;

#[derive(Default)]
pub struct BatchWriterStats {
    pub queued: AtomicU64,
    pub inserted: AtomicU64,
    pub errors: AtomicU64,
    pub dropped: AtomicU64,
}

pub struct BatchWriter {
    store: Arc<Store>,
    queue: Mutex<VecDeque<Quote>>,
    notify: Notify,
    batch_size: usize,
    flush_interval: Duration,
    retained_cap: usize,
    pub stats: Arc<BatchWriterStats>,
}

impl BatchWriter {
    pub fn new(store: Arc<Store>, batch_size: usize, flush_interval_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            batch_size,
            flush_interval: Duration::from_millis(flush_interval_ms),
            retained_cap: batch_size.saturating_mul(10),
            stats: Arc::new(BatchWriterStats::default()),
        })
    }

    /// Non-blocking enqueue.
    pub fn enqueue(&self, quote: Quote) {
        let mut q = self.queue.lock();
        q.push_back(quote);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        let len = q.len();
        drop(q);
        if len >= self.batch_size {
            self.notify.notify_one();
        }
    }

    /// Runs the flush-on-size-or-time loop until `shutdown` fires, then
    /// performs one final synchronous flush.
    pub async fn run(
        self: Arc<Self>,
        mut quote_rx: mpsc::Receiver<Quote>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        loop {
            tokio::select! {
                maybe_quote = quote_rx.recv() => {
                    match maybe_quote {
                        Some(q) => self.enqueue(q),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush();
                }
                _ = self.notify.notified() => {
                    self.flush();
                }
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.flush();
    }

    /// Drains the queue atomically into a single insert call. On failure,
    /// prepends the batch back to the queue, capped at `10*batch_size`
    /// retained records (drop oldest beyond cap,).
    pub fn flush(&self) {
        let batch: Vec<Quote> = {
            let mut q = self.queue.lock();
            q.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        match self.store.insert_quotes_batch(&batch) {
            Ok(()) => {
                self.stats
                    .inserted
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, count = batch.len(), "batch_writer: flush failed, requeueing");
                let mut q = self.queue.lock();
                for quote in batch.into_iter().rev() {
                    q.push_front(quote);
                }
                while q.len() > self.retained_cap {
                    q.pop_back();
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                if self.stats.dropped.load(Ordering::Relaxed) > 0 {
                    tracing::warn!(
                        dropped = self.stats.dropped.load(Ordering::Relaxed),
                        "batch_writer: retained queue over cap, dropped oldest records"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, Probability, Side};
    use chrono::Utc;

    fn sample_quote(id: &str) -> Quote {
        Quote {
            id: id.to_string(),
            timestamp: Utc::now(),
            platform: Platform::VenueA,
            event_id: "asset-x".to_string(),
            proposition_name: None,
            price: Probability::from_fraction_clamped(0.5),
            side: Side::Buy,
            size: 1.0,
            liquidity_depth_usd: 10.0,
            bid_ask_spread_pct: None,
            volume_24h: None,
            confidence_flag: None,
            raw_payload: "{}".to_string(),
        }
    }

    #[test]
    fn flush_persists_all_enqueued_records() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        let writer = BatchWriter::new(store.clone(), 25, 2000);
        for i in 0..5 {
            writer.enqueue(sample_quote(&format!("q{i}")));
        }
        writer.flush();
        assert_eq!(writer.stats.inserted.load(Ordering::Relaxed), 5);

        let latest = store
            .latest_quotes_by_identifiers(&["asset-x".to_string()])
            .unwrap();
        assert!(latest.contains_key("asset-x"));
    }

    #[test]
    fn retained_queue_drops_oldest_beyond_cap() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        let writer = BatchWriter::new(store, 2, 2000);
        {
            let mut q = writer.queue.lock();
            for i in 0..25 {
                q.push_back(sample_quote(&format!("overflow{i}")));
            }
        }
        while writer.queue.lock().len() > writer.retained_cap {
            writer.queue.lock().pop_back();
            writer.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        assert!(writer.queue.lock().len() <= writer.retained_cap);
    }
}
