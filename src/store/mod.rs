//! Persistent store: a SQLite file addressed as a set of named tables,
//! opened in WAL mode, with `tokio::sync::broadcast` channels standing in
//! for a change-broadcast facility on the quote and report tables.

mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use crate::models::{
    AffectedEdge, AlertStatus, ArbitrageAlert, CausalStep, CorrelationStrength,
    ImpactDirection, LogicalLayer, Market, Platform, Probability, Quote, Relationship,
    RelationshipType, ScenarioReport, ScenarioStatus, Side,
};

const QUOTE_BROADCAST_CAPACITY: usize = 1024;
const REPORT_BROADCAST_CAPACITY: usize = 64;

pub struct Store {
    conn: Mutex<Connection>,
    quote_tx: broadcast::Sender<Quote>,
    report_tx: broadcast::Sender<ScenarioReport>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening persistent store at {path}"))?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .context("applying persistent store schema")?;

        let (quote_tx, _) = broadcast::channel(QUOTE_BROADCAST_CAPACITY);
        let (report_tx, _) = broadcast::channel(REPORT_BROADCAST_CAPACITY);

        Ok(Self {
            conn: Mutex::new(conn),
            quote_tx,
            report_tx,
        })
    }

    pub fn subscribe_quotes(&self) -> broadcast::Receiver<Quote> {
        self.quote_tx.subscribe()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<ScenarioReport> {
        self.report_tx.subscribe()
    }

    /// Drains a batch into a single insert call, as one transaction.
    /// Returns a `persistence_unavailable` error if the table is missing.
    pub fn insert_quotes_batch(&self, quotes: &[Quote]) -> Result<()> {
        if quotes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("opening write transaction")?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO market_signals (
                        id, timestamp, platform, event_id, proposition_name, price, side, size,
                        liquidity_depth_usd, bid_ask_spread_pct, volume_24h, confidence_flag, raw_payload
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                )
                .map_err(|e| map_missing_table(e, "market_signals"))?;
            for q in quotes {
                stmt.execute(params![
                    q.id,
                    q.timestamp.to_rfc3339(),
                    q.platform.as_str(),
                    q.event_id,
                    q.proposition_name,
                    q.price.value(),
                    side_str(q.side),
                    q.size,
                    q.liquidity_depth_usd,
                    q.bid_ask_spread_pct,
                    q.volume_24h,
                    q.confidence_flag,
                    q.raw_payload,
                ])
                .context("inserting quote row")?;
            }
        }
        tx.commit().context("committing quote batch")?;
        drop(conn);

        for q in quotes {
            let _ = self.quote_tx.send(q.clone());
        }
        Ok(())
    }

    /// Batch-fetch the latest quote per `event_id`, scanning in descending
    /// timestamp order and taking the first occurrence per identifier.
    pub fn latest_quotes_by_identifiers(
        &self,
        identifiers: &[String],
    ) -> Result<std::collections::HashMap<String, Quote>> {
        use std::collections::HashMap;
        if identifiers.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let placeholders = identifiers.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, timestamp, platform, event_id, proposition_name, price, side, size,
                    liquidity_depth_usd, bid_ask_spread_pct, volume_24h, confidence_flag, raw_payload
             FROM market_signals
             WHERE event_id IN ({placeholders})
             ORDER BY timestamp DESC"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| map_missing_table(e, "market_signals"))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(identifiers.iter()),
            row_to_quote,
        )?;

        let mut out: HashMap<String, Quote> = HashMap::new();
        for row in rows {
            let quote = row?;
            out.entry(quote.event_id.clone()).or_insert(quote);
        }
        Ok(out)
    }

    pub fn get_catalog(&self) -> Result<Vec<Market>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT market_key, event_name, proposition_text, exchange_a_id, exchange_b_id,
                        resolution_date, settlement_source
                 FROM market_metadata",
            )
            .map_err(|e| map_missing_table(e, "market_metadata"))?;
        let rows = stmt.query_map([], row_to_market)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("reading catalog")
    }

    /// Seeds or updates a catalog entry. The catalog is read-only to the
    /// engine's analytical components but something has to load
    /// it in the first place — an external curation job, in production.
    pub fn upsert_market(&self, market: &Market) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO market_metadata (
                market_key, event_name, proposition_text, exchange_a_id, exchange_b_id,
                resolution_date, settlement_source
            ) VALUES (?1,?2,?3,?4,?5,?6,?7)
            ON CONFLICT(market_key) DO UPDATE SET
                event_name = excluded.event_name,
                proposition_text = excluded.proposition_text,
                exchange_a_id = excluded.exchange_a_id,
                exchange_b_id = excluded.exchange_b_id,
                resolution_date = excluded.resolution_date,
                settlement_source = excluded.settlement_source",
            params![
                market.market_key,
                market.event_name,
                market.proposition_text,
                market.exchange_a_id,
                market.exchange_b_id,
                market.resolution_date.map(|d| d.to_rfc3339()),
                market.settlement_source,
            ],
        )
        .map_err(|e| map_missing_table(e, "market_metadata"))?;
        Ok(())
    }

    pub fn get_market(&self, market_key: &str) -> Result<Option<Market>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT market_key, event_name, proposition_text, exchange_a_id, exchange_b_id,
                    resolution_date, settlement_source
             FROM market_metadata WHERE market_key = ?1",
            params![market_key],
            row_to_market,
        )
        .optional()
        .context("reading market")
    }

    /// Upserts on the canonical `(market_key_a, market_key_b)` conflict key,
    /// so re-classifying the same pair is idempotent.
    pub fn upsert_relationship(&self, rel: &Relationship) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO market_relationships (
                market_key_a, market_key_b, relationship_type, confidence_score,
                logic_justification, impact_direction, correlation_strength, logical_layer,
                vantage_insight, probability_a, probability_b, probability_spread,
                arbitrage_flag, risk_alert, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
            ON CONFLICT(market_key_a, market_key_b) DO UPDATE SET
                relationship_type = excluded.relationship_type,
                confidence_score = excluded.confidence_score,
                logic_justification = excluded.logic_justification,
                impact_direction = excluded.impact_direction,
                correlation_strength = excluded.correlation_strength,
                logical_layer = excluded.logical_layer,
                vantage_insight = excluded.vantage_insight,
                probability_a = excluded.probability_a,
                probability_b = excluded.probability_b,
                probability_spread = excluded.probability_spread,
                arbitrage_flag = excluded.arbitrage_flag,
                risk_alert = excluded.risk_alert,
                updated_at = excluded.updated_at",
            params![
                rel.market_key_a,
                rel.market_key_b,
                rel.relationship_type.as_str(),
                rel.confidence_score,
                rel.logic_justification,
                impact_direction_str(rel.impact_direction),
                rel.correlation_strength.as_str(),
                rel.logical_layer.as_str(),
                rel.vantage_insight,
                rel.probability_a,
                rel.probability_b,
                rel.probability_spread,
                rel.arbitrage_flag,
                rel.risk_alert,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| map_missing_table(e, "market_relationships"))?;
        Ok(())
    }

    pub fn get_relationships_by_type(&self, rtype: RelationshipType) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&relationship_select_sql("WHERE relationship_type = ?1"))
            .map_err(|e| map_missing_table(e, "market_relationships"))?;
        let rows = stmt.query_map(params![rtype.as_str()], row_to_relationship)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("reading relationships by type")
    }

    pub fn get_all_relationships(&self) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&relationship_select_sql(""))
            .map_err(|e| map_missing_table(e, "market_relationships"))?;
        let rows = stmt.query_map([], row_to_relationship)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("reading all relationships")
    }

    pub fn insert_alert(&self, alert: &ArbitrageAlert) -> Result<()> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO arbitrage_alerts (id, timestamp, market_pair, spread, potential_profit_pct, status)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    alert.id,
                    alert.timestamp.to_rfc3339(),
                    alert.market_pair,
                    alert.spread,
                    alert.potential_profit_pct,
                    alert.status.as_str(),
                ],
            )
            .map_err(|e| map_missing_table(e, "arbitrage_alerts"))?;
        }
        Ok(())
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<ArbitrageAlert>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, market_pair, spread, potential_profit_pct, status
                 FROM arbitrage_alerts ORDER BY timestamp DESC LIMIT ?1",
            )
            .map_err(|e| map_missing_table(e, "arbitrage_alerts"))?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let status: String = row.get(5)?;
            Ok(ArbitrageAlert {
                id: row.get(0)?,
                timestamp: parse_rfc3339(row.get::<_, String>(1)?),
                market_pair: row.get(2)?,
                spread: row.get(3)?,
                potential_profit_pct: row.get(4)?,
                status: if status == "alert" {
                    AlertStatus::Alert
                } else {
                    AlertStatus::Simulated
                },
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("reading recent alerts")
    }

    pub fn create_pending_scenario(&self, id: &str, query: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scenario_reports (
                id, query, trigger_market, causal_chain, narrative, affected_nodes,
                affected_edges, status, created_at
            ) VALUES (?1,?2,NULL,'[]',NULL,'[]','[]',?3,?4)",
            params![id, query, ScenarioStatus::Processing.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| map_missing_table(e, "scenario_reports"))?;
        Ok(())
    }

    pub fn complete_scenario(&self, report: &ScenarioReport) -> Result<()> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE scenario_reports SET
                    trigger_market = ?2, causal_chain = ?3, narrative = ?4,
                    affected_nodes = ?5, affected_edges = ?6, status = ?7
                 WHERE id = ?1",
                params![
                    report.id,
                    report.trigger_market,
                    serde_json::to_string(&report.causal_chain)?,
                    report.narrative,
                    serde_json::to_string(&report.affected_nodes)?,
                    serde_json::to_string(&report.affected_edges)?,
                    report.status.as_str(),
                ],
            )
            .map_err(|e| map_missing_table(e, "scenario_reports"))?;
        }
        let _ = self.report_tx.send(report.clone());
        Ok(())
    }

    pub fn fail_scenario(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE scenario_reports SET status = ?2 WHERE id = ?1",
            params![id, ScenarioStatus::Failed.as_str()],
        )
        .map_err(|e| map_missing_table(e, "scenario_reports"))?;
        Ok(())
    }

    pub fn get_scenario(&self, id: &str) -> Result<Option<ScenarioReport>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, query, trigger_market, causal_chain, narrative, affected_nodes,
                    affected_edges, status, created_at
             FROM scenario_reports WHERE id = ?1",
            params![id],
            row_to_report,
        )
        .optional()
        .context("reading scenario report")
    }

    pub fn list_scenarios(&self, limit: usize) -> Result<Vec<ScenarioReport>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, query, trigger_market, causal_chain, narrative, affected_nodes,
                        affected_edges, status, created_at
                 FROM scenario_reports ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| map_missing_table(e, "scenario_reports"))?;
        let rows = stmt.query_map(params![limit as i64], row_to_report)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing scenario reports")
    }
}

fn relationship_select_sql(filter: &str) -> String {
    format!(
        "SELECT market_key_a, market_key_b, relationship_type, confidence_score,
                logic_justification, impact_direction, correlation_strength, logical_layer,
                vantage_insight, probability_a, probability_b, probability_spread,
                arbitrage_flag, risk_alert
         FROM market_relationships {filter}"
    )
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn impact_direction_str(dir: ImpactDirection) -> &'static str {
    match dir {
        ImpactDirection::Positive => "positive",
        ImpactDirection::Negative => "negative",
        ImpactDirection::Neutral => "neutral",
    }
}

fn parse_rfc3339(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_quote(row: &rusqlite::Row) -> rusqlite::Result<Quote> {
    let platform: String = row.get(2)?;
    let side: String = row.get(6)?;
    Ok(Quote {
        id: row.get(0)?,
        timestamp: parse_rfc3339(row.get(1)?),
        platform: if platform == "venueA" {
            Platform::VenueA
        } else {
            Platform::VenueB
        },
        event_id: row.get(3)?,
        proposition_name: row.get(4)?,
        price: Probability::from_fraction_clamped(row.get(5)?),
        side: if side == "buy" { Side::Buy } else { Side::Sell },
        size: row.get(7)?,
        liquidity_depth_usd: row.get(8)?,
        bid_ask_spread_pct: row.get(9)?,
        volume_24h: row.get(10)?,
        confidence_flag: row.get(11)?,
        raw_payload: row.get(12)?,
    })
}

fn row_to_market(row: &rusqlite::Row) -> rusqlite::Result<Market> {
    let resolution_date: Option<String> = row.get(5)?;
    Ok(Market {
        market_key: row.get(0)?,
        event_name: row.get(1)?,
        proposition_text: row.get(2)?,
        exchange_a_id: row.get(3)?,
        exchange_b_id: row.get(4)?,
        resolution_date: resolution_date.map(parse_rfc3339),
        settlement_source: row.get(6)?,
    })
}

fn row_to_relationship(row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
    let rtype: String = row.get(2)?;
    let impact: String = row.get(5)?;
    let corr: String = row.get(6)?;
    let layer: String = row.get(7)?;
    Ok(Relationship {
        market_key_a: row.get(0)?,
        market_key_b: row.get(1)?,
        relationship_type: RelationshipType::parse(&rtype).unwrap_or(RelationshipType::Correlated),
        confidence_score: row.get(3)?,
        logic_justification: row.get(4)?,
        impact_direction: ImpactDirection::parse(&impact),
        correlation_strength: CorrelationStrength::parse(&corr),
        logical_layer: LogicalLayer::parse(&layer),
        vantage_insight: row.get(8)?,
        probability_a: row.get(9)?,
        probability_b: row.get(10)?,
        probability_spread: row.get(11)?,
        arbitrage_flag: row.get(12)?,
        risk_alert: row.get(13)?,
    })
}

fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<ScenarioReport> {
    let causal_chain: String = row.get(3)?;
    let affected_nodes: String = row.get(5)?;
    let affected_edges: String = row.get(6)?;
    let status: String = row.get(7)?;
    let causal_chain: Vec<CausalStep> = serde_json::from_str(&causal_chain).unwrap_or_default();
    let affected_nodes: Vec<String> = serde_json::from_str(&affected_nodes).unwrap_or_default();
    let affected_edges: Vec<AffectedEdge> =
        serde_json::from_str(&affected_edges).unwrap_or_default();
    Ok(ScenarioReport {
        id: row.get(0)?,
        query: row.get(1)?,
        trigger_market: row.get(2)?,
        causal_chain,
        narrative: row.get(4)?,
        affected_nodes,
        affected_edges,
        status: match status.as_str() {
            "pending" => ScenarioStatus::Pending,
            "complete" => ScenarioStatus::Complete,
            "failed" => ScenarioStatus::Failed,
            _ => ScenarioStatus::Processing,
        },
        created_at: parse_rfc3339(row.get(8)?),
    })
}

/// Translates rusqlite's generic "no such table" into the
/// `persistence_unavailable` condition the batch writer names.
fn map_missing_table(err: rusqlite::Error, table: &str) -> anyhow::Error {
    let msg = err.to_string();
    if msg.contains("no such table") {
        anyhow::anyhow!("persistence_unavailable: table `{table}` is missing: {msg}")
    } else {
        anyhow::Error::new(err).context(format!("querying table `{table}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, Side};
    use chrono::Utc;

    fn test_store() -> Store {
        Store::open(":memory:").expect("open in-memory store")
    }

    fn sample_quote(id: &str, event_id: &str, ts: DateTime<Utc>, price: f64) -> Quote {
        Quote {
            id: id.to_string(),
            timestamp: ts,
            platform: Platform::VenueA,
            event_id: event_id.to_string(),
            proposition_name: None,
            price: Probability::from_fraction_clamped(price),
            side: Side::Buy,
            size: 10.0,
            liquidity_depth_usd: 100.0,
            bid_ask_spread_pct: None,
            volume_24h: None,
            confidence_flag: None,
            raw_payload: "{}".to_string(),
        }
    }

    #[test]
    fn insert_and_latest_quote_takes_most_recent() {
        let store = test_store();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        store
            .insert_quotes_batch(&[
                sample_quote("q1", "asset-x", t0, 0.5),
                sample_quote("q2", "asset-x", t1, 0.6),
            ])
            .unwrap();

        let latest = store
            .latest_quotes_by_identifiers(&["asset-x".to_string()])
            .unwrap();
        assert_eq!(latest["asset-x"].price.value(), 0.6);
    }

    #[test]
    fn relationship_upsert_is_idempotent() {
        let store = test_store();
        let rel = Relationship::new(
            "m-a".into(),
            "m-b".into(),
            RelationshipType::Equivalent,
            0.8,
            "j".into(),
            ImpactDirection::Neutral,
            CorrelationStrength::High,
            LogicalLayer::Financial,
            "insight".into(),
            Some(10.0),
            Some(20.0),
        );
        store.upsert_relationship(&rel).unwrap();
        store.upsert_relationship(&rel).unwrap();
        let all = store.get_all_relationships().unwrap();
        assert_eq!(all.len(), 1);
    }
}
