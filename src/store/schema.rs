//! SQLite schema for the persistent store: WAL mode, `WITHOUT ROWID` for
//! naturally-keyed tables, plus covering indexes for the lookups the
//! store's query methods need.

pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS market_metadata (
    market_key          TEXT PRIMARY KEY,
    event_name          TEXT NOT NULL,
    proposition_text    TEXT NOT NULL,
    exchange_a_id       TEXT,
    exchange_b_id       TEXT,
    resolution_date     TEXT,
    settlement_source   TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_market_metadata_exchange_a
    ON market_metadata(exchange_a_id);
CREATE INDEX IF NOT EXISTS idx_market_metadata_exchange_b
    ON market_metadata(exchange_b_id);

CREATE TABLE IF NOT EXISTS market_signals (
    id                    TEXT PRIMARY KEY,
    timestamp             TEXT NOT NULL,
    platform              TEXT NOT NULL,
    event_id              TEXT NOT NULL,
    proposition_name      TEXT,
    price                 REAL NOT NULL,
    side                  TEXT NOT NULL,
    size                  REAL NOT NULL,
    liquidity_depth_usd   REAL NOT NULL,
    bid_ask_spread_pct    REAL,
    volume_24h            REAL,
    confidence_flag       TEXT,
    raw_payload           TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_market_signals_event_ts
    ON market_signals(event_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS market_relationships (
    market_key_a        TEXT NOT NULL,
    market_key_b        TEXT NOT NULL,
    relationship_type   TEXT NOT NULL,
    confidence_score    REAL NOT NULL,
    logic_justification TEXT NOT NULL,
    impact_direction    TEXT NOT NULL,
    correlation_strength TEXT NOT NULL,
    logical_layer       TEXT NOT NULL,
    vantage_insight     TEXT NOT NULL,
    probability_a       REAL,
    probability_b       REAL,
    probability_spread  REAL,
    arbitrage_flag      TEXT,
    risk_alert          TEXT,
    updated_at          TEXT NOT NULL,
    PRIMARY KEY (market_key_a, market_key_b)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_relationships_type
    ON market_relationships(relationship_type);

CREATE TABLE IF NOT EXISTS arbitrage_alerts (
    id                    TEXT PRIMARY KEY,
    timestamp             TEXT NOT NULL,
    market_pair           TEXT NOT NULL,
    spread                REAL NOT NULL,
    potential_profit_pct  REAL NOT NULL,
    status                TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_arbitrage_alerts_ts
    ON arbitrage_alerts(timestamp DESC);

CREATE TABLE IF NOT EXISTS scenario_reports (
    id               TEXT PRIMARY KEY,
    query            TEXT NOT NULL,
    trigger_market   TEXT,
    causal_chain     TEXT NOT NULL,
    narrative        TEXT,
    affected_nodes   TEXT NOT NULL,
    affected_edges   TEXT NOT NULL,
    status           TEXT NOT NULL,
    created_at       TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_scenario_reports_created
    ON scenario_reports(created_at DESC);
"#;
