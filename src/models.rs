//! Core data model.
//! Two scalar newtypes (`Probability`, `ConfidenceScore`) make the
//! fraction/percent/cents conversions explicit at every boundary instead of
//! letting a bare `f64` drift between representations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A probability in `[0, 1]`. Construct via `from_raw` at ingestion
/// boundaries so the percent-vs-fraction ambiguity is resolved exactly once.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Probability(f64);

impl Probability {
    /// `raw` may be a fraction (`<= 1.0`) or a percent-like value (`> 1.0`,
    /// rescaled by /100). The result is always clamped to `[0, 1]`.
    pub fn from_raw(raw: f64) -> Self {
        let frac = if raw > 1.0 { raw / 100.0 } else { raw };
        Self(frac.clamp(0.0, 1.0))
    }

    pub fn from_fraction_clamped(frac: f64) -> Self {
        Self(frac.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn as_pct(self) -> f64 {
        self.0 * 100.0
    }
}

/// A confidence score, always in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfidenceScore(u8);

impl ConfidenceScore {
    pub fn from_f64_clamped(raw: f64) -> Self {
        Self(raw.round().clamp(0.0, 100.0) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_low(self) -> bool {
        self.0 < 50
    }
}

/// Which side of a quote (buy/sell taker side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

/// Venue identifier. `VenueA` is the order-book exchange, `VenueB` the
/// ticker exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    VenueA,
    VenueB,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::VenueA => "venueA",
            Platform::VenueB => "venueB",
        }
    }
}

/// Immutable catalog entry, externally curated and read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_key: String,
    pub event_name: String,
    pub proposition_text: String,
    pub exchange_a_id: Option<String>,
    pub exchange_b_id: Option<String>,
    pub resolution_date: Option<DateTime<Utc>>,
    pub settlement_source: Option<String>,
}

impl Market {
    /// Identifier priority: exchange A over exchange B. Used uniformly by
    /// the Classifier, Arbitrage Scanner, and Scenario Engine.
    pub fn preferred_identifier(&self) -> Option<&str> {
        self.exchange_a_id
            .as_deref()
            .or(self.exchange_b_id.as_deref())
    }
}

/// Normalized, append-only quote tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub event_id: String,
    pub proposition_name: Option<String>,
    pub price: Probability,
    pub side: Side,
    pub size: f64,
    pub liquidity_depth_usd: f64,
    pub bid_ask_spread_pct: Option<f64>,
    pub volume_24h: Option<f64>,
    pub confidence_flag: Option<String>,
    pub raw_payload: String,
}

impl Quote {
    pub fn probability_pct(&self) -> f64 {
        self.price.as_pct()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Equivalent,
    Implied,
    MutuallyExclusive,
    Correlated,
}

impl RelationshipType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equivalent" => Some(Self::Equivalent),
            "implied" | "implied_conditional" => Some(Self::Implied),
            "mutually_exclusive" | "mutually exclusive" => Some(Self::MutuallyExclusive),
            "correlated" => Some(Self::Correlated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equivalent => "equivalent",
            Self::Implied => "implied",
            Self::MutuallyExclusive => "mutually_exclusive",
            Self::Correlated => "correlated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    Positive,
    Negative,
    Neutral,
}

impl ImpactDirection {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "negative" => Self::Negative,
            "positive" => Self::Positive,
            _ => Self::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    Low,
    Medium,
    High,
    Extreme,
}

impl CorrelationStrength {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "medium" => Self::Medium,
            "high" => Self::High,
            "extreme" => Self::Extreme,
            _ => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Extreme => "extreme",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalLayer {
    Financial,
    Political,
    Statistical,
    Direct,
}

impl LogicalLayer {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "political" => Self::Political,
            "statistical" => Self::Statistical,
            "direct" => Self::Direct,
            _ => Self::Financial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Political => "political",
            Self::Statistical => "statistical",
            Self::Direct => "direct",
        }
    }
}

/// Unordered pair graph edge. `market_key_a < market_key_b` is a standing
/// invariant (canonicalized by `Relationship::new`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub market_key_a: String,
    pub market_key_b: String,
    pub relationship_type: RelationshipType,
    pub confidence_score: f64,
    pub logic_justification: String,
    pub impact_direction: ImpactDirection,
    pub correlation_strength: CorrelationStrength,
    pub logical_layer: LogicalLayer,
    pub vantage_insight: String,
    pub probability_a: Option<f64>,
    pub probability_b: Option<f64>,
    pub probability_spread: Option<f64>,
    pub arbitrage_flag: Option<String>,
    pub risk_alert: Option<String>,
}

impl Relationship {
    /// Canonicalizes key ordering and clamps confidence, regardless of the
    /// order the two markets were classified in.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key_a: String,
        key_b: String,
        relationship_type: RelationshipType,
        confidence_score: f64,
        logic_justification: String,
        impact_direction: ImpactDirection,
        correlation_strength: CorrelationStrength,
        logical_layer: LogicalLayer,
        vantage_insight: String,
        probability_a: Option<f64>,
        probability_b: Option<f64>,
    ) -> Self {
        let (market_key_a, market_key_b, probability_a, probability_b) = if key_a <= key_b {
            (key_a, key_b, probability_a, probability_b)
        } else {
            (key_b, key_a, probability_b, probability_a)
        };

        Self {
            market_key_a,
            market_key_b,
            relationship_type,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            logic_justification,
            impact_direction,
            correlation_strength,
            logical_layer,
            vantage_insight,
            probability_a,
            probability_b,
            probability_spread: None,
            arbitrage_flag: None,
            risk_alert: None,
        }
    }

    pub fn other(&self, market_key: &str) -> Option<&str> {
        if self.market_key_a == market_key {
            Some(&self.market_key_b)
        } else if self.market_key_b == market_key {
            Some(&self.market_key_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Alert,
    Simulated,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageAlert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub market_pair: String,
    pub spread: f64,
    pub potential_profit_pct: f64,
    pub status: AlertStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Some(Self::Up),
            "DOWN" => Some(Self::Down),
            _ => None,
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalStep {
    pub market_key: String,
    pub propagation_order: u32,
    pub relationship_type: RelationshipType,
    pub direction: Direction,
    pub cumulative_confidence: f64,
    pub edge_confidence: f64,
    pub path: Vec<String>,
    pub justification: String,
    pub insight: String,
    pub correlation_strength: CorrelationStrength,
    pub logical_layer: LogicalLayer,
    pub probability_a: Option<f64>,
    pub probability_b: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedEdge {
    pub source: String,
    pub target: String,
    pub relationship_type: RelationshipType,
    pub direction: Direction,
    pub edge_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub id: String,
    pub query: String,
    pub trigger_market: Option<String>,
    pub causal_chain: Vec<CausalStep>,
    pub narrative: Option<String>,
    pub affected_nodes: Vec<String>,
    pub affected_edges: Vec<AffectedEdge>,
    pub status: ScenarioStatus,
    pub created_at: DateTime<Utc>,
}

/// Application configuration, loaded once at startup: `dotenv()` first,
/// then typed `std::env::var` reads with defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,

    pub exchange_a_asset_ids: Vec<String>,
    pub exchange_a_api_key: Option<String>,

    pub exchange_b_tickers: Vec<String>,
    pub exchange_b_api_key: Option<String>,
    pub exchange_b_private_key_base64: Option<String>,

    pub batch_size: usize,
    pub batch_flush_interval_ms: u64,

    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,

    pub arbitrage_poll_interval_ms: u64,
    pub arbitrage_spread_threshold_pct: f64,
    pub arbitrage_liquidity_threshold_usd: f64,

    pub classifier_concurrency: usize,
    pub arbitrage_flag_threshold_pct: f64,
    pub divergence_threshold_pct: f64,
    pub hub_link_threshold: usize,

    pub scenario_max_depth: u32,
    pub scenario_min_path_confidence: f64,

    pub analyst_model_endpoint: Option<String>,
    pub analyst_model_api_key: Option<String>,
    pub analyst_model_name: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            database_path: env_string("PERSISTENT_STORE_URL", "./marketpulse.db"),
            port: env_parse("PORT", 8080),

            exchange_a_asset_ids: env_csv("EXCHANGE_A_ASSET_IDS"),
            exchange_a_api_key: env_opt("EXCHANGE_A_API_KEY"),

            exchange_b_tickers: env_csv("EXCHANGE_B_TICKERS"),
            exchange_b_api_key: env_opt("EXCHANGE_B_API_KEY"),
            exchange_b_private_key_base64: env_opt("EXCHANGE_B_PRIVATE_KEY_BASE64"),

            batch_size: env_parse("BATCH_SIZE", 25),
            batch_flush_interval_ms: env_parse("BATCH_FLUSH_INTERVAL_MS", 2000),

            reconnect_base_delay_ms: env_parse("RECONNECT_BASE_DELAY_MS", 1000),
            reconnect_max_delay_ms: env_parse("RECONNECT_MAX_DELAY_MS", 30000),

            arbitrage_poll_interval_ms: env_parse("ARBITRAGE_POLL_INTERVAL_MS", 30000),
            arbitrage_spread_threshold_pct: env_parse("ARBITRAGE_SPREAD_THRESHOLD_PCT", 3.0),
            arbitrage_liquidity_threshold_usd: env_parse(
                "ARBITRAGE_LIQUIDITY_THRESHOLD_USD",
                500.0,
            ),

            classifier_concurrency: env_parse("CLASSIFIER_CONCURRENCY", 5),
            arbitrage_flag_threshold_pct: env_parse("ARBITRAGE_FLAG_THRESHOLD_PCT", 10.0),
            divergence_threshold_pct: env_parse("DIVERGENCE_THRESHOLD_PCT", 5.0),
            hub_link_threshold: env_parse("HUB_LINK_THRESHOLD", 3),

            scenario_max_depth: env_parse("SCENARIO_MAX_DEPTH", 2),
            scenario_min_path_confidence: env_parse("SCENARIO_MIN_PATH_CONFIDENCE", 0.05),

            analyst_model_endpoint: env_opt("ANALYST_MODEL_ENDPOINT"),
            analyst_model_api_key: env_opt("ANALYST_MODEL_API_KEY"),
            analyst_model_name: env_string("ANALYST_MODEL_NAME", "gpt-4o-mini"),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_clamps_and_rescales() {
        assert_eq!(Probability::from_raw(1.5).value(), 0.015);
        assert_eq!(Probability::from_raw(1.0).value(), 1.0);
        assert_eq!(Probability::from_raw(0.0).value(), 0.0);
        assert_eq!(Probability::from_raw(-0.4).value(), 0.0);
    }

    #[test]
    fn relationship_canonicalizes_key_order() {
        let rel = Relationship::new(
            "zeta".into(),
            "alpha".into(),
            RelationshipType::Equivalent,
            0.9,
            "justification".into(),
            ImpactDirection::Neutral,
            CorrelationStrength::High,
            LogicalLayer::Financial,
            "insight".into(),
            Some(10.0),
            Some(20.0),
        );
        assert_eq!(rel.market_key_a, "alpha");
        assert_eq!(rel.market_key_b, "zeta");
        // probabilities swapped along with the keys
        assert_eq!(rel.probability_a, Some(20.0));
        assert_eq!(rel.probability_b, Some(10.0));
    }

    #[test]
    fn confidence_flag_boundary_is_strict_less_than() {
        assert!(ConfidenceScore::from_f64_clamped(49.9).is_low());
        assert!(!ConfidenceScore::from_f64_clamped(50.0).is_low());
    }
}
