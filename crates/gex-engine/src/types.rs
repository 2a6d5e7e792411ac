//! Data model and upstream wire types
//!
//! # Design Principles
//! 1. Raw chain payloads are persisted verbatim; parsed contracts are derived on read
//! 2. Single-element upstream lists may arrive as a bare object - both shapes are accepted
//! 3. Unrecognized enum values fall back to `Unknown` - never fail a whole chain on one field
//!
//! # Sources
//! - Quotes: https://documentation.tradier.com/brokerage-api/markets/get-quotes
//! - Chains: https://documentation.tradier.com/brokerage-api/markets/get-options-chains

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{GexError, GexResult};

// ============================================================================
// Options
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

/// Expiration cycle of a listed option
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationType {
    Standard,
    #[serde(alias = "weeklys")]
    Weekly,
    #[serde(alias = "quarterlys")]
    Quarterly,
    Eom,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ExpirationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationType::Standard => "standard",
            ExpirationType::Weekly => "weekly",
            ExpirationType::Quarterly => "quarterly",
            ExpirationType::Eom => "eom",
            ExpirationType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "standard" => ExpirationType::Standard,
            "weekly" | "weeklys" => ExpirationType::Weekly,
            "quarterly" | "quarterlys" => ExpirationType::Quarterly,
            "eom" => ExpirationType::Eom,
            _ => ExpirationType::Unknown,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Greeks {
    #[serde(default)]
    pub gamma: Option<f64>,
}

/// One listed option contract as returned by the chains endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OptionContract {
    pub strike: f64,

    pub option_type: OptionType,

    #[serde(default, deserialize_with = "deserialize_null_as_zero")]
    pub open_interest: u64,

    pub expiration_date: NaiveDate,

    #[serde(default)]
    pub expiration_type: ExpirationType,

    /// Absent when the provider has not computed greeks yet
    #[serde(default)]
    pub greeks: Option<Greeks>,
}

impl OptionContract {
    /// Gamma as reported upstream; missing greeks count as zero
    pub fn gamma(&self) -> f64 {
        self.greeks.as_ref().and_then(|g| g.gamma).unwrap_or(0.0)
    }
}

// ============================================================================
// Upstream Responses
// ============================================================================

/// GET /v1/markets/quotes
#[derive(Clone, Debug, Deserialize)]
pub struct QuotesResponse {
    #[serde(default)]
    pub quotes: Option<QuotesBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QuotesBody {
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub quote: Vec<Quote>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Last trade price (spot)
    #[serde(default)]
    pub last: Option<f64>,
}

/// GET /v1/markets/options/expirations?expirationType=true
#[derive(Clone, Debug, Deserialize)]
pub struct ExpirationsResponse {
    #[serde(default)]
    pub expirations: Option<ExpirationsBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExpirationsBody {
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub expiration: Vec<ExpirationEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExpirationEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub expiration_type: ExpirationType,
}

/// GET /v1/markets/options/chains
#[derive(Clone, Debug, Deserialize)]
pub struct ChainResponse {
    #[serde(default)]
    pub options: Option<ChainBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChainBody {
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub option: Vec<OptionContract>,
}

impl ChainResponse {
    /// Parse a raw chain payload (as fetched or as persisted)
    pub fn parse(raw: &str) -> GexResult<Vec<OptionContract>> {
        let response: ChainResponse = serde_json::from_str(raw)
            .map_err(|e| GexError::upstream(format!("Invalid option chain payload: {}", e)))?;
        Ok(response.options.map(|b| b.option).unwrap_or_default())
    }
}

/// Accept `[a, b]`, a bare `a`, or null/missing
fn deserialize_one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

fn deserialize_null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

// ============================================================================
// Persisted Records
// ============================================================================

/// Latest option chain for a (symbol, expiry) key
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OptionChainSnapshot {
    pub symbol: String,
    pub expiry_date: NaiveDate,
    pub expiry_type: ExpirationType,
    /// Upstream response body, verbatim
    pub option_chain: String,
    pub spot_price: f64,
    pub total_gex: f64,
    /// Stamped by the store at write time
    pub updated_at: DateTime<Utc>,
}

impl OptionChainSnapshot {
    pub fn options(&self) -> GexResult<Vec<OptionContract>> {
        ChainResponse::parse(&self.option_chain)
    }
}

/// Write-side payload for `SnapshotStore::upsert_snapshot`
#[derive(Clone, Debug)]
pub struct NewSnapshot {
    pub symbol: String,
    pub expiry_date: NaiveDate,
    pub expiry_type: ExpirationType,
    pub option_chain: String,
    pub spot_price: f64,
    pub total_gex: f64,
}

/// Known expiration dates for a symbol, ascending
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExpiryDateSet {
    pub symbol: String,
    pub dates: Vec<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl ExpiryDateSet {
    /// Soonest date that has not already passed as of `today`
    pub fn nearest_on_or_after(&self, today: NaiveDate) -> Option<NaiveDate> {
        self.dates.iter().copied().filter(|d| *d >= today).min()
    }
}

/// Append-only audit row written on every fresh collection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GexHistoryRecord {
    pub id: Uuid,
    pub symbol: String,
    pub expiry_date: NaiveDate,
    pub expiry_type: ExpirationType,
    pub option_chain: String,
    pub gex_value: f64,
    pub spot_price: f64,
    pub recorded_at: DateTime<Utc>,
}

/// One point of the GEX trail, without the chain payload
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GexPoint {
    pub symbol: String,
    pub expiry_date: NaiveDate,
    pub gex_value: f64,
    pub spot_price: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewHistoryRecord {
    pub symbol: String,
    pub expiry_date: NaiveDate,
    pub expiry_type: ExpirationType,
    pub option_chain: String,
    pub gex_value: f64,
    pub spot_price: f64,
}

impl From<&NewSnapshot> for NewHistoryRecord {
    fn from(s: &NewSnapshot) -> Self {
        NewHistoryRecord {
            symbol: s.symbol.clone(),
            expiry_date: s.expiry_date,
            expiry_type: s.expiry_type,
            option_chain: s.option_chain.clone(),
            gex_value: s.total_gex,
            spot_price: s.spot_price,
        }
    }
}

// ============================================================================
// Collection Results
// ============================================================================

/// What happened to one symbol during a cycle
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolStatus {
    /// Fetched upstream, persisted and appended to history
    Collected { expiry: NaiveDate, total_gex: f64, spot_price: f64 },
    /// Served from a fresh snapshot; nothing fetched or appended
    Cached { expiry: NaiveDate },
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: String,
    #[serde(flatten)]
    pub status: SymbolStatus,
}

impl SymbolOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, SymbolStatus::Failed { .. })
    }
}

/// Why a cycle dispatched nothing
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MarketClosed,
    Configuration(String),
}

/// Summary of one collection cycle
#[derive(Clone, Debug, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub skipped: Option<SkipReason>,
    pub dispatched: usize,
    pub collected: usize,
    pub cached: usize,
    pub failed: usize,
    /// Symbols with no result before the cycle deadline
    pub unfinished: usize,
    pub outcomes: Vec<SymbolOutcome>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self { started_at: Some(started_at), ..Self::default() }
    }

    pub fn skipped(started_at: DateTime<Utc>, reason: SkipReason) -> Self {
        Self { started_at: Some(started_at), skipped: Some(reason), ..Self::default() }
    }

    pub fn record(&mut self, outcome: SymbolOutcome) {
        match outcome.status {
            SymbolStatus::Collected { .. } => self.collected += 1,
            SymbolStatus::Cached { .. } => self.cached += 1,
            SymbolStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.collected + self.cached
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|o| o.symbol == symbol)
    }
}
