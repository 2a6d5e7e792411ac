//! Engine configuration
//!
//! Everything the core needs is carried in `EngineConfig` and handed to
//! constructors; nothing is read from the environment after startup.
//!
//! Expected env vars (see `EngineConfig::from_env`):
//! - TRADIER_API_KEY
//! - TRADIER_API_BASE (optional, defaults to production)

use std::time::Duration;

use crate::market_clock::MarketHours;
use crate::store::FreshnessPolicy;
use crate::{API_BASE_ENV, API_KEY_ENV, TRADIER_API_BASE};

/// Bearer token for the market-data provider
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read the key from `TRADIER_API_KEY`; empty values count as missing
    pub fn from_env() -> Option<Self> {
        let key = std::env::var(API_KEY_ENV).ok()?;
        let key = Self(key.trim().to_string());
        key.is_valid().then_some(key)
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey")
            .field(&format!("{}...", &self.0.chars().take(4).collect::<String>()))
            .finish()
    }
}

/// Collection engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Allow-listed symbols, collected in this order
    pub symbols: Vec<String>,
    /// Upstream REST base URL
    pub api_base_url: String,
    /// Upstream token; cycles are skipped while missing
    pub api_key: Option<ApiKey>,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Time between collection cycles
    pub collection_interval: Duration,
    /// Concurrent workers per cycle
    pub worker_count: usize,
    /// Pause each worker takes between symbols
    pub request_delay: Duration,
    /// Sleep before the single retry of a rate-limited call
    pub rate_limit_backoff: Duration,
    /// Wall-clock bound for a whole cycle, including every call inside it
    pub cycle_timeout: Duration,
    pub freshness: FreshnessPolicy,
    pub market_hours: MarketHours,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: sp500_symbols(),
            api_base_url: TRADIER_API_BASE.to_string(),
            api_key: None,
            http_timeout: Duration::from_secs(30),
            collection_interval: Duration::from_secs(30 * 60),
            worker_count: 5,
            request_delay: Duration::from_millis(250),
            rate_limit_backoff: Duration::from_secs(5),
            cycle_timeout: Duration::from_secs(30 * 60),
            freshness: FreshnessPolicy::default(),
            market_hours: MarketHours::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults plus API key and base URL from the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key = ApiKey::from_env();
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                config.api_base_url = base.trim().to_string();
            }
        }
        config
    }

    /// Replace the allow-list; symbols are upper-cased and deduplicated, order kept
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.symbols = normalize_symbols(symbols);
        self
    }
}

pub fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for s in symbols {
        let s = s.as_ref().trim().to_uppercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/// Large-cap S&P 500 constituents plus widely traded growth names
pub fn sp500_symbols() -> Vec<String> {
    [
        "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "META", "TSLA", "BRK.B",
        "AVGO", "LLY", "JPM", "UNH", "XOM", "V", "MA", "PG",
        "COST", "JNJ", "HD", "ABBV", "NFLX", "CRM", "BAC", "CVX",
        "KO", "WMT", "MRK", "ORCL", "AMD", "PEP", "TMO", "ADBE",
        "ACN", "LIN", "CSCO", "MCD", "ABT", "DHR", "INTC", "TXN",
        "NKE", "DIS", "VZ", "CMCSA", "WFC", "PM", "COP", "NEE",
        "IBM", "QCOM", "UNP", "RTX", "INTU", "LOW", "AMGN", "HON",
        "GE", "BA", "SPGI", "CAT", "BLK", "UPS", "SBUX", "AXP",
        "DE", "GILD", "ELV", "BKNG", "ADI", "PLD", "MMC", "TJX",
        "MDLZ", "VRTX", "SYK", "ADP", "ISRG", "CI", "REGN", "AMT",
        "ZTS", "PGR", "SCHW", "CB", "SO", "DUK", "CME", "BSX",
        "ETN", "FISV", "MO", "ITW", "BDX", "APH", "MMM", "NOC",
        "HCA", "PNC", "GD", "CL", "USB", "SHW", "AON", "EMR",
        "MU", "PANW", "SNPS", "CDNS", "KLAC", "AMAT", "LRCX", "MRVL",
        "FTNT", "CRWD", "DDOG", "NET", "ZS", "SNOW", "TEAM", "NOW",
        "WDAY", "PLTR", "SQ", "SHOP", "ROKU", "ZM", "DOCU", "OKTA",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_debug_redacts() {
        let key = ApiKey::new("abcd_super_secret_token");
        let debug_str = format!("{:?}", key);
        assert!(!debug_str.contains("super_secret"));
        assert!(debug_str.contains("abcd"));
    }

    #[test]
    fn test_api_key_validity() {
        assert!(ApiKey::new("token").is_valid());
        assert!(!ApiKey::new("").is_valid());
    }

    #[test]
    fn test_symbols_normalized() {
        let config = EngineConfig::default().with_symbols(["spy", " QQQ ", "SPY", "", "iwm"]);
        assert_eq!(config.symbols, vec!["SPY", "QQQ", "IWM"]);
    }

    #[test]
    fn test_production_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.collection_interval, Duration::from_secs(1800));
        assert_eq!(config.rate_limit_backoff, Duration::from_secs(5));
        assert!(config.api_key.is_none());
        assert!(config.symbols.contains(&"AAPL".to_string()));
    }
}
