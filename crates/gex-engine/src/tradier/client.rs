//! Tradier market-data REST client
//!
//! Base URL: https://api.tradier.com
//!
//! # Endpoints
//! - GET /v1/markets/quotes - Spot quote for a symbol
//! - GET /v1/markets/options/expirations - Listed expiration dates
//! - GET /v1/markets/options/chains - Option chain with greeks for one expiry
//!
//! Every call is one request/response. Retrying is the caller's decision: HTTP
//! 429 surfaces as `GexError::RateLimited` so the engine can back off.

use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::{ApiKey, EngineConfig};
use crate::error::{GexError, GexResult};
use crate::types::{ChainResponse, ExpirationsResponse, OptionContract, QuotesResponse};
use crate::TRADIER_API_BASE;

const QUOTES_PATH: &str = "/v1/markets/quotes";
const EXPIRATIONS_PATH: &str = "/v1/markets/options/expirations";
const CHAINS_PATH: &str = "/v1/markets/options/chains";

/// Market-data REST client
#[derive(Clone)]
pub struct TradierClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl TradierClient {
    /// Create a new client against the production base URL
    pub fn new(api_key: ApiKey) -> GexResult<Self> {
        Self::with_base_url(TRADIER_API_BASE, api_key)
    }

    /// Create a new client with custom base URL
    pub fn with_base_url(base_url: &str, api_key: ApiKey) -> GexResult<Self> {
        Self::build(base_url, api_key, std::time::Duration::from_secs(30))
    }

    /// Build from engine configuration; a missing API key is a configuration error
    pub fn from_config(config: &EngineConfig) -> GexResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(ApiKey::is_valid)
            .ok_or_else(|| GexError::configuration(format!("{} is not set", crate::API_KEY_ENV)))?;
        Self::build(&config.api_base_url, api_key, config.http_timeout)
    }

    fn build(base_url: &str, api_key: ApiKey, timeout: std::time::Duration) -> GexResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GexError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET request returning the raw body
    pub async fn get_raw(&self, path: &str, params: &[(&str, &str)]) -> GexResult<String> {
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| GexError::configuration(format!("Invalid URL for {}: {}", path, e)))?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(self.api_key.expose())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| GexError::upstream(format!("HTTP request failed for {}: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GexError::rate_limited(format!("HTTP {} for {}", status, path)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GexError::upstream(format!("HTTP {} for {}: {}", status, path, body)));
        }

        response
            .text()
            .await
            .map_err(|e| GexError::upstream(format!("Failed to read body for {}: {}", path, e)))
    }

    /// Last traded price for `symbol`
    ///
    /// Endpoint: GET /v1/markets/quotes?symbols={symbol}
    pub async fn get_spot_price(&self, symbol: &str) -> GexResult<f64> {
        let body = self.get_raw(QUOTES_PATH, &[("symbols", symbol)]).await?;
        let parsed: QuotesResponse = serde_json::from_str(&body)
            .map_err(|e| GexError::upstream(format!("Failed to parse quote for {}: {}", symbol, e)))?;

        let quote = parsed
            .quotes
            .and_then(|q| q.quote.into_iter().find(|q| q.symbol.eq_ignore_ascii_case(symbol)))
            .ok_or_else(|| GexError::upstream(format!("No quote returned for {}", symbol)))?;

        match quote.last {
            Some(last) if last.is_finite() && last > 0.0 => Ok(last),
            other => Err(GexError::upstream(format!("Invalid last price for {}: {:?}", symbol, other))),
        }
    }

    /// Listed expiration dates, ascending
    ///
    /// Endpoint: GET /v1/markets/options/expirations?symbol={symbol}&expirationType=true
    pub async fn get_expiration_dates(&self, symbol: &str) -> GexResult<Vec<NaiveDate>> {
        let body = self
            .get_raw(EXPIRATIONS_PATH, &[("symbol", symbol), ("expirationType", "true")])
            .await?;
        let parsed: ExpirationsResponse = serde_json::from_str(&body).map_err(|e| {
            GexError::upstream(format!("Failed to parse expirations for {}: {}", symbol, e))
        })?;

        let mut dates: Vec<NaiveDate> = parsed
            .expirations
            .map(|e| e.expiration.into_iter().map(|entry| entry.date).collect())
            .unwrap_or_default();
        dates.sort();
        dates.dedup();

        debug!("{} expiration dates for {}", dates.len(), symbol);
        Ok(dates)
    }

    /// Option chain with greeks for one expiry
    ///
    /// Returns the parsed contracts together with the response body as received,
    /// which is what gets persisted.
    ///
    /// Endpoint: GET /v1/markets/options/chains?symbol={symbol}&expiration={date}&greeks=true
    pub async fn fetch_options_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
    ) -> GexResult<(Vec<OptionContract>, String)> {
        let expiration = expiry.format("%Y-%m-%d").to_string();
        let raw = self
            .get_raw(CHAINS_PATH, &[("symbol", symbol), ("expiration", expiration.as_str()), ("greeks", "true")])
            .await?;

        let options = ChainResponse::parse(&raw)?;
        debug!("{} contracts for {} {}", options.len(), symbol, expiration);
        Ok((options, raw))
    }
}

impl std::fmt::Debug for TradierClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradierClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .finish()
    }
}
