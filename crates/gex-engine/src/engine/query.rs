//! Read/query path
//!
//! Same cached-or-fetch rules as the collector. Without upstream access the
//! stored data is served whatever its age, and a cold cache yields empty
//! results instead of errors.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::pipeline::Pipeline;
use crate::calculator::{combine, gamma_flip_level, gex_per_strike, top_strikes, total_gex, GexByStrike};
use crate::config::EngineConfig;
use crate::error::GexResult;
use crate::store::{Clock, SnapshotStore};
use crate::types::OptionChainSnapshot;

/// Strikes reported in a profile's top list
pub const TOP_STRIKES_LIMIT: usize = 20;

/// Strikes with |GEX| below this are left out of the top list
pub const MIN_SIGNIFICANT_GEX: f64 = 1000.0;

/// GEX profile of one expiry
#[derive(Clone, Debug, Serialize)]
pub struct GexProfile {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub spot_price: f64,
    pub total_gex: f64,
    pub flip_level: Option<f64>,
    pub gex_by_strike: GexByStrike,
    pub top_strikes: Vec<(f64, f64)>,
    pub updated_at: DateTime<Utc>,
}

impl GexProfile {
    fn from_snapshot(snapshot: &OptionChainSnapshot) -> GexResult<Self> {
        let gex = gex_per_strike(&snapshot.options()?, snapshot.spot_price);
        Ok(Self {
            symbol: snapshot.symbol.clone(),
            expiry: snapshot.expiry_date,
            spot_price: snapshot.spot_price,
            total_gex: total_gex(&gex),
            flip_level: gamma_flip_level(&gex),
            top_strikes: top_strikes(&gex, TOP_STRIKES_LIMIT, MIN_SIGNIFICANT_GEX),
            gex_by_strike: gex,
            updated_at: snapshot.updated_at,
        })
    }
}

/// GEX summed over every listed expiry at one spot price
#[derive(Clone, Debug, Serialize)]
pub struct AllExpiriesGex {
    pub symbol: String,
    pub spot_price: Option<f64>,
    /// Expiries that contributed to the sum
    pub expiries: Vec<NaiveDate>,
    pub total_gex: f64,
    pub flip_level: Option<f64>,
    pub gex_by_strike: GexByStrike,
    pub top_strikes: Vec<(f64, f64)>,
}

impl AllExpiriesGex {
    fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            spot_price: None,
            expiries: Vec::new(),
            total_gex: 0.0,
            flip_level: None,
            gex_by_strike: GexByStrike::new(),
            top_strikes: Vec::new(),
        }
    }
}

/// On-demand GEX reads for presentation layers
#[derive(Clone)]
pub struct GexQuery {
    pipeline: Pipeline,
}

impl GexQuery {
    pub fn new(config: &EngineConfig, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self { pipeline: Pipeline::new(config, store, clock) }
    }

    pub(crate) fn from_pipeline(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Listed expiry dates for `symbol`, ascending
    pub async fn expiry_dates(&self, symbol: &str) -> GexResult<Vec<NaiveDate>> {
        let symbol = symbol.trim().to_uppercase();
        if self.pipeline.has_client() {
            return Ok(self.pipeline.expiry_dates(&symbol).await?.dates);
        }

        let cached = self.pipeline.cache().store().get_expiry_dates(&symbol)?;
        Ok(cached.map(|set| set.dates).unwrap_or_default())
    }

    /// Chain snapshot for (symbol, expiry); a fresh fetch is persisted and recorded in history
    pub async fn chain(&self, symbol: &str, expiry: NaiveDate) -> GexResult<Option<OptionChainSnapshot>> {
        let symbol = symbol.trim().to_uppercase();
        self.chain_at(&symbol, expiry, None).await
    }

    async fn chain_at(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        spot: Option<f64>,
    ) -> GexResult<Option<OptionChainSnapshot>> {
        let cache = self.pipeline.cache();
        if let Some(snapshot) = cache.fresh_snapshot(symbol, expiry)? {
            return Ok(Some(snapshot));
        }

        if !self.pipeline.has_client() {
            debug!("No upstream access, serving stored {} {} if any", symbol, expiry);
            return cache.snapshot(symbol, expiry);
        }

        self.pipeline.fetch_and_persist(symbol, expiry, spot).await.map(Some)
    }

    /// Strike map, total, flip level and top strikes for one expiry
    pub async fn gex_profile(&self, symbol: &str, expiry: NaiveDate) -> GexResult<Option<GexProfile>> {
        match self.chain(symbol, expiry).await? {
            Some(snapshot) => GexProfile::from_snapshot(&snapshot).map(Some),
            None => Ok(None),
        }
    }

    /// Profile of the soonest expiry not before today
    pub async fn nearest_gex_profile(&self, symbol: &str) -> GexResult<Option<GexProfile>> {
        let today = self.pipeline.hours().exchange_date(self.pipeline.cache().now());
        let nearest = self
            .expiry_dates(symbol)
            .await?
            .into_iter()
            .find(|d| *d >= today);

        match nearest {
            Some(expiry) => self.gex_profile(symbol, expiry).await,
            None => Ok(None),
        }
    }

    /// Per-strike GEX summed over all current expiries
    ///
    /// Spot is fetched once and applied to every chain; if that fails the spot
    /// of the first stored snapshot is used. Expiries whose chain cannot be
    /// obtained are skipped.
    pub async fn calculate_gex_for_all_expiries(&self, symbol: &str) -> GexResult<AllExpiriesGex> {
        let symbol = symbol.trim().to_uppercase();
        let today = self.pipeline.hours().exchange_date(self.pipeline.cache().now());
        let expiries: Vec<NaiveDate> = self
            .expiry_dates(&symbol)
            .await?
            .into_iter()
            .filter(|d| *d >= today)
            .collect();

        if expiries.is_empty() {
            return Ok(AllExpiriesGex::empty(&symbol));
        }
        info!("Processing {} expiry dates for {}", expiries.len(), symbol);

        let mut spot = if self.pipeline.has_client() {
            match self.pipeline.spot_price(&symbol).await {
                Ok(spot) => Some(spot),
                Err(e) => {
                    warn!("Spot price for {} unavailable, using stored spot: {}", symbol, e);
                    None
                }
            }
        } else {
            None
        };
        if spot.is_none() {
            spot = self.stored_spot(&symbol, &expiries)?;
        }

        let mut maps = Vec::with_capacity(expiries.len());
        let mut used = Vec::with_capacity(expiries.len());
        for expiry in expiries {
            let snapshot = match self.chain_at(&symbol, expiry, spot).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {} {}: {}", symbol, expiry, e);
                    continue;
                }
            };

            let options = match snapshot.options() {
                Ok(options) => options,
                Err(e) => {
                    warn!("Skipping {} {}: {}", symbol, expiry, e);
                    continue;
                }
            };

            let spot_price = *spot.get_or_insert(snapshot.spot_price);
            maps.push(gex_per_strike(&options, spot_price));
            used.push(expiry);
        }

        let combined = combine(&maps);
        Ok(AllExpiriesGex {
            symbol,
            spot_price: spot,
            expiries: used,
            total_gex: total_gex(&combined),
            flip_level: gamma_flip_level(&combined),
            top_strikes: top_strikes(&combined, TOP_STRIKES_LIMIT, MIN_SIGNIFICANT_GEX),
            gex_by_strike: combined,
        })
    }

    fn stored_spot(&self, symbol: &str, expiries: &[NaiveDate]) -> GexResult<Option<f64>> {
        for expiry in expiries {
            if let Some(snapshot) = self.pipeline.cache().snapshot(symbol, *expiry)? {
                return Ok(Some(snapshot.spot_price));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use crate::store::{ManualClock, SqliteStore};
    use crate::types::{ExpirationType, NewSnapshot};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use wiremock::matchers::{any, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 15, 0, 0).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn chain_body(expiry: &str, call_oi: u64) -> String {
        format!(
            r#"{{"options":{{"option":[
                {{"strike":100.0,"option_type":"call","open_interest":{oi},"expiration_date":"{e}",
                  "expiration_type":"weekly","greeks":{{"gamma":0.05}}}},
                {{"strike":110.0,"option_type":"put","open_interest":10,"expiration_date":"{e}",
                  "expiration_type":"weekly","greeks":{{"gamma":0.05}}}}
            ]}}}}"#,
            oi = call_oi,
            e = expiry
        )
    }

    fn setup(server: Option<&MockServer>) -> (GexQuery, Arc<SqliteStore>, Arc<ManualClock>) {
        let mut config = EngineConfig::default().with_symbols(["SPY"]);
        if let Some(server) = server {
            config.api_base_url = server.uri();
            config.api_key = Some(ApiKey::new("test-token"));
        }
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
        (GexQuery::new(&config, store.clone(), clock.clone()), store, clock)
    }

    async fn mount_upstream(server: &MockServer, quote_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/v1/markets/options/expirations"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"expirations":{"expiration":[
                    {"date":"2025-01-03","expiration_type":"weekly"},
                    {"date":"2025-01-10","expiration_type":"weekly"},
                    {"date":"2025-01-17","expiration_type":"standard"}
                ]}}"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/markets/quotes"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"quotes":{"quote":{"symbol":"SPY","last":100.0}}}"#),
            )
            .expect(quote_calls)
            .mount(server)
            .await;
        for (expiry, oi) in [("2025-01-10", 100), ("2025-01-17", 50)] {
            Mock::given(method("GET"))
                .and(path("/v1/markets/options/chains"))
                .and(query_param("expiration", expiry))
                .respond_with(ResponseTemplate::new(200).set_body_string(chain_body(expiry, oi)))
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_cold_cache_without_upstream_is_empty() {
        let (query, _, _) = setup(None);

        assert!(query.expiry_dates("SPY").await.unwrap().is_empty());
        assert!(query.chain("SPY", d("2025-01-10")).await.unwrap().is_none());
        assert!(query.gex_profile("SPY", d("2025-01-10")).await.unwrap().is_none());

        let all = query.calculate_gex_for_all_expiries("SPY").await.unwrap();
        assert!(all.gex_by_strike.is_empty());
        assert_eq!(all.flip_level, None);
    }

    #[tokio::test]
    async fn test_stale_data_served_without_upstream() {
        let (query, store, clock) = setup(None);
        store
            .upsert_snapshot(NewSnapshot {
                symbol: "SPY".to_string(),
                expiry_date: d("2025-01-10"),
                expiry_type: ExpirationType::Weekly,
                option_chain: chain_body("2025-01-10", 100),
                spot_price: 100.0,
                total_gex: 0.0,
            })
            .unwrap();
        clock.advance(ChronoDuration::hours(3));

        let profile = query.gex_profile("spy", d("2025-01-10")).await.unwrap().unwrap();
        // 100 * 0.05 * 100^2 - 10 * 0.05 * 100^2
        assert_eq!(profile.gex_by_strike.get(100.0), Some(50_000.0));
        assert_eq!(profile.gex_by_strike.get(110.0), Some(-5_000.0));
        assert_eq!(profile.total_gex, 45_000.0);
        assert_eq!(profile.top_strikes, vec![(100.0, 50_000.0), (110.0, -5_000.0)]);
        assert!(profile.flip_level.is_some());
    }

    #[tokio::test]
    async fn test_chain_fetch_is_persisted_with_history() {
        let server = MockServer::start().await;
        mount_upstream(&server, 1).await;
        let (query, store, _) = setup(Some(&server));

        let snapshot = query.chain("SPY", d("2025-01-10")).await.unwrap().unwrap();
        assert_eq!(snapshot.spot_price, 100.0);
        assert_eq!(snapshot.total_gex, 45_000.0);

        // second read inside the freshness window comes from the store
        let again = query.chain("SPY", d("2025-01-10")).await.unwrap().unwrap();
        assert_eq!(again.updated_at, snapshot.updated_at);
        assert_eq!(store.history("SPY", None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_expiries_fetches_spot_once() {
        let server = MockServer::start().await;
        mount_upstream(&server, 1).await;
        let (query, store, _) = setup(Some(&server));

        let all = query.calculate_gex_for_all_expiries("SPY").await.unwrap();
        assert_eq!(all.spot_price, Some(100.0));
        assert_eq!(all.expiries, vec![d("2025-01-10"), d("2025-01-17")]);
        // 50_000 + 25_000 on the call strike, two puts at 110
        assert_eq!(all.gex_by_strike.get(100.0), Some(75_000.0));
        assert_eq!(all.gex_by_strike.get(110.0), Some(-10_000.0));
        assert_eq!(all.total_gex, 65_000.0);

        assert_eq!(store.history("SPY", None).unwrap().len(), 2);
        assert_eq!(query.nearest_gex_profile("SPY").await.unwrap().unwrap().expiry, d("2025-01-10"));
    }

    #[tokio::test]
    async fn test_all_expiries_falls_back_to_stored_spot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/markets/quotes"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(any()).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let (query, store, _) = setup(Some(&server));
        store.upsert_expiry_dates("SPY", &[d("2025-01-10")]).unwrap();
        store
            .upsert_snapshot(NewSnapshot {
                symbol: "SPY".to_string(),
                expiry_date: d("2025-01-10"),
                expiry_type: ExpirationType::Weekly,
                option_chain: chain_body("2025-01-10", 100),
                spot_price: 200.0,
                total_gex: 0.0,
            })
            .unwrap();

        let all = query.calculate_gex_for_all_expiries("SPY").await.unwrap();
        assert_eq!(all.spot_price, Some(200.0));
        assert_eq!(all.gex_by_strike.get(100.0), Some(100.0 * 0.05 * 200.0 * 200.0));
    }
}
