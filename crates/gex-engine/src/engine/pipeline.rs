//! Per-symbol collection steps shared by the scheduler and the query path
//!
//! ResolveExpiry -> FetchOrReuse -> Compute -> Persist. Every upstream call
//! goes through `with_retry`, which absorbs exactly one rate limit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::calculator::{gex_per_strike, total_gex};
use crate::config::EngineConfig;
use crate::error::{GexError, GexResult};
use crate::market_clock::MarketHours;
use crate::store::{Clock, SnapshotCache, SnapshotStore};
use crate::tradier::TradierClient;
use crate::types::{ExpiryDateSet, NewSnapshot, OptionChainSnapshot, SymbolStatus};

#[derive(Clone)]
pub(crate) struct Pipeline {
    client: Result<TradierClient, String>,
    cache: SnapshotCache,
    hours: MarketHours,
    rate_limit_backoff: Duration,
}

impl Pipeline {
    pub(crate) fn new(config: &EngineConfig, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        let client = TradierClient::from_config(config).map_err(|e| e.to_string());
        let cache = SnapshotCache::new(store, clock, config.freshness.clone(), config.market_hours.clone());

        Self {
            client,
            cache,
            hours: config.market_hours.clone(),
            rate_limit_backoff: config.rate_limit_backoff,
        }
    }

    pub(crate) fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub(crate) fn hours(&self) -> &MarketHours {
        &self.hours
    }

    /// Upstream client, or the reason there is none
    pub(crate) fn client(&self) -> GexResult<&TradierClient> {
        self.client.as_ref().map_err(|e| GexError::configuration(e.clone()))
    }

    pub(crate) fn has_client(&self) -> bool {
        self.client.is_ok()
    }

    /// Run `call`; on a rate limit sleep the backoff and run it exactly once more
    pub(crate) async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> GexResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GexResult<T>>,
    {
        match call().await {
            Err(e) if e.is_rate_limited() => {
                warn!("Rate limited on {}, retrying in {:?}", what, self.rate_limit_backoff);
                tokio::time::sleep(self.rate_limit_backoff).await;
                call().await.map_err(GexError::into_upstream)
            }
            other => other,
        }
    }

    /// Fresh cached expiry dates, otherwise fetched and written through
    pub(crate) async fn expiry_dates(&self, symbol: &str) -> GexResult<ExpiryDateSet> {
        if let Some(set) = self.cache.fresh_expiry_dates(symbol)? {
            debug!("Using cached expiry dates for {}", symbol);
            return Ok(set);
        }

        let client = self.client()?;
        let dates = self
            .with_retry("expirations", move || client.get_expiration_dates(symbol))
            .await?;
        self.cache.save_expiry_dates(symbol, &dates)
    }

    /// Soonest listed expiry not before today's exchange-local date
    pub(crate) async fn nearest_expiry(&self, symbol: &str) -> GexResult<NaiveDate> {
        let set = self.expiry_dates(symbol).await?;
        let today = self.hours.exchange_date(self.cache.now());
        set.nearest_on_or_after(today)
            .ok_or_else(|| GexError::NoExpiryDates(symbol.to_string()))
    }

    pub(crate) async fn spot_price(&self, symbol: &str) -> GexResult<f64> {
        let client = self.client()?;
        self.with_retry("quote", move || client.get_spot_price(symbol)).await
    }

    /// Fetch one chain, compute GEX at `spot` (fetched if not given) and persist it
    pub(crate) async fn fetch_and_persist(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        spot: Option<f64>,
    ) -> GexResult<OptionChainSnapshot> {
        let client = self.client()?;
        let (options, raw) = self
            .with_retry("option chain", move || client.fetch_options_chain(symbol, expiry))
            .await?;

        let spot_price = match spot {
            Some(spot) => spot,
            None => self.spot_price(symbol).await?,
        };

        let gex = gex_per_strike(&options, spot_price);
        let expiry_type = options.first().map(|o| o.expiration_type).unwrap_or_default();

        let (snapshot, _) = self.cache.persist_collection(NewSnapshot {
            symbol: symbol.to_string(),
            expiry_date: expiry,
            expiry_type,
            option_chain: raw,
            spot_price,
            total_gex: total_gex(&gex),
        })?;

        debug!(
            "Persisted {} {}: {} contracts, {} strikes, total GEX {:.0}",
            symbol,
            expiry,
            options.len(),
            gex.len(),
            snapshot.total_gex
        );
        Ok(snapshot)
    }

    /// One symbol's full collection step for the nearest expiry
    pub(crate) async fn collect_nearest(&self, symbol: &str) -> GexResult<SymbolStatus> {
        let expiry = self.nearest_expiry(symbol).await?;

        if self.cache.fresh_snapshot(symbol, expiry)?.is_some() {
            debug!("Fresh snapshot for {} {}, skipping fetch", symbol, expiry);
            return Ok(SymbolStatus::Cached { expiry });
        }

        let snapshot = self.fetch_and_persist(symbol, expiry, None).await?;
        Ok(SymbolStatus::Collected {
            expiry,
            total_gex: snapshot.total_gex,
            spot_price: snapshot.spot_price,
        })
    }
}
