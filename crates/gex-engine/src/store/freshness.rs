//! Freshness policy
//!
//! Wall-clock staleness rules live here and nowhere else. Callers ask for a
//! *fresh* snapshot or expiry set and get `None` when they must refetch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::debug;

use super::{Clock, SnapshotStore};
use crate::error::GexResult;
use crate::market_clock::MarketHours;
use crate::types::{ExpiryDateSet, GexHistoryRecord, NewSnapshot, OptionChainSnapshot};

/// Maximum ages for cached data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// A chain snapshot older than this is refetched
    pub chain_max_age: Duration,
    /// An expiry-date set older than this is refetched
    pub expiry_dates_max_age: Duration,
    /// Refetch expiry dates when the nearest one expires within this window
    pub expiry_roll_guard: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            chain_max_age: Duration::from_secs(10 * 60),
            expiry_dates_max_age: Duration::from_secs(24 * 60 * 60),
            expiry_roll_guard: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Age of `then` at `now`; a timestamp in the future counts as age zero
fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

impl FreshnessPolicy {
    pub fn is_snapshot_fresh(&self, snapshot: &OptionChainSnapshot, now: DateTime<Utc>) -> bool {
        age(now, snapshot.updated_at) <= self.chain_max_age
    }

    /// Fresh iff recent enough, non-empty, and its nearest date is outside the roll guard
    pub fn is_expiry_set_fresh(
        &self,
        set: &ExpiryDateSet,
        now: DateTime<Utc>,
        hours: &MarketHours,
    ) -> bool {
        if age(now, set.updated_at) > self.expiry_dates_max_age {
            return false;
        }

        let Some(nearest) = set.nearest_on_or_after(hours.exchange_date(now)) else {
            return false;
        };

        let expires_at = session_close(nearest, hours);
        match (expires_at - now).to_std() {
            Ok(remaining) => remaining >= self.expiry_roll_guard,
            Err(_) => false,
        }
    }
}

/// Instant the regular session closes on `date`
fn session_close(date: NaiveDate, hours: &MarketHours) -> DateTime<Utc> {
    let local = date.and_time(hours.close);
    hours
        .tz()
        .and_then(|tz| tz.from_local_datetime(&local).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Snapshot store wrapped with a clock and freshness policy
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    policy: FreshnessPolicy,
    hours: MarketHours,
}

impl SnapshotCache {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        policy: FreshnessPolicy,
        hours: MarketHours,
    ) -> Self {
        Self { store, clock, policy, hours }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Snapshot for the key if it is within `chain_max_age`
    pub fn fresh_snapshot(&self, symbol: &str, expiry: NaiveDate) -> GexResult<Option<OptionChainSnapshot>> {
        let now = self.now();
        Ok(self.store.get_snapshot(symbol, expiry)?.filter(|s| {
            let fresh = self.policy.is_snapshot_fresh(s, now);
            if !fresh {
                debug!("Snapshot {} {} is stale (updated_at {})", symbol, expiry, s.updated_at);
            }
            fresh
        }))
    }

    /// Snapshot for the key of any age
    pub fn snapshot(&self, symbol: &str, expiry: NaiveDate) -> GexResult<Option<OptionChainSnapshot>> {
        self.store.get_snapshot(symbol, expiry)
    }

    /// Cached expiry dates, or `None` if missing, stale or about to roll off
    pub fn fresh_expiry_dates(&self, symbol: &str) -> GexResult<Option<ExpiryDateSet>> {
        let now = self.now();
        Ok(self
            .store
            .get_expiry_dates(symbol)?
            .filter(|set| self.policy.is_expiry_set_fresh(set, now, &self.hours)))
    }

    pub fn save_expiry_dates(&self, symbol: &str, dates: &[NaiveDate]) -> GexResult<ExpiryDateSet> {
        self.store.upsert_expiry_dates(symbol, dates)
    }

    /// Write-through for a fresh fetch: snapshot and history land together or not at all
    pub fn persist_collection(
        &self,
        snapshot: NewSnapshot,
    ) -> GexResult<(OptionChainSnapshot, GexHistoryRecord)> {
        self.store.record_collection(snapshot)
    }
}
