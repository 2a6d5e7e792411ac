//! Snapshot Store
//!
//! # Components
//! - `SnapshotStore`: keyed persistence contract (snapshots, expiry sets, history)
//! - `SqliteStore`: rusqlite-backed implementation
//! - `SnapshotCache`: store + clock + `FreshnessPolicy`; the only place staleness is decided
//! - `Clock`: injectable time source (`SystemClock`, `ManualClock`)
//!
//! Timestamps (`updated_at`, `recorded_at`) are always stamped by the store from
//! its clock, never supplied by callers.

mod clock;
mod freshness;
mod sqlite;

pub use clock::{Clock, ManualClock, SystemClock};
pub use freshness::{FreshnessPolicy, SnapshotCache};
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::GexResult;
use crate::types::{
    ExpiryDateSet, GexHistoryRecord, GexPoint, NewHistoryRecord, NewSnapshot, OptionChainSnapshot,
};

/// Keyed persistence for chains, expiry sets and the GEX audit trail
///
/// Implementations must serialize writes to the same key; writes to different
/// symbols need no coordination between callers.
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot for (symbol, expiry), regardless of age
    fn get_snapshot(&self, symbol: &str, expiry: NaiveDate) -> GexResult<Option<OptionChainSnapshot>>;

    /// Replace the snapshot for (symbol, expiry) entirely
    fn upsert_snapshot(&self, snapshot: NewSnapshot) -> GexResult<OptionChainSnapshot>;

    /// Stored expiry dates for `symbol`, regardless of age
    fn get_expiry_dates(&self, symbol: &str) -> GexResult<Option<ExpiryDateSet>>;

    fn upsert_expiry_dates(&self, symbol: &str, dates: &[NaiveDate]) -> GexResult<ExpiryDateSet>;

    /// Append-only; duplicate timestamps are allowed
    fn append_history(&self, record: NewHistoryRecord) -> GexResult<GexHistoryRecord>;

    /// Upsert the snapshot and append its history record as one unit
    ///
    /// Either both rows are written or neither is.
    fn record_collection(&self, snapshot: NewSnapshot) -> GexResult<(OptionChainSnapshot, GexHistoryRecord)>;

    /// History for `symbol`, ascending by `recorded_at`, optionally from `since` (inclusive)
    fn history(&self, symbol: &str, since: Option<DateTime<Utc>>) -> GexResult<Vec<GexHistoryRecord>>;

    /// Same rows as `history` without the raw chain payload
    fn gex_series(&self, symbol: &str, since: Option<DateTime<Utc>>) -> GexResult<Vec<GexPoint>>;
}
