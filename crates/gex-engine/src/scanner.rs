//! GEX Scanner
//!
//! Period-over-period change of total GEX per allow-listed symbol, read from
//! the history trail.
//!
//! - Market open: latest record of the last 30 minutes against the latest
//!   record of the 30 minutes before that. If no symbol has both, every symbol
//!   falls back to its two most recent records.
//! - Market closed: two most recent records.
//!
//! Each item also carries a z-score of the latest value against the symbol's
//! whole history (population standard deviation). Only the GEX series is read;
//! raw chain payloads stay in the store.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::GexResult;
use crate::market_clock::MarketHours;
use crate::store::{Clock, SnapshotStore};
use crate::types::GexPoint;

/// Length of the current and the previous comparison window
const WINDOW_MINUTES: i64 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanSort {
    /// Allow-list order
    #[default]
    Unsorted,
    GexAsc,
    GexDesc,
    ZscoreAbsDesc,
}

impl FromStr for ScanSort {
    type Err = std::convert::Infallible;

    /// Unrecognized values leave the list unsorted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "gex_asc" => ScanSort::GexAsc,
            "gex_desc" => ScanSort::GexDesc,
            "zscore_abs_desc" => ScanSort::ZscoreAbsDesc,
            _ => ScanSort::Unsorted,
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    fn of(change: f64) -> Self {
        if change > 0.0 {
            Direction::Up
        } else if change < 0.0 {
            Direction::Down
        } else {
            Direction::Neutral
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScanItem {
    pub symbol: String,
    pub current_gex: f64,
    pub previous_gex: f64,
    pub gex_change: f64,
    /// Relative to |previous|; 0 when previous is 0
    pub gex_change_pct: f64,
    pub current_price: f64,
    pub expiry_date: NaiveDate,
    pub direction: Direction,
    pub z_score: f64,
}

impl ScanItem {
    fn new(current: &GexPoint, previous: &GexPoint, z_score: f64) -> Self {
        let change = current.gex_value - previous.gex_value;
        let pct = if previous.gex_value != 0.0 { change / previous.gex_value.abs() * 100.0 } else { 0.0 };
        Self {
            symbol: current.symbol.clone(),
            current_gex: current.gex_value,
            previous_gex: previous.gex_value,
            gex_change: change,
            gex_change_pct: pct,
            current_price: current.spot_price,
            expiry_date: current.expiry_date,
            direction: Direction::of(change),
            z_score,
        }
    }
}

/// (latest - mean) / population std-dev; 0 with fewer than two values or no spread
pub fn z_score(values: &[f64]) -> f64 {
    let Some(&latest) = values.last() else {
        return 0.0;
    };
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 || !std_dev.is_finite() {
        0.0
    } else {
        (latest - mean) / std_dev
    }
}

/// Latest record in each of the current and previous windows ending at `now`
fn windowed_pair(
    history: &[GexPoint],
    now: DateTime<Utc>,
) -> Option<(&GexPoint, &GexPoint)> {
    let current_start = now - Duration::minutes(WINDOW_MINUTES);
    let previous_start = now - Duration::minutes(2 * WINDOW_MINUTES);

    let current = history
        .iter()
        .rev()
        .find(|r| r.recorded_at >= current_start && r.recorded_at <= now)?;
    let previous = history
        .iter()
        .rev()
        .find(|r| r.recorded_at >= previous_start && r.recorded_at < current_start)?;
    Some((current, previous))
}

fn latest_pair(history: &[GexPoint]) -> Option<(&GexPoint, &GexPoint)> {
    match history {
        [.., previous, current] => Some((current, previous)),
        _ => None,
    }
}

/// Read-only scanner over the GEX history trail
#[derive(Clone)]
pub struct GexScanner {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    hours: MarketHours,
    symbols: Vec<String>,
}

impl GexScanner {
    pub fn new(config: &EngineConfig, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            hours: config.market_hours.clone(),
            symbols: config.symbols.clone(),
        }
    }

    pub fn scan(&self, sort: ScanSort) -> GexResult<Vec<ScanItem>> {
        let now = self.clock.now();

        let mut histories = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let history = self.store.gex_series(symbol, None)?;
            if !history.is_empty() {
                histories.push(history);
            }
        }

        let mut items = Vec::new();
        if self.hours.is_open(now) {
            items = build_items(&histories, |h| windowed_pair(h, now));
            if items.is_empty() {
                debug!("No windowed GEX changes, falling back to latest records");
            }
        }
        if items.is_empty() {
            items = build_items(&histories, latest_pair);
        }

        sort_items(&mut items, sort);
        Ok(items)
    }
}

fn build_items<'a, F>(histories: &'a [Vec<GexPoint>], pick: F) -> Vec<ScanItem>
where
    F: Fn(&'a [GexPoint]) -> Option<(&'a GexPoint, &'a GexPoint)>,
{
    histories
        .iter()
        .filter_map(|history| {
            let (current, previous) = pick(history.as_slice())?;
            let values: Vec<f64> = history.iter().map(|r| r.gex_value).collect();
            Some(ScanItem::new(current, previous, z_score(&values)))
        })
        .collect()
}

fn sort_items(items: &mut [ScanItem], sort: ScanSort) {
    match sort {
        ScanSort::Unsorted => {}
        ScanSort::GexAsc => items.sort_by(|a, b| a.current_gex.total_cmp(&b.current_gex)),
        ScanSort::GexDesc => items.sort_by(|a, b| b.current_gex.total_cmp(&a.current_gex)),
        ScanSort::ZscoreAbsDesc => items.sort_by(|a, b| b.z_score.abs().total_cmp(&a.z_score.abs())),
    }
}
