//! GEX Calculator
//!
//! Pure functions over an option chain:
//! - `gex_per_strike`: signed gamma exposure per strike, `oi * gamma * spot^2`,
//!   calls added and puts subtracted
//! - `gamma_flip_level`: price at which cumulative GEX across ascending strikes
//!   changes sign, linearly interpolated between the bracketing strikes
//! - `total_gex`, `combine`, `top_strikes`: aggregation helpers
//!
//! Strikes are kept in a `BTreeMap`, so every reduction walks them in ascending
//! order regardless of how the map was built.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::types::{OptionContract, OptionType};

/// Strike price usable as an ordered map key
#[derive(Clone, Copy, Debug)]
pub struct Strike(pub f64);

impl Strike {
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Strike {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Strike {}

impl PartialOrd for Strike {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Strike {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Signed GEX per strike, ascending by strike
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GexByStrike(BTreeMap<Strike, f64>);

/// Serialized as `[[strike, gex], ...]` in ascending strike order
impl Serialize for GexByStrike {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl GexByStrike {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (strike, gex) pairs; repeated strikes accumulate
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut map = Self::new();
        for (strike, gex) in pairs {
            map.add(strike, gex);
        }
        map
    }

    pub fn add(&mut self, strike: f64, gex: f64) {
        *self.0.entry(Strike(strike)).or_insert(0.0) += gex;
    }

    pub fn get(&self, strike: f64) -> Option<f64> {
        self.0.get(&Strike(strike)).copied()
    }

    pub fn contains(&self, strike: f64) -> bool {
        self.0.contains_key(&Strike(strike))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// (strike, gex) in ascending strike order
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.0.iter().map(|(k, v)| (k.0, *v))
    }

    pub fn strikes(&self) -> Vec<f64> {
        self.0.keys().map(|k| k.0).collect()
    }
}

/// True when an option contributes to GEX at all
fn contributes(option: &OptionContract) -> bool {
    option.open_interest > 0 && option.gamma() != 0.0
}

/// Signed gamma exposure per strike
///
/// Options with zero open interest or zero gamma are skipped; a strike with no
/// contributing option is absent from the result rather than present as 0.
pub fn gex_per_strike(options: &[OptionContract], spot_price: f64) -> GexByStrike {
    let spot_sq = spot_price * spot_price;
    let mut gex = GexByStrike::new();

    for option in options.iter().filter(|o| contributes(o)) {
        let contribution = option.open_interest as f64 * option.gamma() * spot_sq;
        match option.option_type {
            OptionType::Call => gex.add(option.strike, contribution),
            OptionType::Put => gex.add(option.strike, -contribution),
        }
    }

    gex
}

/// Sum of all strikes - the scalar stored in history
pub fn total_gex(gex: &GexByStrike) -> f64 {
    gex.iter().map(|(_, v)| v).sum()
}

/// Per-strike sum of several maps (e.g. one per expiry)
pub fn combine<'a>(maps: impl IntoIterator<Item = &'a GexByStrike>) -> GexByStrike {
    let mut combined = GexByStrike::new();
    for map in maps {
        for (strike, gex) in map.iter() {
            combined.add(strike, gex);
        }
    }
    combined
}

/// First zero crossing of `values` walked in ascending strike order
///
/// Returns the strike where `values` changes sign relative to the previous
/// strike, interpolated linearly between the two. Zeros before the first
/// non-zero value are skipped.
fn first_crossing(points: &[(f64, f64)]) -> Option<f64> {
    let mut prev: Option<(f64, f64)> = None;

    for &(strike, value) in points {
        if let Some((prev_strike, prev_value)) = prev {
            let crossed = (prev_value > 0.0 && value <= 0.0) || (prev_value < 0.0 && value >= 0.0);
            if crossed {
                let fraction = prev_value / (prev_value - value);
                return Some(prev_strike + (strike - prev_strike) * fraction);
            }
        }
        if value != 0.0 {
            prev = Some((strike, value));
        }
    }

    None
}

/// Gamma flip level
///
/// 1. Cumulative GEX over ascending strikes; the first sign change is the flip.
/// 2. If the cumulative never changes sign, the first sign change of the
///    per-strike net GEX is used instead.
/// 3. No sign change at all: positive throughout returns the lowest strike
///    (flip below the observed range), negative throughout the highest.
///
/// Returns `None` for an empty map.
pub fn gamma_flip_level(gex: &GexByStrike) -> Option<f64> {
    let (first, last) = match (gex.0.keys().next(), gex.0.keys().next_back()) {
        (Some(first), Some(last)) => (first.0, last.0),
        _ => return None,
    };

    let net: Vec<(f64, f64)> = gex.iter().collect();

    let mut running = 0.0;
    let cumulative: Vec<(f64, f64)> = net
        .iter()
        .map(|&(strike, value)| {
            running += value;
            (strike, running)
        })
        .collect();

    if let Some(level) = first_crossing(&cumulative) {
        return Some(level);
    }
    if let Some(level) = first_crossing(&net) {
        return Some(level);
    }

    if running >= 0.0 {
        Some(first)
    } else {
        Some(last)
    }
}

/// Strikes by descending |GEX|, dropping those below `min_abs`, at most `limit`
pub fn top_strikes(gex: &GexByStrike, limit: usize, min_abs: f64) -> Vec<(f64, f64)> {
    let mut entries: Vec<(f64, f64)> = gex.iter().filter(|(_, v)| v.abs() >= min_abs).collect();
    entries.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then(a.0.total_cmp(&b.0)));
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExpirationType, Greeks};
    use chrono::NaiveDate;

    fn option(strike: f64, option_type: OptionType, open_interest: u64, gamma: f64) -> OptionContract {
        OptionContract {
            strike,
            option_type,
            open_interest,
            expiration_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            expiration_type: ExpirationType::Weekly,
            greeks: Some(Greeks { gamma: Some(gamma) }),
        }
    }

    #[test]
    fn test_excludes_zero_open_interest_and_zero_gamma() {
        let options = vec![
            option(580.0, OptionType::Call, 0, 0.05),
            option(590.0, OptionType::Call, 100, 0.0),
            option(600.0, OptionType::Put, 0, 0.0),
            option(610.0, OptionType::Call, 10, 0.01),
        ];

        let gex = gex_per_strike(&options, 100.0);
        assert_eq!(gex.len(), 1);
        assert!(!gex.contains(580.0));
        assert!(!gex.contains(590.0));
        assert!(!gex.contains(600.0));
        assert!(gex.contains(610.0));
    }

    #[test]
    fn test_missing_greeks_excluded() {
        let mut opt = option(500.0, OptionType::Call, 100, 0.0);
        opt.greeks = None;
        assert!(gex_per_strike(&[opt], 500.0).is_empty());
    }

    #[test]
    fn test_formula_calls_minus_puts() {
        let spot = 590.0;
        let options = vec![
            option(590.0, OptionType::Call, 1200, 0.021),
            option(590.0, OptionType::Put, 800, 0.019),
            option(600.0, OptionType::Put, 300, 0.015),
        ];

        let gex = gex_per_strike(&options, spot);
        let expected_590 = 1200.0 * 0.021 * spot * spot - 800.0 * 0.019 * spot * spot;
        let expected_600 = -(300.0 * 0.015 * spot * spot);

        assert!((gex.get(590.0).unwrap() - expected_590).abs() < 1e-6);
        assert!((gex.get(600.0).unwrap() - expected_600).abs() < 1e-6);
        assert!((total_gex(&gex) - (expected_590 + expected_600)).abs() < 1e-6);
    }

    #[test]
    fn test_negative_gamma_is_kept_signed() {
        let gex = gex_per_strike(&[option(100.0, OptionType::Call, 10, -0.5)], 10.0);
        assert_eq!(gex.get(100.0), Some(-500.0));
    }

    #[test]
    fn test_flip_between_positive_and_negative_strikes() {
        let gex = GexByStrike::from_pairs([
            (580.0, 100_000.0),
            (590.0, 50_000.0),
            (600.0, -20_000.0),
            (610.0, -40_000.0),
        ]);

        let flip = gamma_flip_level(&gex).unwrap();
        assert!(flip > 590.0 && flip < 600.0, "flip = {}", flip);
    }

    #[test]
    fn test_flip_all_positive_returns_lowest_strike() {
        let gex = GexByStrike::from_pairs([(580.0, 100_000.0), (590.0, 50_000.0), (600.0, 25_000.0)]);
        assert_eq!(gamma_flip_level(&gex), Some(580.0));
    }

    #[test]
    fn test_flip_all_negative_returns_highest_strike() {
        let gex = GexByStrike::from_pairs([(580.0, -100_000.0), (590.0, -50_000.0), (600.0, -25_000.0)]);
        assert_eq!(gamma_flip_level(&gex), Some(600.0));
    }

    #[test]
    fn test_flip_cumulative_crossing_is_interpolated() {
        // cumulative: -100, -50, +50 -> zero crossing halfway between 110 and 120
        let gex = GexByStrike::from_pairs([(100.0, -100.0), (110.0, 50.0), (120.0, 100.0)]);
        let flip = gamma_flip_level(&gex).unwrap();
        assert!((flip - 115.0).abs() < 1e-9, "flip = {}", flip);
    }

    #[test]
    fn test_flip_cumulative_takes_precedence() {
        // per-strike sign changes at 110 already, cumulative only at 130
        let gex = GexByStrike::from_pairs([
            (100.0, 100.0),
            (110.0, -50.0),
            (120.0, -40.0),
            (130.0, -30.0),
        ]);
        let flip = gamma_flip_level(&gex).unwrap();
        assert!(flip > 120.0 && flip <= 130.0, "flip = {}", flip);
    }

    #[test]
    fn test_flip_empty() {
        assert_eq!(gamma_flip_level(&GexByStrike::new()), None);
    }

    #[test]
    fn test_flip_independent_of_insertion_order() {
        let pairs = vec![
            (620.0, 50_000.0),
            (580.0, 500_000.0),
            (640.0, -50_000.0),
            (600.0, 200_000.0),
            (630.0, -10_000.0),
            (590.0, 300_000.0),
            (650.0, -100_000.0),
            (610.0, 100_000.0),
        ];
        let expected = gamma_flip_level(&GexByStrike::from_pairs(pairs.clone()));

        // every rotation and the reversal of the input order
        for shift in 0..pairs.len() {
            let mut rotated = pairs.clone();
            rotated.rotate_left(shift);
            assert_eq!(gamma_flip_level(&GexByStrike::from_pairs(rotated.clone())), expected);
            rotated.reverse();
            assert_eq!(gamma_flip_level(&GexByStrike::from_pairs(rotated)), expected);
        }
    }

    #[test]
    fn test_combine_sums_per_strike() {
        let a = GexByStrike::from_pairs([(100.0, 10.0), (110.0, -5.0)]);
        let b = GexByStrike::from_pairs([(110.0, 7.0), (120.0, 1.0)]);
        let combined = combine([&a, &b]);
        assert_eq!(combined.strikes(), vec![100.0, 110.0, 120.0]);
        assert_eq!(combined.get(110.0), Some(2.0));
    }

    #[test]
    fn test_top_strikes() {
        let gex = GexByStrike::from_pairs([(100.0, 500.0), (110.0, -5_000.0), (120.0, 2_000.0), (130.0, 1_000.0)]);
        let top = top_strikes(&gex, 2, 1_000.0);
        assert_eq!(top, vec![(110.0, -5_000.0), (120.0, 2_000.0)]);
    }
}
