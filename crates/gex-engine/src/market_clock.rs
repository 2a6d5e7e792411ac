//! Market Clock - regular trading session gate
//!
//! Open iff the instant, converted to the exchange timezone, falls on
//! Monday-Friday within [open, close). Holidays are not modeled.
//!
//! An unknown timezone name reports the market closed: the gate never fails open.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

/// Regular session definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketHours {
    /// IANA timezone name of the exchange
    pub timezone: String,
    pub open: NaiveTime,
    /// Exclusive
    pub close: NaiveTime,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            open: NaiveTime::from_hms_opt(9, 30, 0).expect("valid open time"),
            close: NaiveTime::from_hms_opt(16, 0, 0).expect("valid close time"),
        }
    }
}

impl MarketHours {
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.parse::<Tz>().ok()
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let Some(tz) = self.tz() else {
            warn!("Unknown exchange timezone '{}', treating market as closed", self.timezone);
            return false;
        };

        let local = now.with_timezone(&tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        let t = local.time();
        t >= self.open && t < self.close
    }

    /// Calendar date at the exchange; falls back to the UTC date if the timezone is unknown
    pub fn exchange_date(&self, now: DateTime<Utc>) -> chrono::NaiveDate {
        match self.tz() {
            Some(tz) => now.with_timezone(&tz).date_naive(),
            None => now.date_naive(),
        }
    }
}

/// NYSE/Nasdaq regular session check with the default calendar
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    MarketHours::default().is_open(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn et(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        New_York.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_weekday_session() {
        // Monday 2025-01-06
        assert!(is_market_open(et(2025, 1, 6, 10, 0)));
        assert!(!is_market_open(et(2025, 1, 6, 8, 0)));
        assert!(!is_market_open(et(2025, 1, 6, 17, 0)));
    }

    #[test]
    fn test_session_boundaries() {
        assert!(is_market_open(et(2025, 1, 6, 9, 30)));
        assert!(!is_market_open(et(2025, 1, 6, 9, 29)));
        assert!(is_market_open(et(2025, 1, 6, 15, 59)));
        assert!(!is_market_open(et(2025, 1, 6, 16, 0)));
    }

    #[test]
    fn test_weekend_closed() {
        // Saturday 2025-01-04, Sunday 2025-01-05
        assert!(!is_market_open(et(2025, 1, 4, 10, 0)));
        assert!(!is_market_open(et(2025, 1, 5, 12, 0)));
    }

    #[test]
    fn test_daylight_saving_offset() {
        // 14:00 UTC is 10:00 EDT in July but 09:00 EST in January
        let july = Utc.with_ymd_and_hms(2025, 7, 8, 14, 0, 0).unwrap();
        let january = Utc.with_ymd_and_hms(2025, 1, 7, 14, 0, 0).unwrap();
        assert!(is_market_open(july));
        assert!(!is_market_open(january));
    }

    #[test]
    fn test_unknown_timezone_fails_closed() {
        let hours = MarketHours { timezone: "Mars/Olympus_Mons".to_string(), ..MarketHours::default() };
        assert!(!hours.is_open(et(2025, 1, 6, 10, 0)));
    }

    #[test]
    fn test_exchange_date() {
        // 02:00 UTC Tuesday is still Monday evening in New York
        let now = Utc.with_ymd_and_hms(2025, 1, 7, 2, 0, 0).unwrap();
        let date = MarketHours::default().exchange_date(now);
        assert_eq!(date, chrono::NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
    }
}
