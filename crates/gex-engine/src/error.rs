//! Error kinds for the collection engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GexError {
    /// Network, HTTP status or decode failure talking to the market-data provider
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Provider answered "too many requests"
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The cycle-wide deadline expired before the step completed
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("No expiration dates available for {0}")]
    NoExpiryDates(String),
}

pub type GexResult<T> = Result<T, GexError>;

impl GexError {
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// A rate-limit that survived its one retry is reported as a plain upstream failure
    pub fn into_upstream(self) -> Self {
        match self {
            Self::RateLimited(msg) => Self::Upstream(format!("rate limited after retry: {}", msg)),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for GexError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_degrades_to_upstream() {
        let err = GexError::rate_limited("HTTP 429").into_upstream();
        assert!(matches!(err, GexError::Upstream(_)));
        assert!(err.to_string().contains("HTTP 429"));

        let err = GexError::persistence("disk full").into_upstream();
        assert!(matches!(err, GexError::Persistence(_)));
    }
}
