//! GEX Collection Engine
//!
//! Polls options-chain data for a configured set of equity symbols, computes
//! gamma exposure (GEX) per strike and persists time-stamped snapshots.
//!
//! # Components
//! - `market_clock`: Trading-hours gate (pure)
//! - `calculator`: GEX per strike, total GEX and gamma flip level (pure)
//! - `tradier`: REST client for the upstream market-data provider
//! - `store`: Snapshot store contract, SQLite backend and freshness policy
//! - `engine`: Bounded worker-pool collection cycles and the read/query path
//! - `scanner`: Period-over-period GEX deltas and anomaly scores
//!
//! # Upstream Documentation
//! - Quotes: https://documentation.tradier.com/brokerage-api/markets/get-quotes
//! - Expirations: https://documentation.tradier.com/brokerage-api/markets/get-options-expirations
//! - Chains: https://documentation.tradier.com/brokerage-api/markets/get-options-chains

pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;
pub mod market_clock;
pub mod scanner;
pub mod store;
pub mod tradier;
pub mod types;

pub use config::{ApiKey, EngineConfig};
pub use engine::{AllExpiriesGex, CollectionEngine, CollectorHandle, GexProfile, GexQuery};
pub use scanner::{GexScanner, ScanItem, ScanSort};
pub use store::{SnapshotStore, SqliteStore, SystemClock};
pub use error::{GexError, GexResult};
pub use types::*;

/// Tradier production REST base URL
pub const TRADIER_API_BASE: &str = "https://api.tradier.com";

/// Environment variable holding the upstream API token
pub const API_KEY_ENV: &str = "TRADIER_API_KEY";

/// Environment variable overriding the upstream base URL
pub const API_BASE_ENV: &str = "TRADIER_API_BASE";
