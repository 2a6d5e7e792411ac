//! Upstream market-data client
//!
//! # Components
//! - `TradierClient`: REST client for quotes, option expirations and option chains
//!
//! # Source
//! - Market Data: https://documentation.tradier.com/brokerage-api/overview/market-data

mod client;

pub use client::TradierClient;
