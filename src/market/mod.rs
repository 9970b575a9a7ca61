//! Market feed boundary
//!
//! The engine consumes normalized per-tick snapshots through the
//! `MarketFeed` trait. Discovery and order book plumbing live outside
//! this crate; the static adapter here backs sandbox runs and tests.

mod feed;

pub use feed::StaticFeed;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable per-tick view of one market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Unique market identifier
    pub market_id: String,
    /// Yes token identifier
    pub yes_token_id: String,
    /// No token identifier
    pub no_token_id: String,
    /// Best resting bid for the Yes token
    pub best_bid: Decimal,
    /// Best resting ask for the Yes token
    pub best_ask: Decimal,
    /// Mid price
    pub mid: Decimal,
    /// Seconds remaining until market close
    pub seconds_to_close: i64,
    /// Taker fee rate at the current price (basis points)
    pub taker_fee_bps: Decimal,
    /// Observed taker flow over the last minute (shares)
    pub taker_volume_1m: Decimal,
    /// Short-duration crypto market inside its rebate window
    pub eligible: bool,
}

impl MarketSnapshot {
    /// Taker fee as a price fraction
    pub fn taker_fee_rate(&self) -> Decimal {
        self.taker_fee_bps / Decimal::from(10_000)
    }

    /// Market has passed its close time
    pub fn is_closed(&self) -> bool {
        self.seconds_to_close <= 0
    }
}

/// Trait for market feed adapters
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Identifiers of the markets currently tracked
    async fn markets(&self) -> anyhow::Result<Vec<String>>;
    /// Fresh snapshot for one market
    async fn snapshot(&self, market_id: &str) -> anyhow::Result<MarketSnapshot>;
}

/// Canonical snapshot used across unit tests
#[cfg(test)]
pub(crate) fn snapshot(market_id: &str) -> MarketSnapshot {
    use rust_decimal_macros::dec;

    MarketSnapshot {
        market_id: market_id.to_string(),
        yes_token_id: format!("{}-yes", market_id),
        no_token_id: format!("{}-no", market_id),
        best_bid: dec!(0.55),
        best_ask: dec!(0.57),
        mid: dec!(0.56),
        seconds_to_close: 600,
        taker_fee_bps: dec!(100),
        taker_volume_1m: dec!(500),
        eligible: true,
    }
}
