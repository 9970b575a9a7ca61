//! Static market feed adapter
//!
//! Serves snapshots from configured market definitions, decaying
//! `seconds_to_close` in real time. Used for sandbox sessions and tests.

use super::{MarketFeed, MarketSnapshot};
use crate::config::StaticMarketConfig;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Instant;

/// Feed adapter backed by static configuration
pub struct StaticFeed {
    markets: Vec<StaticMarketConfig>,
    started: Instant,
}

impl StaticFeed {
    /// Create a feed from configured market definitions
    pub fn new(markets: Vec<StaticMarketConfig>) -> Self {
        Self {
            markets,
            started: Instant::now(),
        }
    }

    fn build_snapshot(&self, def: &StaticMarketConfig) -> MarketSnapshot {
        let elapsed = self.started.elapsed().as_secs() as i64;
        let remaining = def.seconds_to_close - elapsed;
        let mid = (def.best_bid + def.best_ask) / Decimal::from(2);
        MarketSnapshot {
            market_id: def.market_id.clone(),
            yes_token_id: def.yes_token_id.clone(),
            no_token_id: def.no_token_id.clone(),
            best_bid: def.best_bid,
            best_ask: def.best_ask,
            mid,
            seconds_to_close: remaining,
            taker_fee_bps: def.taker_fee_bps,
            taker_volume_1m: def.taker_volume_1m,
            eligible: remaining > 0,
        }
    }
}

#[async_trait]
impl MarketFeed for StaticFeed {
    async fn markets(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.markets.iter().map(|m| m.market_id.clone()).collect())
    }

    async fn snapshot(&self, market_id: &str) -> anyhow::Result<MarketSnapshot> {
        let def = self
            .markets
            .iter()
            .find(|m| m.market_id == market_id)
            .ok_or_else(|| anyhow::anyhow!("unknown market: {}", market_id))?;
        Ok(self.build_snapshot(def))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn definition() -> StaticMarketConfig {
        StaticMarketConfig {
            market_id: "btc-15m".to_string(),
            yes_token_id: "yes-1".to_string(),
            no_token_id: "no-1".to_string(),
            best_bid: dec!(0.55),
            best_ask: dec!(0.57),
            seconds_to_close: 600,
            taker_fee_bps: dec!(100),
            taker_volume_1m: dec!(500),
        }
    }

    #[tokio::test]
    async fn test_static_feed_snapshot() {
        let feed = StaticFeed::new(vec![definition()]);
        let snap = feed.snapshot("btc-15m").await.unwrap();
        assert_eq!(snap.mid, dec!(0.56));
        assert!(snap.eligible);
        assert!(snap.seconds_to_close <= 600);
    }

    #[tokio::test]
    async fn test_static_feed_unknown_market() {
        let feed = StaticFeed::new(vec![definition()]);
        assert!(feed.snapshot("eth-15m").await.is_err());
    }

    #[tokio::test]
    async fn test_static_feed_markets() {
        let feed = StaticFeed::new(vec![definition()]);
        let ids = feed.markets().await.unwrap();
        assert_eq!(ids, vec!["btc-15m".to_string()]);
    }
}
