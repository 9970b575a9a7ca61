//! Sandbox trading backend
//!
//! Reads the same market data as the real backend but never touches the
//! signing or settlement path. Fills are generated probabilistically from
//! each resting order's estimated queue position (price improvement over
//! the touch and time resting), capped by the order's remaining size and
//! a fraction of observed taker flow. This lets an operator validate the
//! quoting and risk behavior against real data with zero capital risk.

use super::{
    BackendError, ExternalOrderStatus, FillEvent, FillSource, SubmitAck, SubmitRequest,
    TradingBackend,
};
use crate::config::SandboxConfig;
use crate::market::MarketFeed;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};

/// Smallest tradable unit; remainders below this are treated as filled
const DUST: Decimal = dec!(0.01);

#[derive(Debug, Clone)]
struct RestingOrder {
    request: SubmitRequest,
    remaining: Decimal,
    placed_at: Instant,
}

struct SandboxState {
    rng: StdRng,
    resting: HashMap<String, RestingOrder>,
    terminal: HashMap<String, ExternalOrderStatus>,
    fill_log: Vec<FillEvent>,
    next_external: u64,
    next_fill_id: u64,
    next_nonce: u64,
}

/// Simulated trading backend driven by live market data
pub struct SandboxBackend {
    feed: Arc<dyn MarketFeed>,
    config: SandboxConfig,
    state: Mutex<SandboxState>,
}

impl SandboxBackend {
    /// Create a sandbox backend over the given market feed
    pub fn new(feed: Arc<dyn MarketFeed>, config: SandboxConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            feed,
            config,
            state: Mutex::new(SandboxState {
                rng,
                resting: HashMap::new(),
                terminal: HashMap::new(),
                fill_log: Vec::new(),
                next_external: 1,
                next_fill_id: 1,
                next_nonce: 1,
            }),
        }
    }

    /// Fill probability for one resting order this pass
    fn fill_probability(
        &self,
        order: &RestingOrder,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> f64 {
        // Price improvement over the touch moves the order up the queue
        let improvement = match order.request.side {
            super::Side::Buy => order.request.price - best_bid,
            super::Side::Sell => best_ask - order.request.price,
        };
        let improvement = improvement.to_f64().unwrap_or(0.0).max(0.0);

        // Orders resting longer accumulate queue priority
        let resting_secs = order.placed_at.elapsed().as_secs_f64();
        let time_bonus = (resting_secs / 60.0 * 0.05).min(0.20);

        (self.config.base_fill_prob + improvement * 20.0 + time_bonus).clamp(0.0, 0.95)
    }

    /// Run one fill pass over all resting orders
    async fn simulate_fills(&self) -> Result<(), BackendError> {
        let targets: Vec<(String, String)> = {
            let state = self.state.lock().await;
            state
                .resting
                .iter()
                .map(|(id, o)| (id.clone(), o.request.market_id.clone()))
                .collect()
        };

        let mut snapshots = HashMap::new();
        for (_, market_id) in &targets {
            if !snapshots.contains_key(market_id) {
                if let Ok(snap) = self.feed.snapshot(market_id).await {
                    snapshots.insert(market_id.clone(), snap);
                }
            }
        }

        let mut state = self.state.lock().await;
        for (external_id, market_id) in targets {
            let Some(snap) = snapshots.get(&market_id) else {
                continue;
            };
            let Some(order) = state.resting.get(&external_id).cloned() else {
                continue;
            };

            let p = self.fill_probability(&order, snap.best_bid, snap.best_ask);
            if !state.rng.gen_bool(p) {
                continue;
            }

            // Cap by remaining size and a plausible share of taker flow
            let flow_cap = snap.taker_volume_1m * self.config.taker_flow_fraction;
            let cap = order.remaining.min(flow_cap.max(DUST));
            let fraction = Decimal::try_from(state.rng.gen_range(0.25..=1.0)).unwrap_or(Decimal::ONE);
            let mut fill_size = (cap * fraction).round_dp(2);
            if fill_size < DUST {
                continue;
            }
            if order.remaining - fill_size < DUST {
                fill_size = order.remaining;
            }

            let fill_id = state.next_fill_id;
            state.next_fill_id += 1;
            let event = FillEvent {
                fill_id,
                external_order_id: external_id.clone(),
                market_id: order.request.market_id.clone(),
                token_id: order.request.token_id.clone(),
                side: order.request.side,
                outcome: order.request.outcome,
                price: order.request.price,
                size: fill_size,
                timestamp: Utc::now(),
                source: FillSource::Poll,
            };
            tracing::debug!(
                external_id = %external_id,
                size = %fill_size,
                "sandbox fill"
            );
            state.fill_log.push(event);

            let remaining = order.remaining - fill_size;
            if remaining < DUST {
                state.resting.remove(&external_id);
                state.terminal.insert(external_id, ExternalOrderStatus::Filled);
            } else if let Some(resting) = state.resting.get_mut(&external_id) {
                resting.remaining = remaining;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TradingBackend for SandboxBackend {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitAck, BackendError> {
        if request.price <= Decimal::ZERO || request.price >= Decimal::ONE {
            return Err(BackendError::Submission(format!(
                "price {} outside (0, 1)",
                request.price
            )));
        }
        if request.size < DUST {
            return Err(BackendError::Submission(format!(
                "size {} below minimum",
                request.size
            )));
        }

        let mut state = self.state.lock().await;
        let nonce = state.next_nonce;
        state.next_nonce += 1;
        let external_id = format!("sim-{}", state.next_external);
        state.next_external += 1;
        state.resting.insert(
            external_id.clone(),
            RestingOrder {
                request: request.clone(),
                remaining: request.size,
                placed_at: Instant::now(),
            },
        );

        tracing::info!(external_id = %external_id, price = %request.price, size = %request.size, "sandbox order resting");
        Ok(SubmitAck {
            external_id,
            nonce,
            gas_cost_usd: Decimal::ZERO,
        })
    }

    async fn cancel(&self, external_id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.resting.remove(external_id).is_some() {
            state
                .terminal
                .insert(external_id.to_string(), ExternalOrderStatus::Cancelled);
            return Ok(());
        }
        if state.terminal.contains_key(external_id) {
            // Already terminal; caller resolves via order_status
            return Err(BackendError::UnknownOrder(external_id.to_string()));
        }
        Err(BackendError::UnknownOrder(external_id.to_string()))
    }

    async fn poll_fills(&self, since: u64) -> Result<Vec<FillEvent>, BackendError> {
        self.simulate_fills().await?;
        let state = self.state.lock().await;
        Ok(state
            .fill_log
            .iter()
            .filter(|f| f.fill_id > since)
            .cloned()
            .collect())
    }

    async fn subscribe_fills(&self) -> Result<mpsc::Receiver<FillEvent>, BackendError> {
        Err(BackendError::Unsupported("sandbox has no push stream"))
    }

    async fn order_status(&self, external_id: &str) -> Result<ExternalOrderStatus, BackendError> {
        let state = self.state.lock().await;
        if state.resting.contains_key(external_id) {
            return Ok(ExternalOrderStatus::Open);
        }
        Ok(state
            .terminal
            .get(external_id)
            .cloned()
            .unwrap_or(ExternalOrderStatus::Unknown))
    }

    async fn resolve_external_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<String>, BackendError> {
        let state = self.state.lock().await;
        Ok(state
            .resting
            .iter()
            .find(|(_, o)| o.request.client_order_id.to_string() == client_order_id)
            .map(|(id, _)| id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticMarketConfig;
    use crate::exec::{Outcome, Side};
    use crate::market::StaticFeed;
    use uuid::Uuid;

    fn feed() -> Arc<dyn MarketFeed> {
        Arc::new(StaticFeed::new(vec![StaticMarketConfig {
            market_id: "btc-15m".to_string(),
            yes_token_id: "yes-1".to_string(),
            no_token_id: "no-1".to_string(),
            best_bid: dec!(0.55),
            best_ask: dec!(0.57),
            seconds_to_close: 600,
            taker_fee_bps: dec!(100),
            taker_volume_1m: dec!(500),
        }]))
    }

    fn backend(base_fill_prob: f64) -> SandboxBackend {
        SandboxBackend::new(
            feed(),
            SandboxConfig {
                seed: Some(42),
                base_fill_prob,
                taker_flow_fraction: dec!(0.25),
            },
        )
    }

    fn request(price: Decimal, size: Decimal) -> SubmitRequest {
        SubmitRequest {
            client_order_id: Uuid::new_v4(),
            market_id: "btc-15m".to_string(),
            token_id: "yes-1".to_string(),
            side: Side::Buy,
            outcome: Outcome::Yes,
            price,
            size,
        }
    }

    #[tokio::test]
    async fn test_submit_and_status() {
        let backend = backend(0.0);
        let ack = backend.submit(&request(dec!(0.55), dec!(100))).await.unwrap();
        assert_eq!(ack.external_id, "sim-1");
        assert_eq!(
            backend.order_status("sim-1").await.unwrap(),
            ExternalOrderStatus::Open
        );
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_price() {
        let backend = backend(0.0);
        assert!(backend.submit(&request(dec!(1.5), dec!(100))).await.is_err());
        assert!(backend.submit(&request(dec!(0), dec!(100))).await.is_err());
    }

    #[tokio::test]
    async fn test_nonces_strictly_increasing() {
        let backend = backend(0.0);
        let a = backend.submit(&request(dec!(0.55), dec!(10))).await.unwrap();
        let b = backend.submit(&request(dec!(0.55), dec!(10))).await.unwrap();
        assert!(b.nonce > a.nonce);
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let backend = backend(0.0);
        let ack = backend.submit(&request(dec!(0.55), dec!(100))).await.unwrap();
        backend.cancel(&ack.external_id).await.unwrap();
        assert_eq!(
            backend.order_status(&ack.external_id).await.unwrap(),
            ExternalOrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let backend = backend(0.0);
        assert!(backend.cancel("sim-99").await.is_err());
    }

    #[tokio::test]
    async fn test_no_fills_at_zero_probability() {
        let backend = backend(0.0);
        // Price at the touch, no improvement, zero base probability
        backend.submit(&request(dec!(0.55), dec!(100))).await.unwrap();
        let fills = backend.poll_fills(0).await.unwrap();
        assert!(fills.is_empty());
    }

    #[tokio::test]
    async fn test_fills_never_exceed_requested() {
        let backend = backend(1.0);
        let ack = backend.submit(&request(dec!(0.55), dec!(50))).await.unwrap();

        let mut total = Decimal::ZERO;
        for _ in 0..20 {
            backend.poll_fills(0).await.unwrap();
        }
        let fills = backend.poll_fills(0).await.unwrap();
        let mut seen = std::collections::HashSet::new();
        for fill in fills {
            if fill.external_order_id == ack.external_id && seen.insert(fill.fill_id) {
                total += fill.size;
            }
        }
        assert!(total <= dec!(50));
    }

    #[tokio::test]
    async fn test_full_fill_goes_terminal() {
        let backend = backend(1.0);
        let ack = backend.submit(&request(dec!(0.56), dec!(10))).await.unwrap();

        for _ in 0..50 {
            backend.poll_fills(0).await.unwrap();
            if backend.order_status(&ack.external_id).await.unwrap()
                == ExternalOrderStatus::Filled
            {
                return;
            }
        }
        panic!("order never filled at probability 1.0");
    }

    #[tokio::test]
    async fn test_poll_cursor_filters_fill_ids() {
        let backend = backend(1.0);
        backend.submit(&request(dec!(0.56), dec!(100))).await.unwrap();

        let mut cursor = 0;
        let mut seen = Vec::new();
        for _ in 0..10 {
            let fills = backend.poll_fills(cursor).await.unwrap();
            for fill in fills {
                assert!(fill.fill_id > cursor);
                seen.push(fill.fill_id);
                cursor = cursor.max(fill.fill_id);
            }
        }
        // Strictly increasing, no duplicates
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seen.len(), sorted.len());
    }

    #[tokio::test]
    async fn test_resolve_external_id_by_client_id() {
        let backend = backend(0.0);
        let req = request(dec!(0.55), dec!(100));
        let ack = backend.submit(&req).await.unwrap();

        let resolved = backend
            .resolve_external_id(&req.client_order_id.to_string())
            .await
            .unwrap();
        assert_eq!(resolved, Some(ack.external_id));

        let missing = backend
            .resolve_external_id(&Uuid::new_v4().to_string())
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_subscribe_unsupported() {
        let backend = backend(0.0);
        assert!(matches!(
            backend.subscribe_fills().await,
            Err(BackendError::Unsupported(_))
        ));
    }
}
