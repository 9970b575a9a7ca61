//! Control loop
//!
//! Fixed-interval driver over all tracked markets: snapshot, compute the
//! target quote, validate against the risk ledger, then diff against the
//! resting orders and cancel/replace only when the target moved enough to
//! justify the churn. One public `tick` so the whole cycle is testable
//! without the timer.

use crate::config::{EngineConfig, RiskConfig};
use crate::exec::{OrderId, Outcome, Side, SubmitRequest};
use crate::lifecycle::{LifecycleManager, Order};
use crate::market::{MarketFeed, MarketSnapshot};
use crate::quote::{compute_quote, Level, QuoteDecision, QuoteParams, SkipReason};
use crate::risk::RiskDecision;
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Relative size change that forces a replacement
const SIZE_CHANGE_THRESHOLD: Decimal = dec!(0.25);

/// Whether the loop should keep running after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    /// Stop-loss or fatal backend failure; no auto-resume
    Halt,
}

/// The market-making control loop
pub struct MakerEngine {
    feed: Arc<dyn MarketFeed>,
    lifecycle: Arc<LifecycleManager>,
    config: EngineConfig,
    params: QuoteParams,
}

impl MakerEngine {
    pub fn new(
        feed: Arc<dyn MarketFeed>,
        lifecycle: Arc<LifecycleManager>,
        config: EngineConfig,
        risk: &RiskConfig,
    ) -> Self {
        let params = QuoteParams {
            capital_usd: config.capital_usd,
            aggression: config.aggression,
            min_quote_seconds: config.min_quote_seconds,
            max_exposure_usd: risk.max_exposure_usd,
            max_inventory_skew: risk.max_inventory_skew,
        };
        Self {
            feed,
            lifecycle,
            config,
            params,
        }
    }

    /// One full pass over every tracked market
    pub async fn tick(&self) -> anyhow::Result<TickControl> {
        {
            let mut ledger = self.lifecycle.ledger().lock().await;
            if ledger.check_stop_loss().is_some() || ledger.paused().is_some() {
                drop(ledger);
                let cancelled = self.lifecycle.cancel_all().await;
                tracing::error!(cancelled, "trading halted by stop-loss");
                self.emit_gauges().await;
                return Ok(TickControl::Halt);
            }
        }

        for market_id in self.feed.markets().await? {
            let snapshot = match self.feed.snapshot(&market_id).await {
                Ok(snap) => snap,
                Err(e) => {
                    tracing::warn!(market = %market_id, error = %e, "snapshot failed");
                    continue;
                }
            };

            if snapshot.is_closed() {
                self.lifecycle.expire_market(&market_id).await;
                continue;
            }

            let position = {
                let ledger = self.lifecycle.ledger().lock().await;
                ledger.position(&market_id)
            };

            match compute_quote(&snapshot, &position, &self.params) {
                QuoteDecision::Skip(reason) => {
                    self.withdraw_quotes(&market_id, reason).await;
                }
                QuoteDecision::Quote(target) => {
                    let working = self.lifecycle.working_orders_for(&market_id).await;
                    for (side, level) in [(Side::Buy, target.bid), (Side::Sell, target.ask)] {
                        let resting = working.iter().find(|o| o.side == side);
                        if let TickControl::Halt =
                            self.reconcile_side(&snapshot, side, level, resting).await?
                        {
                            return Ok(TickControl::Halt);
                        }
                    }
                }
            }
        }

        self.emit_gauges().await;
        Ok(TickControl::Continue)
    }

    /// Bring one side of a market in line with the target level
    async fn reconcile_side(
        &self,
        snapshot: &MarketSnapshot,
        side: Side,
        target: Option<Level>,
        resting: Option<&Order>,
    ) -> anyhow::Result<TickControl> {
        match (target, resting) {
            (None, None) => Ok(TickControl::Continue),
            (None, Some(order)) => {
                if let Err(e) = self.lifecycle.cancel(order.id).await {
                    tracing::warn!(order = %order.id, error = %e, "cancel of suppressed side failed");
                    if e.is_fatal() {
                        return Ok(TickControl::Halt);
                    }
                }
                Ok(TickControl::Continue)
            }
            (Some(level), None) => {
                let request = self.request_for(snapshot, side, level);
                self.place(request, None).await
            }
            (Some(level), Some(order)) => {
                if !self.needs_replace(order, &level) {
                    return Ok(TickControl::Continue);
                }
                let request = self.request_for(snapshot, side, level);
                self.place(request, Some(order.id)).await
            }
        }
    }

    /// Replace only when price moved beyond the threshold or size changed
    /// materially; small drift is left alone to avoid churn
    fn needs_replace(&self, resting: &Order, target: &Level) -> bool {
        if (resting.price - target.price).abs() > self.config.min_quote_change_threshold {
            return true;
        }
        if resting.size.is_zero() {
            return true;
        }
        ((resting.size - target.size).abs() / resting.size) > SIZE_CHANGE_THRESHOLD
    }

    fn request_for(&self, snapshot: &MarketSnapshot, side: Side, level: Level) -> SubmitRequest {
        SubmitRequest {
            client_order_id: Uuid::new_v4(),
            market_id: snapshot.market_id.clone(),
            token_id: snapshot.yes_token_id.clone(),
            side,
            outcome: Outcome::Yes,
            price: level.price,
            size: level.size,
        }
    }

    /// Validate and submit, optionally replacing a resting order
    async fn place(
        &self,
        request: SubmitRequest,
        replace: Option<OrderId>,
    ) -> anyhow::Result<TickControl> {
        let decision = {
            let mut ledger = self.lifecycle.ledger().lock().await;
            ledger.validate(&request)
        };

        if let RiskDecision::Reject(reason) = decision {
            telemetry::increment(CounterMetric::RiskRejects);
            if reason.is_fatal() {
                tracing::error!(%reason, "fatal risk rejection");
                let cancelled = self.lifecycle.cancel_all().await;
                tracing::error!(cancelled, "trading halted");
                return Ok(TickControl::Halt);
            }
            tracing::debug!(%reason, market = %request.market_id, "order rejected by risk");
            return Ok(TickControl::Continue);
        }

        let result = match replace {
            Some(old) => self.lifecycle.cancel_replace(old, request).await.map(|_| ()),
            None => self.lifecycle.submit(request).await.map(|_| ()),
        };

        if let Err(e) = result {
            if e.is_fatal() {
                tracing::error!(error = %e, "fatal backend failure");
                return Ok(TickControl::Halt);
            }
            tracing::warn!(error = %e, "order placement failed");
        }
        Ok(TickControl::Continue)
    }

    /// Pull quotes from a market the engine no longer wants to be in
    async fn withdraw_quotes(&self, market_id: &str, reason: SkipReason) {
        let working = self.lifecycle.working_orders_for(market_id).await;
        if working.is_empty() {
            return;
        }
        tracing::debug!(market = market_id, ?reason, "withdrawing quotes");
        for order in working {
            if let Err(e) = self.lifecycle.cancel(order.id).await {
                tracing::warn!(order = %order.id, error = %e, "withdraw cancel failed");
            }
        }
    }

    async fn emit_gauges(&self) {
        let (exposure, pnl, rebates) = {
            let ledger = self.lifecycle.ledger().lock().await;
            (
                ledger.total_net_exposure(),
                ledger.realized_pnl(),
                ledger.accrued_rebates(),
            )
        };
        telemetry::set_gauge_decimal(GaugeMetric::NetExposure, exposure);
        telemetry::set_gauge_decimal(GaugeMetric::RealizedPnl, pnl);
        telemetry::set_gauge_decimal(GaugeMetric::AccruedRebates, rebates);
        let open = self.lifecycle.working_order_count().await;
        telemetry::set_gauge(GaugeMetric::OpenOrders, open as f64);
    }

    /// Run until shutdown or halt; cancels all working orders on the way out
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.quote_refresh_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("shutdown requested");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(TickControl::Continue) => {}
                        Ok(TickControl::Halt) => break,
                        Err(e) => tracing::warn!(error = %e, "tick failed"),
                    }
                }
            }
        }

        let cancelled = self.lifecycle.cancel_all().await;
        tracing::info!(cancelled, "engine stopped, working orders cancelled");
    }
}
