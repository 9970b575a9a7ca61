//! Risk and inventory ledger
//!
//! Owns per-market positions and validates every proposed order against
//! configured limits. Positions are mutated only by confirmed fills through
//! `apply_fill`, never on submission, so unfilled size is never counted.
//! Fill application is idempotent: the ledger tracks the highest applied
//! fill id per order and drops anything at or below it.

use crate::config::RiskConfig;
use crate::exec::{FillEvent, Outcome, Side, SubmitRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;

/// Per-market inventory
#[derive(Debug, Clone, Default, Serialize)]
pub struct Position {
    /// Yes shares held
    pub yes_size: Decimal,
    /// No shares held
    pub no_size: Decimal,
    /// Signed sum of side-weighted notional (USD)
    pub net_exposure_usd: Decimal,
    /// Cost basis of the Yes holding
    yes_cost: Decimal,
    /// Cost basis of the No holding
    no_cost: Decimal,
}

impl Position {
    /// Average entry price of the Yes holding
    pub fn avg_yes_price(&self) -> Option<Decimal> {
        (self.yes_size > Decimal::ZERO).then(|| self.yes_cost / self.yes_size)
    }

    /// Average entry price of the No holding
    pub fn avg_no_price(&self) -> Option<Decimal> {
        (self.no_size > Decimal::ZERO).then(|| self.no_cost / self.no_size)
    }
}

/// Result of validating a proposed order
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Allow,
    Reject(RejectReason),
}

/// Why an order was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Projected net exposure would exceed the configured maximum
    Exposure { projected: Decimal, limit: Decimal },
    /// Single order notional above the configured maximum
    OrderSize { notional: Decimal, limit: Decimal },
    /// Session realized loss breached the stop-loss; trading is paused
    StopLoss { loss: Decimal, limit: Decimal },
}

impl RejectReason {
    /// A fatal rejection halts the control loop, not just this order
    pub fn is_fatal(&self) -> bool {
        matches!(self, RejectReason::StopLoss { .. })
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Exposure { projected, limit } => {
                write!(f, "projected exposure {} exceeds limit {}", projected, limit)
            }
            RejectReason::OrderSize { notional, limit } => {
                write!(f, "order notional {} exceeds limit {}", notional, limit)
            }
            RejectReason::StopLoss { loss, limit } => {
                write!(f, "session loss {} breached stop-loss {}", loss, limit)
            }
        }
    }
}

/// The delta a fill applied to the ledger
#[derive(Debug, Clone)]
pub struct FillDelta {
    pub market_id: String,
    pub signed_notional: Decimal,
    pub realized_pnl: Decimal,
    pub rebate_accrued: Decimal,
}

/// Risk and inventory ledger
pub struct RiskLedger {
    limits: RiskConfig,
    starting_capital: Decimal,
    rebate_rate_bps: Decimal,
    positions: HashMap<String, Position>,
    /// Highest applied fill id per external order id
    applied: HashMap<String, u64>,
    realized_pnl: Decimal,
    accrued_rebates: Decimal,
    paused: Option<String>,
}

impl RiskLedger {
    /// Create a ledger for a fresh session
    pub fn new(limits: RiskConfig, starting_capital: Decimal, rebate_rate_bps: Decimal) -> Self {
        Self {
            limits,
            starting_capital,
            rebate_rate_bps,
            positions: HashMap::new(),
            applied: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            accrued_rebates: Decimal::ZERO,
            paused: None,
        }
    }

    /// Configured limits
    pub fn limits(&self) -> &RiskConfig {
        &self.limits
    }

    /// Position for a market (zero if never traded)
    pub fn position(&self, market_id: &str) -> Position {
        self.positions.get(market_id).cloned().unwrap_or_default()
    }

    /// Net exposure summed across all markets
    pub fn total_net_exposure(&self) -> Decimal {
        self.positions.values().map(|p| p.net_exposure_usd).sum()
    }

    /// Realized P&L since session start
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    /// Estimated maker rebates accrued this session
    pub fn accrued_rebates(&self) -> Decimal {
        self.accrued_rebates
    }

    /// Whether the ledger has paused trading, and why
    pub fn paused(&self) -> Option<&str> {
        self.paused.as_deref()
    }

    /// Stop-loss threshold in USD
    fn stop_loss_usd(&self) -> Decimal {
        self.limits.stop_loss_pct * self.starting_capital
    }

    /// Check the session stop-loss, pausing trading on a breach
    pub fn check_stop_loss(&mut self) -> Option<RejectReason> {
        let loss = -self.realized_pnl;
        let limit = self.stop_loss_usd();
        if loss > limit {
            let reason = RejectReason::StopLoss { loss, limit };
            if self.paused.is_none() {
                tracing::error!(%loss, %limit, "stop-loss breached, pausing trading");
                self.paused = Some(reason.to_string());
            }
            return Some(reason);
        }
        None
    }

    /// Validate a proposed order against limits
    ///
    /// Projection assumes the order fully fills.
    pub fn validate(&mut self, proposed: &SubmitRequest) -> RiskDecision {
        if let Some(breach) = self.check_stop_loss() {
            return RiskDecision::Reject(breach);
        }
        if let Some(reason) = &self.paused {
            tracing::warn!(reason = %reason, "order rejected while paused");
            return RiskDecision::Reject(RejectReason::StopLoss {
                loss: -self.realized_pnl,
                limit: self.stop_loss_usd(),
            });
        }

        let notional = proposed.notional();
        if notional > self.limits.max_single_order_usd {
            return RiskDecision::Reject(RejectReason::OrderSize {
                notional,
                limit: self.limits.max_single_order_usd,
            });
        }

        let projected =
            self.total_net_exposure() + signed_notional(proposed.side, proposed.outcome, notional);
        if projected.abs() > self.limits.max_exposure_usd {
            return RiskDecision::Reject(RejectReason::Exposure {
                projected,
                limit: self.limits.max_exposure_usd,
            });
        }

        RiskDecision::Allow
    }

    /// Apply a confirmed fill to the position it belongs to
    ///
    /// Returns `None` when the fill id was already applied for this order.
    pub fn apply_fill(&mut self, event: &FillEvent) -> Option<FillDelta> {
        let last = self
            .applied
            .get(&event.external_order_id)
            .copied()
            .unwrap_or(0);
        if event.fill_id <= last {
            tracing::debug!(fill_id = event.fill_id, order = %event.external_order_id, "duplicate fill dropped by ledger");
            return None;
        }
        self.applied
            .insert(event.external_order_id.clone(), event.fill_id);

        let notional = event.price * event.size;
        let signed = signed_notional(event.side, event.outcome, notional);
        let position = self.positions.entry(event.market_id.clone()).or_default();

        let mut realized = Decimal::ZERO;
        match (event.side, event.outcome) {
            (Side::Buy, Outcome::Yes) => {
                position.yes_size += event.size;
                position.yes_cost += notional;
            }
            (Side::Buy, Outcome::No) => {
                position.no_size += event.size;
                position.no_cost += notional;
            }
            (Side::Sell, Outcome::Yes) => {
                if position.yes_size > Decimal::ZERO {
                    let avg = position.yes_cost / position.yes_size;
                    let reduce = event.size.min(position.yes_size);
                    realized = (event.price - avg) * reduce;
                    position.yes_cost -= avg * reduce;
                }
                position.yes_size -= event.size;
            }
            (Side::Sell, Outcome::No) => {
                if position.no_size > Decimal::ZERO {
                    let avg = position.no_cost / position.no_size;
                    let reduce = event.size.min(position.no_size);
                    realized = (event.price - avg) * reduce;
                    position.no_cost -= avg * reduce;
                }
                position.no_size -= event.size;
            }
        }
        position.net_exposure_usd += signed;

        let rebate = notional * self.rebate_rate_bps / dec!(10000);
        self.realized_pnl += realized;
        self.accrued_rebates += rebate;

        Some(FillDelta {
            market_id: event.market_id.clone(),
            signed_notional: signed,
            realized_pnl: realized,
            rebate_accrued: rebate,
        })
    }

    /// Record externally realized P&L (settlement, manual adjustment)
    pub fn record_realized_pnl(&mut self, delta: Decimal) {
        self.realized_pnl += delta;
    }
}

/// Sign of an order's USD notional: buying Yes or selling No leans the
/// book toward Yes
fn signed_notional(side: Side, outcome: Outcome, notional: Decimal) -> Decimal {
    match (side, outcome) {
        (Side::Buy, Outcome::Yes) | (Side::Sell, Outcome::No) => notional,
        (Side::Buy, Outcome::No) | (Side::Sell, Outcome::Yes) => -notional,
    }
}
