//! Quote computation
//!
//! Pure function from a market snapshot and current inventory to a target
//! two-sided quote. No side effects and no clock access, so every pricing
//! rule is testable in isolation. The bid is a Buy on the Yes token and the
//! ask is a Sell on the Yes token.

use crate::config::AggressionLevel;
use crate::market::MarketSnapshot;
use crate::risk::Position;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Size precision in shares
const SIZE_DP: u32 = 2;
/// Quotes widen once fewer than this many seconds remain
const TIME_WIDEN_WINDOW_SECS: i64 = 600;

/// Per-level spread and sizing parameters for an aggression preset
#[derive(Debug, Clone, Copy)]
pub struct AggressionPreset {
    /// Fraction of session capital committed per side per market
    pub capital_fraction: Decimal,
    pub min_spread_bps: Decimal,
    pub max_spread_bps: Decimal,
}

impl AggressionLevel {
    pub fn preset(self) -> AggressionPreset {
        match self {
            AggressionLevel::Conservative => AggressionPreset {
                capital_fraction: dec!(0.10),
                min_spread_bps: dec!(15),
                max_spread_bps: dec!(50),
            },
            AggressionLevel::Balanced => AggressionPreset {
                capital_fraction: dec!(0.20),
                min_spread_bps: dec!(8),
                max_spread_bps: dec!(30),
            },
            AggressionLevel::Aggressive => AggressionPreset {
                capital_fraction: dec!(0.30),
                min_spread_bps: dec!(3),
                max_spread_bps: dec!(20),
            },
        }
    }
}

/// Inputs to quote computation that do not vary per market
#[derive(Debug, Clone)]
pub struct QuoteParams {
    pub capital_usd: Decimal,
    pub aggression: AggressionLevel,
    /// Stop quoting below this many seconds to close
    pub min_quote_seconds: i64,
    pub max_exposure_usd: Decimal,
    /// Skew fraction at which the over-weighted side is fully suppressed
    pub max_inventory_skew: Decimal,
}

/// One side of a target quote
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Desired resting state for one market
#[derive(Debug, Clone, PartialEq)]
pub struct TargetQuote {
    /// Buy side on the Yes token; `None` when suppressed
    pub bid: Option<Level>,
    /// Sell side on the Yes token; `None` when suppressed
    pub ask: Option<Level>,
}

/// Why a market was skipped this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ineligible,
    NearClose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteDecision {
    Quote(TargetQuote),
    Skip(SkipReason),
}

/// Compute the target quote for one market
pub fn compute_quote(
    snapshot: &MarketSnapshot,
    position: &Position,
    params: &QuoteParams,
) -> QuoteDecision {
    if !snapshot.eligible || snapshot.is_closed() {
        return QuoteDecision::Skip(SkipReason::Ineligible);
    }
    if snapshot.seconds_to_close < params.min_quote_seconds {
        return QuoteDecision::Skip(SkipReason::NearClose);
    }

    let preset = params.aggression.preset();
    let spread_bps = target_spread_bps(&preset, snapshot);

    // Half-spread in absolute price, floored at the taker fee rate so a
    // round trip through the quote never nets less than the fee.
    let half = (snapshot.mid * spread_bps / dec!(20000)).max(snapshot.taker_fee_rate());

    let notional = params.capital_usd * preset.capital_fraction;
    let skew = skew_ratio(position, params);

    let bid = make_level(snapshot.mid - half, notional, side_scale(skew));
    let ask = make_level(snapshot.mid + half, notional, side_scale(-skew));

    QuoteDecision::Quote(TargetQuote { bid, ask })
}

/// Target spread in basis points before the fee floor
fn target_spread_bps(preset: &AggressionPreset, snapshot: &MarketSnapshot) -> Decimal {
    let time_widen = Decimal::from((TIME_WIDEN_WINDOW_SECS - snapshot.seconds_to_close).max(0))
        / Decimal::from(60);
    (preset.min_spread_bps + snapshot.taker_fee_bps + time_widen)
        .clamp(preset.min_spread_bps, preset.max_spread_bps)
}

/// Inventory skew in [-1, 1]: positive means over-weighted toward Yes
fn skew_ratio(position: &Position, params: &QuoteParams) -> Decimal {
    if params.max_exposure_usd <= Decimal::ZERO || params.max_inventory_skew <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let fraction = position.net_exposure_usd / params.max_exposure_usd;
    (fraction / params.max_inventory_skew).clamp(dec!(-1), dec!(1))
}

/// Size multiplier for a side given the skew working against it
///
/// `skew` here is positive when this side would increase the over-weighted
/// exposure: it shrinks toward zero and is suppressed at the limit. The
/// opposite side sees the negated value and grows, capped at 2x.
fn side_scale(skew: Decimal) -> Decimal {
    (Decimal::ONE - skew).min(dec!(2))
}

fn make_level(price: Decimal, notional: Decimal, scale: Decimal) -> Option<Level> {
    if scale <= Decimal::ZERO {
        return None;
    }
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return None;
    }
    let size = (notional * scale / price).round_dp(SIZE_DP);
    if size <= Decimal::ZERO {
        return None;
    }
    Some(Level { price, size })
}
