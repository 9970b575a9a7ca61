//! Telemetry
//!
//! Structured logging and metrics. Metric names are stable and
//! prefixed `polymaker_`; callers go through the enum helpers so a
//! typo'd name cannot split a series.

use crate::config::TelemetryConfig;
use metrics::{counter, gauge};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Orders accepted by the backend
    OrdersPlaced,
    /// Orders that reached fully filled
    OrdersFilled,
    /// Orders cancelled (operator, replace, or failure path)
    OrdersCancelled,
    /// Orders expired with their market
    OrdersExpired,
    /// Orders rejected by the risk ledger
    RiskRejects,
    /// Duplicate fill events dropped before application
    FillsDeduped,
    /// Fill events applied to the ledger
    FillsApplied,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Net exposure across all markets
    NetExposure,
    /// Realized P&L this session
    RealizedPnl,
    /// Estimated maker rebates accrued
    AccruedRebates,
    /// Currently open orders
    OpenOrders,
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::OrdersPlaced => "polymaker_orders_placed_total",
            CounterMetric::OrdersFilled => "polymaker_orders_filled_total",
            CounterMetric::OrdersCancelled => "polymaker_orders_cancelled_total",
            CounterMetric::OrdersExpired => "polymaker_orders_expired_total",
            CounterMetric::RiskRejects => "polymaker_risk_rejects_total",
            CounterMetric::FillsDeduped => "polymaker_fills_deduped_total",
            CounterMetric::FillsApplied => "polymaker_fills_applied_total",
        }
    }
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::NetExposure => "polymaker_net_exposure_usd",
            GaugeMetric::RealizedPnl => "polymaker_realized_pnl_usd",
            GaugeMetric::AccruedRebates => "polymaker_accrued_rebates_usd",
            GaugeMetric::OpenOrders => "polymaker_open_orders",
        }
    }
}

/// Increment a counter
pub fn increment(metric: CounterMetric) {
    counter!(metric.name()).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    gauge!(metric.name()).set(value);
}

/// Set a gauge from a Decimal amount
pub fn set_gauge_decimal(metric: GaugeMetric, value: Decimal) {
    set_gauge(metric, value.to_f64().unwrap_or(0.0));
}

/// Guard that cleans up telemetry on drop
pub struct TelemetryGuard {
    _priv: (),
}

/// Initialize logging and metrics
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    Ok(TelemetryGuard { _priv: () })
}
