//! Configuration types for poly-maker

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub risk: RiskConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub real: RealConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    pub telemetry: TelemetryConfig,
}

/// Trading mode: sandbox simulation or real exchange
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Sandbox,
    Real,
}

/// Aggression level presets for quoting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum AggressionLevel {
    /// 10% of capital per side, 15-50 bps spread
    Conservative,
    /// 20% of capital per side, 8-30 bps spread
    Balanced,
    /// 30% of capital per side, 3-20 bps spread
    Aggressive,
}

impl TryFrom<u8> for AggressionLevel {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(AggressionLevel::Conservative),
            2 => Ok(AggressionLevel::Balanced),
            3 => Ok(AggressionLevel::Aggressive),
            other => Err(format!("aggression must be 1, 2 or 3, got {}", other)),
        }
    }
}

/// Core engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub mode: TradingMode,
    /// Capital allocated to the session (USD)
    pub capital_usd: Decimal,
    /// Quoting aggression: 1 (conservative) to 3 (aggressive)
    pub aggression: AggressionLevel,
    /// Control loop tick interval
    #[serde(default = "default_refresh_ms")]
    pub quote_refresh_interval_ms: u64,
    /// Minimum price move before a resting quote is replaced
    #[serde(default = "default_min_change")]
    pub min_quote_change_threshold: Decimal,
    /// Stop quoting when less than this many seconds remain to close
    #[serde(default = "default_min_quote_seconds")]
    pub min_quote_seconds: i64,
    /// Maker rebate rate used for accrual estimates (basis points)
    #[serde(default = "default_rebate_bps")]
    pub rebate_rate_bps: Decimal,
    /// Timeout applied to every backend call
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
}

fn default_refresh_ms() -> u64 {
    1000
}
fn default_min_change() -> Decimal {
    dec!(0.002)
}
fn default_min_quote_seconds() -> i64 {
    90
}
fn default_rebate_bps() -> Decimal {
    dec!(20)
}
fn default_backend_timeout_ms() -> u64 {
    5000
}

/// Risk limit configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum net exposure across all markets (USD)
    pub max_exposure_usd: Decimal,
    /// Maximum inventory skew as a fraction of max exposure
    pub max_inventory_skew: Decimal,
    /// Maximum notional for a single order (USD)
    pub max_single_order_usd: Decimal,
    /// Session stop-loss as a fraction of starting capital
    pub stop_loss_pct: Decimal,
}

/// Market feed configuration
///
/// The engine consumes a normalized feed; the static adapter here lets the
/// sandbox run without the external discovery service.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub markets: Vec<StaticMarketConfig>,
}

/// A statically configured market for the bundled feed adapter
#[derive(Debug, Clone, Deserialize)]
pub struct StaticMarketConfig {
    pub market_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub seconds_to_close: i64,
    pub taker_fee_bps: Decimal,
    #[serde(default = "default_taker_volume")]
    pub taker_volume_1m: Decimal,
}

fn default_taker_volume() -> Decimal {
    dec!(500)
}

/// Real backend configuration
///
/// The signing key is never stored here; it is read from the
/// POLY_MAKER_PRIVATE_KEY environment variable at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RealConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Funding address for the account
    #[serde(default)]
    pub funding_address: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Gas units consumed by one settled order
    #[serde(default = "default_gas_per_order")]
    pub gas_per_order: u64,
    /// Native token price used to convert gas cost to USD
    #[serde(default = "default_native_usd")]
    pub native_token_usd: Decimal,
    /// Gas price cache lifetime
    #[serde(default = "default_gas_ttl_secs")]
    pub gas_cache_ttl_secs: u64,
}

fn default_api_url() -> String {
    "https://clob.polymarket.com".to_string()
}
fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/user".to_string()
}
fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}
fn default_chain_id() -> u64 {
    137
}
fn default_gas_per_order() -> u64 {
    150_000
}
fn default_native_usd() -> Decimal {
    dec!(0.50)
}
fn default_gas_ttl_secs() -> u64 {
    30
}

impl Default for RealConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            rpc_url: default_rpc_url(),
            funding_address: String::new(),
            chain_id: default_chain_id(),
            gas_per_order: default_gas_per_order(),
            native_token_usd: default_native_usd(),
            gas_cache_ttl_secs: default_gas_ttl_secs(),
        }
    }
}

/// Sandbox fill model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// RNG seed; omit for a random session
    #[serde(default)]
    pub seed: Option<u64>,
    /// Baseline probability of a resting order filling per poll pass
    #[serde(default = "default_base_fill_prob")]
    pub base_fill_prob: f64,
    /// Fraction of observed taker flow one fill may consume
    #[serde(default = "default_taker_flow_fraction")]
    pub taker_flow_fraction: Decimal,
}

fn default_base_fill_prob() -> f64 {
    0.05
}
fn default_taker_flow_fraction() -> Decimal {
    dec!(0.25)
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            seed: None,
            base_fill_prob: default_base_fill_prob(),
            taker_flow_fraction: default_taker_flow_fraction(),
        }
    }
}

/// Fill reconciler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    /// Poll interval used while the push stream is stale
    #[serde(default = "default_fast_poll_ms")]
    pub fast_poll_interval_ms: u64,
    /// Push silence beyond this window triggers fast polling
    #[serde(default = "default_staleness_ms")]
    pub staleness_window_ms: u64,
}

fn default_poll_ms() -> u64 {
    2000
}
fn default_fast_poll_ms() -> u64 {
    500
}
fn default_staleness_ms() -> u64 {
    5000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_ms(),
            fast_poll_interval_ms: default_fast_poll_ms(),
            staleness_window_ms: default_staleness_ms(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.capital_usd <= Decimal::ZERO {
            anyhow::bail!("capital_usd must be positive");
        }
        if self.risk.max_exposure_usd <= Decimal::ZERO {
            anyhow::bail!("max_exposure_usd must be positive");
        }
        if self.risk.max_inventory_skew <= Decimal::ZERO || self.risk.max_inventory_skew > Decimal::ONE {
            anyhow::bail!("max_inventory_skew must be in (0, 1]");
        }
        if self.risk.stop_loss_pct <= Decimal::ZERO || self.risk.stop_loss_pct >= Decimal::ONE {
            anyhow::bail!("stop_loss_pct must be in (0, 1)");
        }
        if !(500..=2000).contains(&self.engine.quote_refresh_interval_ms) {
            anyhow::bail!("quote_refresh_interval_ms must be within 500-2000");
        }
        if self.engine.mode == TradingMode::Real && self.real.funding_address.is_empty() {
            anyhow::bail!("real mode requires a funding_address");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [engine]
        mode = "sandbox"
        capital_usd = 1000.0
        aggression = 2

        [risk]
        max_exposure_usd = 500.0
        max_inventory_skew = 0.3
        max_single_order_usd = 100.0
        stop_loss_pct = 0.10

        [feed]
        [[feed.markets]]
        market_id = "btc-15m"
        yes_token_id = "yes-1"
        no_token_id = "no-1"
        best_bid = 0.55
        best_ask = 0.57
        seconds_to_close = 600
        taker_fee_bps = 100

        [telemetry]
        log_level = "info"
    "#;

    #[test]
    fn test_config_deserialize() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.engine.mode, TradingMode::Sandbox);
        assert_eq!(config.engine.aggression, AggressionLevel::Balanced);
        assert_eq!(config.engine.quote_refresh_interval_ms, 1000);
        assert_eq!(config.feed.markets.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_aggression_level_bounds() {
        assert!(AggressionLevel::try_from(1).is_ok());
        assert!(AggressionLevel::try_from(3).is_ok());
        assert!(AggressionLevel::try_from(0).is_err());
        assert!(AggressionLevel::try_from(4).is_err());
    }

    #[test]
    fn test_real_mode_requires_funding_address() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.engine.mode = TradingMode::Real;
        assert!(config.validate().is_err());

        config.real.funding_address = "0xabc".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refresh_interval_bounds() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.engine.quote_refresh_interval_ms = 100;
        assert!(config.validate().is_err());
        config.engine.quote_refresh_interval_ms = 2000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconciler_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.reconciler.poll_interval_ms, 2000);
        assert!(config.reconciler.fast_poll_interval_ms < config.reconciler.poll_interval_ms);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }
}
