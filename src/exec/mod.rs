//! Trading backend abstraction
//!
//! The `TradingBackend` trait covers the mechanical actions the lifecycle
//! manager requests: sign+submit, cancel, poll fills, subscribe to the push
//! fill stream, and query order status. Two implementations exist:
//!
//! - `RealBackend`: signs orders and talks to the live exchange
//! - `SandboxBackend`: same market data, simulated fills, no signing path
//!
//! The control loop never branches on which variant is active; the choice
//! is made once at startup from configuration.

mod gas;
mod real;
mod sandbox;
mod signer;

pub use gas::GasOracle;
pub use real::RealBackend;
pub use sandbox::SandboxBackend;
pub use signer::{NonceManager, Wallet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Engine-assigned order identifier, stable for the order's lifetime
pub type OrderId = Uuid;

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Binary outcome token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

/// Request to place a limit order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Engine order id, usable as client order id for status queries
    pub client_order_id: OrderId,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub outcome: Outcome,
    /// Limit price in [0, 1]
    pub price: Decimal,
    /// Requested size in shares
    pub size: Decimal,
}

impl SubmitRequest {
    /// Order notional in USD
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Acknowledgement of a submitted order
#[derive(Debug, Clone)]
pub struct SubmitAck {
    /// Exchange-assigned order id
    pub external_id: String,
    /// Signing nonce consumed by this submission
    pub nonce: u64,
    /// Estimated on-chain settlement cost attached for accounting
    pub gas_cost_usd: Decimal,
}

/// Exchange-side view of an order, used to resolve ambiguous outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalOrderStatus {
    /// Resting on the book (possibly partially filled)
    Open,
    /// Fully filled
    Filled,
    /// Cancelled or expired exchange-side
    Cancelled,
    /// Exchange has no record of the order
    Unknown,
}

impl ExternalOrderStatus {
    /// No further fills can arrive for this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExternalOrderStatus::Filled | ExternalOrderStatus::Cancelled)
    }
}

/// Delivery channel a fill event arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillSource {
    Push,
    Poll,
}

/// A confirmed (partial) fill of a resting order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    /// Exchange-monotonic fill identifier, unique per account
    pub fill_id: u64,
    /// Exchange order id the fill belongs to
    pub external_order_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub outcome: Outcome,
    /// Fill price
    pub price: Decimal,
    /// Filled size delta (not cumulative)
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub source: FillSource,
}

/// Errors surfaced by a trading backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("submission failed: {0}")]
    Submission(String),

    #[error("stale nonce rejected by exchange")]
    StaleNonce,

    #[error("cancel failed: {0}")]
    Cancel(String),

    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("backend call timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Errors that must halt the control loop rather than one order
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Auth(_))
    }
}

/// Shared capability set of the Real and Sandbox backends
#[async_trait]
pub trait TradingBackend: Send + Sync {
    /// Sign (where applicable) and submit an order
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitAck, BackendError>;

    /// Cancel a resting order by exchange id
    async fn cancel(&self, external_id: &str) -> Result<(), BackendError>;

    /// Fetch fills with `fill_id` greater than the cursor
    async fn poll_fills(&self, since: u64) -> Result<Vec<FillEvent>, BackendError>;

    /// Open the push fill stream
    ///
    /// `BackendError::Unsupported` means the backend has no push channel,
    /// which is distinct from a connected stream with no events yet.
    async fn subscribe_fills(&self) -> Result<mpsc::Receiver<FillEvent>, BackendError>;

    /// Query the authoritative status of an order
    async fn order_status(&self, external_id: &str) -> Result<ExternalOrderStatus, BackendError>;

    /// Resolve the exchange-assigned order id for a client order id
    ///
    /// Used after an ambiguous submission landed on the book: fills carry
    /// the exchange id, so the lookup keys must be rewired to it. `None`
    /// means the exchange has no record under that client id.
    async fn resolve_external_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<String>, BackendError>;
}
