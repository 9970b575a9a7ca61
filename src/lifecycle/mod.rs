//! Order lifecycle management
//!
//! Single source of truth for order state. Backends return results and the
//! reconciler delivers fill events; only the `LifecycleManager` mutates an
//! `Order`. Every backend call is bounded by a timeout, and a timed-out
//! submission is treated as unknown-outcome: it is resolved with a status
//! query, never silently resubmitted.

use crate::exec::{
    BackendError, ExternalOrderStatus, FillEvent, OrderId, Outcome, Side, SubmitRequest,
    TradingBackend,
};
use crate::risk::RiskLedger;
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Remaining size below one smallest tradable unit counts as fully filled
const FULL_FILL_TOLERANCE: Decimal = dec!(0.01);

/// Order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged
    Pending,
    /// Resting on the book
    Open,
    /// Resting with some size filled
    PartiallyFilled,
    /// Fully filled (terminal)
    Filled,
    /// Cancelled locally or exchange-side (terminal)
    Cancelled,
    /// Market closed underneath the order (terminal)
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    /// Resting on the book from the engine's point of view
    pub fn is_working(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled
        )
    }

    /// Legal state machine edges; terminal states have no exits
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Open)
                | (Pending, Cancelled)
                | (Open, PartiallyFilled)
                | (Open, Filled)
                | (Open, Cancelled)
                | (Open, Expired)
                | (PartiallyFilled, Open)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
                | (PartiallyFilled, Expired)
        )
    }
}

/// Full record of one order
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub outcome: Outcome,
    pub price: Decimal,
    /// Requested size; never changes after creation
    pub size: Decimal,
    /// Cumulative filled size; monotone non-decreasing, never above `size`
    pub filled: Decimal,
    pub status: OrderStatus,
    /// Exchange order id, set on acknowledgement
    pub external_id: Option<String>,
    /// Signing nonce consumed by the submission
    pub nonce: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    pub last_fill_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Highest fill id applied to this order
    pub last_fill_id: u64,
    /// Estimated settlement gas attributed at submission
    pub gas_cost_usd: Decimal,
}

impl Order {
    fn new(request: &SubmitRequest) -> Self {
        Self {
            id: request.client_order_id,
            market_id: request.market_id.clone(),
            token_id: request.token_id.clone(),
            side: request.side,
            outcome: request.outcome,
            price: request.price,
            size: request.size,
            filled: Decimal::ZERO,
            status: OrderStatus::Pending,
            external_id: None,
            nonce: None,
            created_at: Utc::now(),
            acked_at: None,
            last_fill_at: None,
            closed_at: None,
            last_error: None,
            last_fill_id: 0,
            gas_cost_usd: Decimal::ZERO,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.size - self.filled
    }

    /// Move to a new status, enforcing the transition table
    fn transition(&mut self, to: OrderStatus) {
        if self.status == to {
            return;
        }
        if !self.status.can_transition_to(to) {
            tracing::warn!(
                order = %self.id,
                from = ?self.status,
                to = ?to,
                "illegal status transition dropped"
            );
            return;
        }
        self.status = to;
        if to.is_terminal() {
            self.closed_at = Some(Utc::now());
        }
    }
}

#[derive(Default)]
struct LifecycleState {
    orders: HashMap<OrderId, Order>,
    by_external: HashMap<String, OrderId>,
}

/// Owns all order state and mediates between engine, backend and reconciler
pub struct LifecycleManager {
    backend: Arc<dyn TradingBackend>,
    ledger: Arc<Mutex<RiskLedger>>,
    state: Mutex<LifecycleState>,
    backend_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(
        backend: Arc<dyn TradingBackend>,
        ledger: Arc<Mutex<RiskLedger>>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            ledger,
            state: Mutex::new(LifecycleState::default()),
            backend_timeout,
        }
    }

    /// Shared risk ledger
    pub fn ledger(&self) -> &Arc<Mutex<RiskLedger>> {
        &self.ledger
    }

    /// Submit a new order
    ///
    /// On timeout the outcome is ambiguous; the order's authoritative
    /// status is queried with the client order id before anything else
    /// happens. A submission is never retried blindly.
    pub async fn submit(&self, request: SubmitRequest) -> Result<OrderId, BackendError> {
        let id = request.client_order_id;
        {
            let mut state = self.state.lock().await;
            state.orders.insert(id, Order::new(&request));
        }

        match timeout(self.backend_timeout, self.backend.submit(&request)).await {
            Ok(Ok(ack)) => {
                let mut state = self.state.lock().await;
                state.by_external.insert(ack.external_id.clone(), id);
                if let Some(order) = state.orders.get_mut(&id) {
                    order.external_id = Some(ack.external_id);
                    order.nonce = Some(ack.nonce);
                    order.gas_cost_usd = ack.gas_cost_usd;
                    order.acked_at = Some(Utc::now());
                    order.transition(OrderStatus::Open);
                }
                telemetry::increment(CounterMetric::OrdersPlaced);
                tracing::debug!(order = %id, "order acknowledged");
                Ok(id)
            }
            Ok(Err(e)) => {
                self.mark_cancelled(id, &e.to_string()).await;
                tracing::warn!(order = %id, error = %e, "submission failed");
                Err(e)
            }
            Err(_) => self.resolve_ambiguous_submit(id).await,
        }
    }

    /// A submit call timed out: ask the exchange what actually happened
    async fn resolve_ambiguous_submit(&self, id: OrderId) -> Result<OrderId, BackendError> {
        let key = id.to_string();
        let status = timeout(self.backend_timeout, self.backend.order_status(&key))
            .await
            .unwrap_or(Err(BackendError::Timeout));

        match status {
            Ok(ExternalOrderStatus::Open) | Ok(ExternalOrderStatus::Filled) => {
                // The order made it to the book. Fills arrive keyed by the
                // exchange id, so look it up before indexing; only if the
                // lookup comes back empty does the client id stand in.
                let resolved = timeout(
                    self.backend_timeout,
                    self.backend.resolve_external_id(&key),
                )
                .await
                .unwrap_or(Err(BackendError::Timeout));

                let external = match resolved {
                    Ok(Some(external)) => external,
                    Ok(None) => {
                        tracing::warn!(order = %id, "no exchange id for acked order, keying by client id");
                        key.clone()
                    }
                    Err(e) => {
                        tracing::warn!(order = %id, error = %e, "exchange id lookup failed, keying by client id");
                        key.clone()
                    }
                };

                let mut state = self.state.lock().await;
                state.by_external.insert(external.clone(), id);
                // Some venues report fills under the client id too
                state.by_external.insert(key, id);
                if let Some(order) = state.orders.get_mut(&id) {
                    order.external_id = Some(external);
                    order.acked_at = Some(Utc::now());
                    order.transition(OrderStatus::Open);
                }
                telemetry::increment(CounterMetric::OrdersPlaced);
                tracing::warn!(order = %id, "submit timed out but order is on the book");
                Ok(id)
            }
            Ok(_) => {
                self.mark_cancelled(id, "submit timed out, order not on book")
                    .await;
                Err(BackendError::Timeout)
            }
            Err(e) => {
                self.mark_cancelled(id, &format!("submit timed out, status query failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// Apply one fill event from the reconciler
    ///
    /// Unknown orders, terminal orders and duplicate fill ids are dropped
    /// with a warning; the applied delta is clamped at the order's
    /// remaining size so `filled <= size` holds unconditionally.
    pub async fn apply_fill_event(&self, event: &FillEvent) {
        let applied = {
            let mut state = self.state.lock().await;
            let Some(&id) = state.by_external.get(&event.external_order_id) else {
                tracing::warn!(
                    external = %event.external_order_id,
                    fill_id = event.fill_id,
                    "fill for unknown order dropped"
                );
                return;
            };
            let Some(order) = state.orders.get_mut(&id) else {
                return;
            };

            if order.status.is_terminal() {
                tracing::warn!(order = %id, fill_id = event.fill_id, "fill for terminal order dropped");
                return;
            }
            if event.fill_id <= order.last_fill_id {
                telemetry::increment(CounterMetric::FillsDeduped);
                tracing::debug!(order = %id, fill_id = event.fill_id, "duplicate fill dropped");
                return;
            }
            order.last_fill_id = event.fill_id;

            let delta = event.size.min(order.remaining());
            if delta < event.size {
                tracing::warn!(
                    order = %id,
                    reported = %event.size,
                    applied = %delta,
                    "fill larger than remaining size clamped"
                );
            }
            if delta <= Decimal::ZERO {
                return;
            }

            order.filled += delta;
            order.last_fill_at = Some(event.timestamp);
            if order.remaining() < FULL_FILL_TOLERANCE {
                order.transition(OrderStatus::Filled);
                telemetry::increment(CounterMetric::OrdersFilled);
            } else {
                order.transition(OrderStatus::PartiallyFilled);
            }

            let mut clamped = event.clone();
            clamped.size = delta;
            clamped
        };

        let mut ledger = self.ledger.lock().await;
        if ledger.apply_fill(&applied).is_some() {
            telemetry::increment(CounterMetric::FillsApplied);
        }
    }

    /// Cancel one order
    ///
    /// An order the exchange no longer knows is resolved with a status
    /// query instead of being assumed cancelled.
    pub async fn cancel(&self, id: OrderId) -> Result<(), BackendError> {
        let external = {
            let state = self.state.lock().await;
            match state.orders.get(&id) {
                Some(order) if order.status.is_terminal() => return Ok(()),
                Some(order) => order.external_id.clone(),
                None => return Err(BackendError::UnknownOrder(id.to_string())),
            }
        };

        let Some(external) = external else {
            // Never acknowledged; nothing exchange-side to cancel
            self.mark_cancelled(id, "cancelled before acknowledgement").await;
            return Ok(());
        };

        match timeout(self.backend_timeout, self.backend.cancel(&external)).await {
            Ok(Ok(())) => {
                self.mark_cancelled(id, "cancelled").await;
                Ok(())
            }
            Ok(Err(BackendError::UnknownOrder(_))) => {
                let status = timeout(self.backend_timeout, self.backend.order_status(&external))
                    .await
                    .unwrap_or(Err(BackendError::Timeout))?;
                match status {
                    ExternalOrderStatus::Filled => {
                        // Fills are still in flight; leave the order working
                        tracing::warn!(order = %id, "cancel raced a full fill");
                        Ok(())
                    }
                    _ => {
                        self.mark_cancelled(id, "already gone exchange-side").await;
                        Ok(())
                    }
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Timeout),
        }
    }

    /// Cancel a working order and submit its replacement
    ///
    /// The replacement goes out only once the old order is confirmed off
    /// the book, so one market/side never carries two working orders.
    pub async fn cancel_replace(
        &self,
        id: OrderId,
        replacement: SubmitRequest,
    ) -> Result<Option<OrderId>, BackendError> {
        self.cancel(id).await?;

        let old_terminal = {
            let state = self.state.lock().await;
            state
                .orders
                .get(&id)
                .map(|o| o.status.is_terminal())
                .unwrap_or(true)
        };
        if !old_terminal {
            // Cancel raced a fill; try again next tick
            tracing::debug!(order = %id, "replacement deferred, old order still working");
            return Ok(None);
        }

        let new_id = self.submit(replacement).await?;
        Ok(Some(new_id))
    }

    /// Best-effort cancel of every working order; returns how many were
    /// confirmed cancelled
    pub async fn cancel_all(&self) -> usize {
        let working: Vec<OrderId> = {
            let state = self.state.lock().await;
            state
                .orders
                .values()
                .filter(|o| o.status.is_working())
                .map(|o| o.id)
                .collect()
        };

        let mut cancelled = 0;
        for id in working {
            match self.cancel(id).await {
                Ok(()) => cancelled += 1,
                Err(e) => tracing::warn!(order = %id, error = %e, "cancel failed during cancel-all"),
            }
        }
        cancelled
    }

    /// Expire every working order in a market that has closed
    pub async fn expire_market(&self, market_id: &str) {
        let working: Vec<(OrderId, Option<String>)> = {
            let state = self.state.lock().await;
            state
                .orders
                .values()
                .filter(|o| o.market_id == market_id && o.status.is_working())
                .map(|o| (o.id, o.external_id.clone()))
                .collect()
        };

        for (id, external) in working {
            if let Some(external) = external {
                if let Ok(Err(e)) =
                    timeout(self.backend_timeout, self.backend.cancel(&external)).await
                {
                    tracing::debug!(order = %id, error = %e, "cancel on expiry failed");
                }
            }
            let mut state = self.state.lock().await;
            if let Some(order) = state.orders.get_mut(&id) {
                order.transition(OrderStatus::Expired);
                if order.status == OrderStatus::Expired {
                    telemetry::increment(CounterMetric::OrdersExpired);
                }
            }
        }
        tracing::info!(market = market_id, "expired working orders for closed market");
    }

    /// Working orders for one market
    pub async fn working_orders_for(&self, market_id: &str) -> Vec<Order> {
        let state = self.state.lock().await;
        state
            .orders
            .values()
            .filter(|o| o.market_id == market_id && o.status.is_working())
            .cloned()
            .collect()
    }

    /// Total working order count
    pub async fn working_order_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .orders
            .values()
            .filter(|o| o.status.is_working())
            .count()
    }

    /// Snapshot of one order
    pub async fn order(&self, id: OrderId) -> Option<Order> {
        let state = self.state.lock().await;
        state.orders.get(&id).cloned()
    }

    async fn mark_cancelled(&self, id: OrderId, reason: &str) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&id) {
            order.last_error = Some(reason.to_string());
            order.transition(OrderStatus::Cancelled);
            if order.status == OrderStatus::Cancelled {
                telemetry::increment(CounterMetric::OrdersCancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::exec::{FillSource, SubmitAck};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Scriptable backend for lifecycle tests
    struct MockBackend {
        submits: AtomicUsize,
        cancels: Mutex<Vec<String>>,
        submit_delay: Option<Duration>,
        fail_submit: bool,
        cancel_unknown: bool,
        status: ExternalOrderStatus,
        resolved_external: Option<String>,
    }

    impl MockBackend {
        fn ok() -> Self {
            Self {
                submits: AtomicUsize::new(0),
                cancels: Mutex::new(Vec::new()),
                submit_delay: None,
                fail_submit: false,
                cancel_unknown: false,
                status: ExternalOrderStatus::Unknown,
                resolved_external: None,
            }
        }
    }

    #[async_trait]
    impl TradingBackend for MockBackend {
        async fn submit(&self, _request: &SubmitRequest) -> Result<SubmitAck, BackendError> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.submit_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_submit {
                return Err(BackendError::Submission("rejected".to_string()));
            }
            Ok(SubmitAck {
                external_id: format!("ext-{}", n),
                nonce: n as u64,
                gas_cost_usd: Decimal::ZERO,
            })
        }

        async fn cancel(&self, external_id: &str) -> Result<(), BackendError> {
            self.cancels.lock().await.push(external_id.to_string());
            if self.cancel_unknown {
                return Err(BackendError::UnknownOrder(external_id.to_string()));
            }
            Ok(())
        }

        async fn poll_fills(&self, _since: u64) -> Result<Vec<FillEvent>, BackendError> {
            Ok(Vec::new())
        }

        async fn subscribe_fills(&self) -> Result<mpsc::Receiver<FillEvent>, BackendError> {
            Err(BackendError::Unsupported("mock backend"))
        }

        async fn order_status(
            &self,
            _external_id: &str,
        ) -> Result<ExternalOrderStatus, BackendError> {
            Ok(self.status.clone())
        }

        async fn resolve_external_id(
            &self,
            _client_order_id: &str,
        ) -> Result<Option<String>, BackendError> {
            Ok(self.resolved_external.clone())
        }
    }

    fn manager(backend: MockBackend) -> LifecycleManager {
        manager_with(Arc::new(backend))
    }

    fn manager_with(backend: Arc<MockBackend>) -> LifecycleManager {
        let limits = RiskConfig {
            max_exposure_usd: dec!(10000),
            max_inventory_skew: dec!(0.3),
            max_single_order_usd: dec!(1000),
            stop_loss_pct: dec!(0.10),
        };
        let ledger = Arc::new(Mutex::new(RiskLedger::new(limits, dec!(1000), dec!(20))));
        LifecycleManager::new(backend, ledger, Duration::from_millis(100))
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            client_order_id: Uuid::new_v4(),
            market_id: "btc-15m".to_string(),
            token_id: "yes-1".to_string(),
            side: Side::Buy,
            outcome: Outcome::Yes,
            price: dec!(0.55),
            size: dec!(100),
        }
    }

    fn fill(external: &str, fill_id: u64, size: Decimal) -> FillEvent {
        FillEvent {
            fill_id,
            external_order_id: external.to_string(),
            market_id: "btc-15m".to_string(),
            token_id: "yes-1".to_string(),
            side: Side::Buy,
            outcome: Outcome::Yes,
            price: dec!(0.55),
            size,
            timestamp: Utc::now(),
            source: FillSource::Poll,
        }
    }

    #[tokio::test]
    async fn test_submit_acknowledged() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.external_id.as_deref(), Some("ext-1"));
        assert_eq!(order.nonce, Some(1));
        assert!(order.acked_at.is_some());
    }

    #[tokio::test]
    async fn test_submit_failure_cancels_order() {
        let mut backend = MockBackend::ok();
        backend.fail_submit = true;
        let manager = manager(backend);

        let req = request();
        let id = req.client_order_id;
        assert!(manager.submit(req).await.is_err());

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.last_error.is_some());
    }

    #[tokio::test]
    async fn test_submit_timeout_never_resubmits() {
        let mut backend = MockBackend::ok();
        backend.submit_delay = Some(Duration::from_millis(500));
        backend.status = ExternalOrderStatus::Unknown;
        let backend = Arc::new(backend);
        let manager = manager_with(backend.clone());

        let req = request();
        let id = req.client_order_id;
        assert!(manager.submit(req).await.is_err());

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        // Exactly one backend submission despite the timeout
        assert_eq!(backend.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_timeout_resolved_open() {
        let mut backend = MockBackend::ok();
        backend.submit_delay = Some(Duration::from_millis(500));
        backend.status = ExternalOrderStatus::Open;
        let manager = manager(backend);

        let req = request();
        let id = req.client_order_id;
        let resolved = manager.submit(req).await.unwrap();
        assert_eq!(resolved, id);

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        // No exchange id to be found, so the client id stands in
        assert_eq!(order.external_id.as_deref(), Some(id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_submit_timeout_fills_land_under_exchange_id() {
        let mut backend = MockBackend::ok();
        backend.submit_delay = Some(Duration::from_millis(500));
        backend.status = ExternalOrderStatus::Open;
        backend.resolved_external = Some("ext-9".to_string());
        let manager = manager(backend);

        let req = request();
        let id = req.client_order_id;
        manager.submit(req).await.unwrap();

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.external_id.as_deref(), Some("ext-9"));

        // Fills arrive keyed by the exchange id, not the client id
        manager.apply_fill_event(&fill("ext-9", 1, dec!(40))).await;

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled, dec!(40));
        let ledger = manager.ledger().lock().await;
        assert_eq!(ledger.position("btc-15m").yes_size, dec!(40));
    }

    #[tokio::test]
    async fn test_partial_fill_then_full_fill() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        manager.apply_fill_event(&fill("ext-1", 1, dec!(40))).await;
        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled, dec!(40));

        manager.apply_fill_event(&fill("ext-1", 2, dec!(60))).await;
        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled, dec!(100));
        assert!(order.closed_at.is_some());

        // Ledger position tracked the fills
        let ledger = manager.ledger().lock().await;
        assert_eq!(ledger.position("btc-15m").yes_size, dec!(100));
    }

    #[tokio::test]
    async fn test_duplicate_fill_dropped() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        let event = fill("ext-1", 1, dec!(40));
        manager.apply_fill_event(&event).await;
        manager.apply_fill_event(&event).await;

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.filled, dec!(40));
        let ledger = manager.ledger().lock().await;
        assert_eq!(ledger.position("btc-15m").yes_size, dec!(40));
    }

    #[tokio::test]
    async fn test_overfill_clamped_at_requested() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        manager.apply_fill_event(&fill("ext-1", 1, dec!(150))).await;

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.filled, dec!(100));
        assert_eq!(order.status, OrderStatus::Filled);
        // The clamped delta, not the reported size, reaches the ledger
        let ledger = manager.ledger().lock().await;
        assert_eq!(ledger.position("btc-15m").yes_size, dec!(100));
    }

    #[tokio::test]
    async fn test_dust_remainder_counts_as_filled() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        manager
            .apply_fill_event(&fill("ext-1", 1, dec!(99.995)))
            .await;

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_fill_for_unknown_order_dropped() {
        let manager = manager(MockBackend::ok());
        manager.submit(request()).await.unwrap();

        manager.apply_fill_event(&fill("ext-999", 1, dec!(10))).await;

        let ledger = manager.ledger().lock().await;
        assert_eq!(ledger.position("btc-15m").yes_size, dec!(0));
    }

    #[tokio::test]
    async fn test_fill_after_terminal_dropped() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();
        manager.cancel(id).await.unwrap();

        manager.apply_fill_event(&fill("ext-1", 1, dec!(10))).await;

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.filled, dec!(0));
    }

    #[tokio::test]
    async fn test_cancel_replace_single_working_order() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        let mut replacement = request();
        replacement.price = dec!(0.54);
        let new_id = manager.cancel_replace(id, replacement).await.unwrap();
        assert!(new_id.is_some());

        let working = manager.working_orders_for("btc-15m").await;
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].price, dec!(0.54));

        let old = manager.order(id).await.unwrap();
        assert_eq!(old.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_resolves_via_status() {
        let mut backend = MockBackend::ok();
        backend.cancel_unknown = true;
        backend.status = ExternalOrderStatus::Cancelled;
        let manager = manager(backend);

        let id = manager.submit(request()).await.unwrap();
        manager.cancel(id).await.unwrap();

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let manager = manager(MockBackend::ok());
        manager.submit(request()).await.unwrap();
        manager.submit(request()).await.unwrap();

        assert_eq!(manager.cancel_all().await, 2);
        assert_eq!(manager.working_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_expire_market() {
        let manager = manager(MockBackend::ok());
        let id = manager.submit(request()).await.unwrap();

        manager.expire_market("btc-15m").await;

        let order = manager.order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Open));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Filled));

        assert!(Open.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(Open));
        assert!(PartiallyFilled.can_transition_to(Filled));

        for terminal in [Filled, Cancelled, Expired] {
            for to in [Pending, Open, PartiallyFilled, Filled, Cancelled, Expired] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }
}
