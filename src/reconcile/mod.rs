//! Fill reconciliation
//!
//! Merges the backend's push fill stream with periodic polling into one
//! de-duplicated stream of fill events delivered to the lifecycle manager.
//! Delivery is at-least-once upstream; the deduper keeps the highest-seen
//! fill id per order so downstream sees each fill exactly once. A silent
//! push stream drops the poll interval to `fast_poll_interval_ms` until
//! push events resume; a push stream that closes for good keeps the fast
//! interval, since polling is then the only delivery path left.

use crate::config::ReconcilerConfig;
use crate::exec::{BackendError, FillEvent, TradingBackend};
use crate::lifecycle::LifecycleManager;
use crate::telemetry::{self, CounterMetric};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Highest-seen fill id per external order id
#[derive(Debug, Default)]
pub struct FillDeduper {
    seen: HashMap<String, u64>,
}

impl FillDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a fill if its id is new for the order, recording it
    pub fn accept(&mut self, event: &FillEvent) -> bool {
        let last = self
            .seen
            .get(&event.external_order_id)
            .copied()
            .unwrap_or(0);
        if event.fill_id <= last {
            return false;
        }
        self.seen
            .insert(event.external_order_id.clone(), event.fill_id);
        true
    }
}

/// Push + poll fill reconciliation task
pub struct FillReconciler {
    backend: Arc<dyn TradingBackend>,
    lifecycle: Arc<LifecycleManager>,
    config: ReconcilerConfig,
}

impl FillReconciler {
    pub fn new(
        backend: Arc<dyn TradingBackend>,
        lifecycle: Arc<LifecycleManager>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            backend,
            lifecycle,
            config,
        }
    }

    /// Run until shutdown; drains one final poll pass on exit
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut push = match self.backend.subscribe_fills().await {
            Ok(rx) => Some(rx),
            Err(BackendError::Unsupported(what)) => {
                tracing::info!(backend = what, "no push fill stream, poll-only");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "push subscription failed, poll-only");
                None
            }
        };

        let mut cursor: u64 = 0;
        let mut deduper = FillDeduper::new();
        let mut last_push = Instant::now();
        // A lost push stream is not the same as never having one: fills
        // that were in flight on it only exist in poll history now
        let mut push_lost = false;

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let fast_interval = Duration::from_millis(self.config.fast_poll_interval_ms);
        let staleness = Duration::from_millis(self.config.staleness_window_ms);

        loop {
            let interval = match &push {
                Some(_) if last_push.elapsed() > staleness => fast_interval,
                None if push_lost => fast_interval,
                _ => poll_interval,
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = recv_push(&mut push), if push.is_some() => {
                    match event {
                        Some(event) => {
                            last_push = Instant::now();
                            self.deliver(event, &mut cursor, &mut deduper).await;
                        }
                        None => {
                            tracing::warn!("push fill stream closed, fast poll-only");
                            push = None;
                            push_lost = true;
                        }
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    self.poll_pass(&mut cursor, &mut deduper).await;
                }
            }
        }

        // Catch fills that raced the shutdown
        self.poll_pass(&mut cursor, &mut deduper).await;
        tracing::info!("fill reconciler stopped");
    }

    async fn poll_pass(&self, cursor: &mut u64, deduper: &mut FillDeduper) {
        match self.backend.poll_fills(*cursor).await {
            Ok(fills) => {
                for event in fills {
                    self.deliver(event, cursor, deduper).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "fill poll failed"),
        }
    }

    async fn deliver(&self, event: FillEvent, cursor: &mut u64, deduper: &mut FillDeduper) {
        *cursor = (*cursor).max(event.fill_id);
        if !deduper.accept(&event) {
            telemetry::increment(CounterMetric::FillsDeduped);
            tracing::debug!(
                fill_id = event.fill_id,
                order = %event.external_order_id,
                "duplicate fill dropped by reconciler"
            );
            return;
        }
        self.lifecycle.apply_fill_event(&event).await;
    }
}

async fn recv_push(push: &mut Option<mpsc::Receiver<FillEvent>>) -> Option<FillEvent> {
    match push {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::exec::{
        ExternalOrderStatus, FillSource, Outcome, Side, SubmitAck, SubmitRequest,
    };
    use crate::risk::RiskLedger;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    fn fill(order: &str, fill_id: u64, size: Decimal, source: FillSource) -> FillEvent {
        FillEvent {
            fill_id,
            external_order_id: order.to_string(),
            market_id: "btc-15m".to_string(),
            token_id: "yes-1".to_string(),
            side: Side::Buy,
            outcome: Outcome::Yes,
            price: dec!(0.55),
            size,
            timestamp: Utc::now(),
            source,
        }
    }

    #[test]
    fn test_deduper_accepts_new_ids() {
        let mut deduper = FillDeduper::new();
        assert!(deduper.accept(&fill("a", 1, dec!(10), FillSource::Push)));
        assert!(deduper.accept(&fill("a", 2, dec!(10), FillSource::Poll)));
    }

    #[test]
    fn test_deduper_rejects_duplicates_and_stale_ids() {
        let mut deduper = FillDeduper::new();
        assert!(deduper.accept(&fill("a", 5, dec!(10), FillSource::Push)));
        assert!(!deduper.accept(&fill("a", 5, dec!(10), FillSource::Poll)));
        assert!(!deduper.accept(&fill("a", 3, dec!(10), FillSource::Poll)));
    }

    #[test]
    fn test_deduper_tracks_orders_independently() {
        let mut deduper = FillDeduper::new();
        assert!(deduper.accept(&fill("a", 5, dec!(10), FillSource::Push)));
        assert!(deduper.accept(&fill("b", 3, dec!(10), FillSource::Push)));
    }

    /// Backend whose fill history is scripted; push stream injectable
    struct ScriptedBackend {
        fills: Mutex<Vec<FillEvent>>,
        push: Mutex<Option<mpsc::Receiver<FillEvent>>>,
    }

    impl ScriptedBackend {
        fn new(fills: Vec<FillEvent>, push: Option<mpsc::Receiver<FillEvent>>) -> Self {
            Self {
                fills: Mutex::new(fills),
                push: Mutex::new(push),
            }
        }
    }

    #[async_trait]
    impl TradingBackend for ScriptedBackend {
        async fn submit(&self, _request: &SubmitRequest) -> Result<SubmitAck, BackendError> {
            Ok(SubmitAck {
                external_id: "ext-1".to_string(),
                nonce: 1,
                gas_cost_usd: Decimal::ZERO,
            })
        }

        async fn cancel(&self, _external_id: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn poll_fills(&self, since: u64) -> Result<Vec<FillEvent>, BackendError> {
            let fills = self.fills.lock().await;
            Ok(fills
                .iter()
                .filter(|f| f.fill_id > since)
                .cloned()
                .collect())
        }

        async fn subscribe_fills(&self) -> Result<mpsc::Receiver<FillEvent>, BackendError> {
            self.push
                .lock()
                .await
                .take()
                .ok_or(BackendError::Unsupported("scripted backend"))
        }

        async fn order_status(
            &self,
            _external_id: &str,
        ) -> Result<ExternalOrderStatus, BackendError> {
            Ok(ExternalOrderStatus::Open)
        }

        async fn resolve_external_id(
            &self,
            _client_order_id: &str,
        ) -> Result<Option<String>, BackendError> {
            Ok(None)
        }
    }

    fn lifecycle(backend: Arc<ScriptedBackend>) -> Arc<LifecycleManager> {
        let limits = RiskConfig {
            max_exposure_usd: dec!(10000),
            max_inventory_skew: dec!(0.3),
            max_single_order_usd: dec!(1000),
            stop_loss_pct: dec!(0.10),
        };
        let ledger = Arc::new(Mutex::new(RiskLedger::new(limits, dec!(1000), dec!(20))));
        Arc::new(LifecycleManager::new(
            backend,
            ledger,
            Duration::from_millis(100),
        ))
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval_ms: 20,
            fast_poll_interval_ms: 10,
            staleness_window_ms: 50,
        }
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

    #[tokio::test]
    async fn test_poll_only_delivers_all_fills_once() {
        let history = vec![
            fill("ext-1", 1, dec!(10), FillSource::Poll),
            fill("ext-1", 2, dec!(20), FillSource::Poll),
        ];
        let backend = Arc::new(ScriptedBackend::new(history, None));
        let lifecycle = lifecycle(backend.clone());
        let id = lifecycle.submit(request()).await.unwrap();

        let reconciler = FillReconciler::new(backend, lifecycle.clone(), config());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconciler.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let order = lifecycle.order(id).await.unwrap();
        assert_eq!(order.filled, dec!(30));
    }

    #[tokio::test]
    async fn test_push_disconnect_no_duplicate_no_loss() {
        // Fills 1 and 2 arrive over push before the stream dies; the full
        // history (1..=4) is available to polling. Every fill must apply
        // exactly once.
        let history = vec![
            fill("ext-1", 1, dec!(10), FillSource::Poll),
            fill("ext-1", 2, dec!(20), FillSource::Poll),
            fill("ext-1", 3, dec!(30), FillSource::Poll),
            fill("ext-1", 4, dec!(40), FillSource::Poll),
        ];
        let (push_tx, push_rx) = mpsc::channel(16);
        let backend = Arc::new(ScriptedBackend::new(history, Some(push_rx)));
        let lifecycle = lifecycle(backend.clone());
        let id = lifecycle.submit(request()).await.unwrap();

        let reconciler = FillReconciler::new(backend, lifecycle.clone(), config());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconciler.run(rx));

        push_tx
            .send(fill("ext-1", 1, dec!(10), FillSource::Push))
            .await
            .unwrap();
        push_tx
            .send(fill("ext-1", 2, dec!(20), FillSource::Push))
            .await
            .unwrap();
        // Stream disconnects
        drop(push_tx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let order = lifecycle.order(id).await.unwrap();
        assert_eq!(order.filled, dec!(100));
    }

    #[tokio::test]
    async fn test_lost_push_stream_keeps_fast_polling() {
        // The push stream closes before delivering anything, and the
        // normal poll interval is far beyond the test horizon. Only the
        // fast interval can deliver these fills while running.
        let history = vec![
            fill("ext-1", 1, dec!(10), FillSource::Poll),
            fill("ext-1", 2, dec!(20), FillSource::Poll),
        ];
        let (push_tx, push_rx) = mpsc::channel::<FillEvent>(16);
        let backend = Arc::new(ScriptedBackend::new(history, Some(push_rx)));
        let lifecycle = lifecycle(backend.clone());
        let id = lifecycle.submit(request()).await.unwrap();

        let reconciler = FillReconciler::new(
            backend,
            lifecycle.clone(),
            ReconcilerConfig {
                poll_interval_ms: 60_000,
                fast_poll_interval_ms: 10,
                staleness_window_ms: 20,
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconciler.run(rx));

        drop(push_tx);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Checked before shutdown: the exit path runs one last poll pass,
        // which would hide a reconciler stuck on the slow interval
        let order = lifecycle.order(id).await.unwrap();
        assert_eq!(order.filled, dec!(30));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
