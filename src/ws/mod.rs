//! WebSocket transport for the push fill channel
//!
//! Reconnects with exponential backoff and keeps the connection alive with
//! ping/pong frames. The backend sends its subscription message whenever a
//! (re)connection is established, so a dropped stream resubscribes itself.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Maximum reconnection attempts before giving up (0 = infinite)
    pub max_reconnect_attempts: u32,
    /// Initial delay before the first reconnection attempt
    pub initial_reconnect_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,
    /// Interval for sending ping frames
    pub ping_interval: Duration,
}

impl WsConfig {
    /// Create a config with the given URL and default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }

    /// Limit reconnection attempts
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Set the initial reconnection delay
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }
}

/// Messages delivered to the consumer
#[derive(Debug, Clone)]
pub enum WsMessage {
    /// Text frame from the server
    Text(String),
    /// Binary frame from the server
    Binary(Vec<u8>),
    /// Connection established (consumer should (re)subscribe)
    Connected,
    /// Connection closed for good
    Disconnected,
    /// Reconnecting after a failure
    Reconnecting { attempt: u32 },
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectsExceeded,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Reconnecting WebSocket client
pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    /// Create a client with the given configuration
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Connect and return (message receiver, outbound text sender)
    ///
    /// Spawns a background task owning the connection. `WsMessage::Connected`
    /// is delivered after every successful (re)connect so the consumer can
    /// replay its subscription.
    pub fn connect_bidirectional(&self) -> (mpsc::Receiver<WsMessage>, mpsc::Sender<String>) {
        let (msg_tx, msg_rx) = mpsc::channel(1024);
        let (send_tx, send_rx) = mpsc::channel(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::run_loop(config, msg_tx, send_rx).await {
                tracing::error!(error = %e, "websocket loop failed");
            }
        });

        (msg_rx, send_tx)
    }

    async fn run_loop(
        config: WsConfig,
        tx: mpsc::Sender<WsMessage>,
        mut send_rx: mpsc::Receiver<String>,
    ) -> Result<(), WsError> {
        let mut attempts = 0;
        let mut delay = config.initial_reconnect_delay;

        loop {
            match Self::connect_and_stream(&config, &tx, &mut send_rx).await {
                Ok(()) => {
                    tracing::info!("websocket closed cleanly");
                    let _ = tx.send(WsMessage::Disconnected).await;
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(error = %e, attempt = attempts, "websocket error, reconnecting");

                    if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
                        let _ = tx.send(WsMessage::Disconnected).await;
                        return Err(WsError::MaxReconnectsExceeded);
                    }
                    if tx.is_closed() {
                        return Ok(());
                    }

                    let _ = tx.send(WsMessage::Reconnecting { attempt: attempts }).await;
                    sleep(delay).await;
                    delay = (delay * 2).min(config.max_reconnect_delay);
                }
            }
        }
    }

    async fn connect_and_stream(
        config: &WsConfig,
        tx: &mpsc::Sender<WsMessage>,
        send_rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), WsError> {
        tracing::info!(url = %config.url, "connecting websocket");

        let (ws_stream, _response) = connect_async(&config.url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        if tx.send(WsMessage::Connected).await.is_err() {
            return Ok(());
        }

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(WsMessage::Text(text)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if tx.send(WsMessage::Binary(data)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(WsError::ConnectionFailed(e.to_string())),
                        None => return Err(WsError::ConnectionFailed("stream ended".into())),
                    }
                }
                outbound = send_rx.recv() => {
                    match outbound {
                        Some(text) => {
                            write.send(Message::Text(text)).await
                                .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        }
                        None => return Ok(()),
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(vec![])).await
                        .map_err(|e| WsError::SendFailed(e.to_string()))?;
                }
            }
        }
    }
}
