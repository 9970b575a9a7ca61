//! Real trading backend
//!
//! Signs every order with the account key and a strictly increasing nonce,
//! submits over the exchange's order-entry REST endpoint, and listens for
//! fills on the user WebSocket channel with REST polling as a fallback.
//! A stale-nonce rejection triggers one resync against the authoritative
//! account nonce before a single retry; repeated failure surfaces as a
//! per-order submission error, never a crash.

use super::{
    BackendError, ExternalOrderStatus, FillEvent, FillSource, GasOracle, NonceManager, SubmitAck,
    SubmitRequest, TradingBackend, Wallet,
};
use crate::config::RealConfig;
use crate::ws::{WsClient, WsConfig, WsMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

/// CTF Exchange contract on Polygon mainnet
const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

#[derive(Debug, Serialize)]
struct ApiOrder<'a> {
    client_order_id: String,
    token_id: &'a str,
    side: super::Side,
    price: Decimal,
    size: Decimal,
    nonce: u64,
    signature: String,
    owner: String,
    post_only: bool,
}

#[derive(Debug, Deserialize)]
struct ApiSubmitResponse {
    success: bool,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiNonceResponse {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct ApiFill {
    id: u64,
    order_id: String,
    market: String,
    asset_id: String,
    side: super::Side,
    outcome: super::Outcome,
    price: Decimal,
    size: Decimal,
    timestamp: DateTime<Utc>,
}

impl ApiFill {
    fn into_event(self, source: FillSource) -> FillEvent {
        FillEvent {
            fill_id: self.id,
            external_order_id: self.order_id,
            market_id: self.market,
            token_id: self.asset_id,
            side: self.side,
            outcome: self.outcome,
            price: self.price,
            size: self.size,
            timestamp: self.timestamp,
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiOrderStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiOrderRef {
    order_id: String,
}

/// Live exchange backend with order signing
pub struct RealBackend {
    http: reqwest::Client,
    config: RealConfig,
    wallet: Wallet,
    nonces: NonceManager,
    gas: GasOracle,
}

impl RealBackend {
    /// Connect to the exchange: derive the wallet and fetch the
    /// authoritative starting nonce for the account
    pub async fn connect(config: RealConfig, private_key: &str) -> Result<Self, BackendError> {
        let wallet = Wallet::from_private_key(private_key)?;
        let http = reqwest::Client::new();
        let gas = GasOracle::new(
            http.clone(),
            config.rpc_url.clone(),
            std::time::Duration::from_secs(config.gas_cache_ttl_secs),
        );

        let start_nonce = Self::fetch_nonce(&http, &config.api_url, &wallet).await?;
        tracing::info!(address = ?wallet.address(), nonce = start_nonce, "real backend connected");

        Ok(Self {
            http,
            config,
            wallet,
            nonces: NonceManager::new(start_nonce),
            gas,
        })
    }

    async fn fetch_nonce(
        http: &reqwest::Client,
        api_url: &str,
        wallet: &Wallet,
    ) -> Result<u64, BackendError> {
        let url = format!("{}/auth/nonce", api_url);
        let response = http
            .get(&url)
            .query(&[("address", format!("{:?}", wallet.address()))])
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Auth("nonce fetch unauthorized".to_string()));
        }

        let body: ApiNonceResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(body.nonce)
    }

    /// Resync the local nonce counter against the account's authoritative
    /// nonce; the counter never moves backwards
    async fn resync_nonce(&self) -> Result<(), BackendError> {
        let authoritative = Self::fetch_nonce(&self.http, &self.config.api_url, &self.wallet).await?;
        self.nonces.resync(authoritative);
        tracing::warn!(nonce = authoritative, "nonce resynced from account");
        Ok(())
    }

    async fn submit_once(
        &self,
        request: &SubmitRequest,
        nonce: u64,
    ) -> Result<String, BackendError> {
        let signature = self
            .wallet
            .sign_order(request, self.config.chain_id, CTF_EXCHANGE, nonce)?;

        let order = ApiOrder {
            client_order_id: request.client_order_id.to_string(),
            token_id: &request.token_id,
            side: request.side,
            price: request.price,
            size: request.size,
            nonce,
            signature,
            owner: self.config.funding_address.clone(),
            post_only: true,
        };

        let url = format!("{}/order", self.config.api_url);
        let response = self
            .http
            .post(&url)
            .json(&order)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Auth("order submission unauthorized".to_string()));
        }

        let body: ApiSubmitResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if body.success {
            body.order_id
                .ok_or_else(|| BackendError::Submission("ack without order id".to_string()))
        } else {
            let reason = body.error.unwrap_or_else(|| "unknown rejection".to_string());
            if reason.to_lowercase().contains("nonce") {
                Err(BackendError::StaleNonce)
            } else {
                Err(BackendError::Submission(reason))
            }
        }
    }
}

#[async_trait]
impl TradingBackend for RealBackend {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitAck, BackendError> {
        // Settlement cost estimated from the live gas price; a failed RPC
        // read degrades to zero rather than blocking the order
        let gas_cost_usd = match self
            .gas
            .order_cost_usd(self.config.gas_per_order, self.config.native_token_usd)
            .await
        {
            Ok(cost) => cost,
            Err(e) => {
                tracing::warn!(error = %e, "gas estimate unavailable");
                Decimal::ZERO
            }
        };

        let nonce = self.nonces.next();
        match self.submit_once(request, nonce).await {
            Ok(external_id) => Ok(SubmitAck {
                external_id,
                nonce,
                gas_cost_usd,
            }),
            Err(BackendError::StaleNonce) => {
                // One resync-and-retry with a fresh nonce; the stale one
                // is burned, never reissued
                self.resync_nonce().await?;
                let retry_nonce = self.nonces.next();
                let external_id = self.submit_once(request, retry_nonce).await?;
                Ok(SubmitAck {
                    external_id,
                    nonce: retry_nonce,
                    gas_cost_usd,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, external_id: &str) -> Result<(), BackendError> {
        let url = format!("{}/order/{}", self.config.api_url, external_id);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => {
                Err(BackendError::UnknownOrder(external_id.to_string()))
            }
            reqwest::StatusCode::UNAUTHORIZED => {
                Err(BackendError::Auth("cancel unauthorized".to_string()))
            }
            s => Err(BackendError::Cancel(format!("status {}", s))),
        }
    }

    async fn poll_fills(&self, since: u64) -> Result<Vec<FillEvent>, BackendError> {
        let url = format!("{}/fills", self.config.api_url);
        let fills: Vec<ApiFill> = self
            .http
            .get(&url)
            .query(&[
                ("since", since.to_string()),
                ("address", format!("{:?}", self.wallet.address())),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?
            .json()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        Ok(fills
            .into_iter()
            .map(|f| f.into_event(FillSource::Poll))
            .collect())
    }

    async fn subscribe_fills(&self) -> Result<mpsc::Receiver<FillEvent>, BackendError> {
        let ws = WsClient::new(WsConfig::new(self.config.ws_url.clone()));
        let (mut messages, sender) = ws.connect_bidirectional();

        let subscribe = json!({
            "type": "user",
            "auth": { "address": format!("{:?}", self.wallet.address()) },
        })
        .to_string();

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match message {
                    WsMessage::Connected => {
                        if sender.send(subscribe.clone()).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Text(text) => match serde_json::from_str::<ApiFill>(&text) {
                        Ok(fill) => {
                            if tx.send(fill.into_event(FillSource::Push)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "non-fill ws message");
                        }
                    },
                    WsMessage::Disconnected => {
                        tracing::warn!("fill stream closed");
                        break;
                    }
                    WsMessage::Reconnecting { attempt } => {
                        tracing::warn!(attempt, "fill stream reconnecting");
                    }
                    WsMessage::Binary(_) => {}
                }
            }
        });

        Ok(rx)
    }

    async fn order_status(&self, external_id: &str) -> Result<ExternalOrderStatus, BackendError> {
        let url = format!("{}/order/{}", self.config.api_url, external_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ExternalOrderStatus::Unknown);
        }

        let body: ApiOrderStatus = response
            .json()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        Ok(match body.status.as_str() {
            "open" | "live" | "partially_filled" => ExternalOrderStatus::Open,
            "filled" | "matched" => ExternalOrderStatus::Filled,
            "cancelled" | "canceled" | "expired" => ExternalOrderStatus::Cancelled,
            _ => ExternalOrderStatus::Unknown,
        })
    }

    async fn resolve_external_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<String>, BackendError> {
        let url = format!("{}/orders", self.config.api_url);
        let response = self
            .http
            .get(&url)
            .query(&[("client_order_id", client_order_id)])
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Auth("order lookup unauthorized".to_string()));
        }

        let orders: Vec<ApiOrderRef> = response
            .json()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(orders.into_iter().next().map(|o| o.order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Outcome;
    use rust_decimal_macros::dec;

    #[test]
    fn test_api_fill_into_event() {
        let fill = ApiFill {
            id: 7,
            order_id: "ext-1".to_string(),
            market: "btc-15m".to_string(),
            asset_id: "yes-1".to_string(),
            side: super::super::Side::Buy,
            outcome: Outcome::Yes,
            price: dec!(0.55),
            size: dec!(25),
            timestamp: Utc::now(),
        };
        let event = fill.into_event(FillSource::Push);
        assert_eq!(event.fill_id, 7);
        assert_eq!(event.source, FillSource::Push);
        assert_eq!(event.size, dec!(25));
    }

    #[test]
    fn test_api_fill_parses_wire_json() {
        let raw = r#"{
            "id": 12,
            "order_id": "0xabc",
            "market": "btc-15m",
            "asset_id": "yes-1",
            "side": "BUY",
            "outcome": "YES",
            "price": "0.55",
            "size": "10",
            "timestamp": "2026-08-31T12:00:00Z"
        }"#;
        let fill: ApiFill = serde_json::from_str(raw).unwrap();
        assert_eq!(fill.id, 12);
        assert_eq!(fill.price, dec!(0.55));
    }

    #[test]
    fn test_submit_response_parses_error() {
        let raw = r#"{"success": false, "error": "invalid nonce"}"#;
        let body: ApiSubmitResponse = serde_json::from_str(raw).unwrap();
        assert!(!body.success);
        assert!(body.error.unwrap().contains("nonce"));
    }
}
