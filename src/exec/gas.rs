//! Gas price oracle
//!
//! Estimates the on-chain settlement cost of an order from the network's
//! current gas price instead of a fixed constant. Quotes are cached for a
//! short TTL so the control loop never waits on the RPC per order.

use super::BackendError;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<serde_json::Value>,
}

/// JSON-RPC gas price source with a TTL cache
pub struct GasOracle {
    client: reqwest::Client,
    rpc_url: String,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Decimal)>>,
}

impl GasOracle {
    /// Create an oracle against the given RPC endpoint
    pub fn new(client: reqwest::Client, rpc_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Current gas price in gwei, from cache when fresh
    pub async fn gas_price_gwei(&self) -> Result<Decimal, BackendError> {
        {
            let cache = self.cache.lock().await;
            if let Some((at, price)) = *cache {
                if at.elapsed() < self.ttl {
                    return Ok(price);
                }
            }
        }

        let price = self.fetch_gas_price().await?;
        *self.cache.lock().await = Some((Instant::now(), price));
        Ok(price)
    }

    /// Estimated USD cost of settling one order
    pub async fn order_cost_usd(
        &self,
        gas_per_order: u64,
        native_token_usd: Decimal,
    ) -> Result<Decimal, BackendError> {
        let gwei = self.gas_price_gwei().await?;
        // gas * gwei -> native token via 1e9, then into USD
        Ok(gwei * Decimal::from(gas_per_order) / Decimal::from(1_000_000_000u64) * native_token_usd)
    }

    async fn fetch_gas_price(&self) -> Result<Decimal, BackendError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_gasPrice",
            "params": [],
        });

        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))?;

        if let Some(err) = response.error {
            return Err(BackendError::Rpc(err.to_string()));
        }

        let hex_wei = response
            .result
            .ok_or_else(|| BackendError::Rpc("empty eth_gasPrice result".to_string()))?;

        parse_wei_hex(&hex_wei)
    }
}

/// Parse a 0x-prefixed hex wei quantity into gwei
fn parse_wei_hex(hex_wei: &str) -> Result<Decimal, BackendError> {
    let stripped = hex_wei.strip_prefix("0x").unwrap_or(hex_wei);
    let wei = u128::from_str_radix(stripped, 16)
        .map_err(|e| BackendError::Rpc(format!("bad gas price {}: {}", hex_wei, e)))?;
    Ok(Decimal::from(wei) / Decimal::from(1_000_000_000u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_wei_hex() {
        // 30 gwei
        assert_eq!(parse_wei_hex("0x6fc23ac00").unwrap(), dec!(30));
        // 1 wei
        assert_eq!(parse_wei_hex("0x1").unwrap(), Decimal::from(1) / Decimal::from(1_000_000_000u64));
    }

    #[test]
    fn test_parse_wei_hex_invalid() {
        assert!(parse_wei_hex("0xzz").is_err());
        assert!(parse_wei_hex("").is_err());
    }

    #[tokio::test]
    async fn test_oracle_unreachable_rpc() {
        let oracle = GasOracle::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            Duration::from_secs(30),
        );
        assert!(oracle.gas_price_gwei().await.is_err());
    }
}
