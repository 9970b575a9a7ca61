//! Order signing and nonce management
//!
//! Orders are signed with a Keccak-256 structured digest over the order
//! fields, keyed by the account's private key. Nonces are strictly
//! increasing per account and never reused, even across retries.

use super::{BackendError, Side, SubmitRequest};
use ethers_core::types::{Address, H256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Wallet for signing orders
#[derive(Clone)]
pub struct Wallet {
    address: Address,
    private_key: [u8; 32],
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl Wallet {
    /// Create a wallet from a private key hex string (0x prefix optional)
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, BackendError> {
        let key_str = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);

        let key_bytes = hex::decode(key_str)
            .map_err(|e| BackendError::Auth(format!("invalid private key hex: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(BackendError::Auth(format!(
                "private key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&key_bytes);

        let address = Self::derive_address(&private_key)?;

        Ok(Self {
            address,
            private_key,
        })
    }

    /// Derive the Ethereum address from the private key
    fn derive_address(private_key: &[u8; 32]) -> Result<Address, BackendError> {
        use ethers_core::k256::ecdsa::SigningKey;
        use ethers_core::k256::elliptic_curve::sec1::ToEncodedPoint;
        use ethers_core::k256::PublicKey;

        let signing_key = SigningKey::from_bytes(private_key.into())
            .map_err(|e| BackendError::Auth(format!("invalid private key: {}", e)))?;

        let verifying_key = signing_key.verifying_key();
        let public_key = PublicKey::from(verifying_key);
        let public_key_point = public_key.to_encoded_point(false);
        let public_key_bytes = public_key_point.as_bytes();

        // Skip the 0x04 uncompressed-point prefix
        let mut hasher = Keccak256::new();
        hasher.update(&public_key_bytes[1..]);
        let hash = hasher.finalize();

        let address_bytes: [u8; 20] = hash[12..32]
            .try_into()
            .map_err(|_| BackendError::Auth("failed to derive address".to_string()))?;

        Ok(Address::from(address_bytes))
    }

    /// Account address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Structured order digest: keccak over chain id, exchange contract,
    /// maker address, token, side, scaled price/size and nonce
    pub fn order_digest(
        &self,
        request: &SubmitRequest,
        chain_id: u64,
        exchange: &str,
        nonce: u64,
    ) -> Result<H256, BackendError> {
        let price_scaled = scale_1e6(request.price)?;
        let size_scaled = scale_1e6(request.size)?;
        let side_byte: u8 = match request.side {
            Side::Buy => 0,
            Side::Sell => 1,
        };

        let mut hasher = Keccak256::new();
        hasher.update(chain_id.to_be_bytes());
        hasher.update(exchange.as_bytes());
        hasher.update(self.address.as_bytes());
        hasher.update(request.token_id.as_bytes());
        hasher.update([side_byte]);
        hasher.update(price_scaled.to_be_bytes());
        hasher.update(size_scaled.to_be_bytes());
        hasher.update(nonce.to_be_bytes());

        Ok(H256::from_slice(&hasher.finalize()))
    }

    /// Sign an order digest, returning a 65-byte r||s||v hex signature
    pub fn sign_digest(&self, digest: H256) -> Result<String, BackendError> {
        use ethers_core::k256::ecdsa::signature::hazmat::PrehashSigner;
        use ethers_core::k256::ecdsa::SigningKey;

        let signing_key = SigningKey::from_bytes((&self.private_key).into())
            .map_err(|e| BackendError::Auth(format!("invalid signing key: {}", e)))?;

        let (sig, recovery_id): (ethers_core::k256::ecdsa::Signature, _) = signing_key
            .sign_prehash(digest.as_bytes())
            .map_err(|e| BackendError::Auth(format!("signing failed: {}", e)))?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&sig.to_bytes());
        bytes[64] = u8::from(recovery_id) + 27;

        Ok(format!("0x{}", hex::encode(bytes)))
    }

    /// Sign an order under the given nonce
    pub fn sign_order(
        &self,
        request: &SubmitRequest,
        chain_id: u64,
        exchange: &str,
        nonce: u64,
    ) -> Result<String, BackendError> {
        let digest = self.order_digest(request, chain_id, exchange, nonce)?;
        self.sign_digest(digest)
    }
}

fn scale_1e6(value: Decimal) -> Result<u64, BackendError> {
    (value * Decimal::from(1_000_000))
        .trunc()
        .to_u64()
        .ok_or_else(|| BackendError::Submission(format!("value out of range: {}", value)))
}

/// Strictly increasing per-account nonce source
#[derive(Debug)]
pub struct NonceManager {
    next: AtomicU64,
}

impl NonceManager {
    /// Start issuing from the given nonce
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Issue the next nonce; each value is handed out at most once
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Resync against the authoritative account nonce
    ///
    /// The counter never moves backwards, so nonces issued before the
    /// resync stay unusable rather than being reissued.
    pub fn resync(&self, authoritative: u64) {
        self.next.fetch_max(authoritative, Ordering::SeqCst);
    }

    /// Peek at the next nonce without consuming it
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
