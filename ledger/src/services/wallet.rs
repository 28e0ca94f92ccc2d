//! Wallet service client contract.
//!
//! Key material never enters the validator process. The core hands the
//! wallet service bytes to sign and receives detached signatures; it hands
//! back `(key, signature, bytes)` triples for verification. The in-process
//! [`Ed25519Wallet`] exists for dev mode and tests — it implements the
//! same contract with locally held Ed25519 keys.

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use super::ServiceError;
use crate::model::SignatureAlgorithm;

/// A signature produced by the wallet service.
#[derive(Debug, Clone)]
pub struct WalletSignature {
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
    pub signed_by: String,
    pub algorithm: String,
}

/// Signing and verification capabilities of the wallet service.
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Resolve (creating if absent) the system wallet for a validator.
    /// Returns the wallet ID to pass to [`WalletClient::sign`].
    async fn create_or_retrieve_system_wallet(
        &self,
        validator_id: &str,
    ) -> Result<String, ServiceError>;

    /// Sign `data` with the named wallet.
    async fn sign(&self, wallet_id: &str, data: &[u8]) -> Result<WalletSignature, ServiceError>;

    /// Verify a detached signature. Returns `Ok(false)` for a well-formed
    /// but invalid signature; `Err` only for malformed inputs or service
    /// failure.
    async fn verify(
        &self,
        public_key: &[u8],
        signature: &[u8],
        algorithm: &str,
        data: &[u8],
    ) -> Result<bool, ServiceError>;
}

// ---------------------------------------------------------------------------
// In-process Ed25519 wallet
// ---------------------------------------------------------------------------

/// Dev-mode wallet holding Ed25519 keys in process memory.
///
/// Wallet IDs are `system:{validator_id}`. Only Ed25519 is implemented;
/// verification requests for post-quantum schemes fail with a service
/// error so callers surface them as cryptographic validation failures
/// rather than silently passing.
#[derive(Default)]
pub struct Ed25519Wallet {
    keys: DashMap<String, SigningKey>,
}

impl Ed25519Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The public key of a wallet, if it exists.
    pub fn public_key(&self, wallet_id: &str) -> Option<Vec<u8>> {
        self.keys
            .get(wallet_id)
            .map(|key| key.verifying_key().to_bytes().to_vec())
    }
}

#[async_trait]
impl WalletClient for Ed25519Wallet {
    async fn create_or_retrieve_system_wallet(
        &self,
        validator_id: &str,
    ) -> Result<String, ServiceError> {
        if validator_id.trim().is_empty() {
            return Err(ServiceError::Failed(
                "validator id must not be empty".to_string(),
            ));
        }
        let wallet_id = format!("system:{validator_id}");
        self.keys
            .entry(wallet_id.clone())
            .or_insert_with(|| SigningKey::generate(&mut OsRng));
        Ok(wallet_id)
    }

    async fn sign(&self, wallet_id: &str, data: &[u8]) -> Result<WalletSignature, ServiceError> {
        let key = self
            .keys
            .get(wallet_id)
            .ok_or_else(|| ServiceError::NotFound(format!("wallet {wallet_id}")))?;
        let signature = key.sign(data);
        Ok(WalletSignature {
            signature: signature.to_bytes().to_vec(),
            public_key: key.verifying_key().to_bytes().to_vec(),
            signed_by: wallet_id.to_string(),
            algorithm: SignatureAlgorithm::Ed25519.name().to_string(),
        })
    }

    async fn verify(
        &self,
        public_key: &[u8],
        signature: &[u8],
        algorithm: &str,
        data: &[u8],
    ) -> Result<bool, ServiceError> {
        match SignatureAlgorithm::from_name(algorithm) {
            Some(SignatureAlgorithm::Ed25519) => {}
            Some(other) => {
                return Err(ServiceError::Failed(format!(
                    "algorithm {other} not available in the in-process wallet"
                )))
            }
            None => {
                return Err(ServiceError::Failed(format!(
                    "unknown signature algorithm: {algorithm}"
                )))
            }
        }

        let key_bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| ServiceError::Failed("public key must be 32 bytes".to_string()))?;
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return Ok(false);
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(verifying_key.verify(data, &sig).is_ok())
    }
}
