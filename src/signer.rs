//! Wallet signer contract.
//!
//! Signing happens in the user's wallet and may block indefinitely on the
//! approval prompt; no timeout is imposed here. Adapters over browser or
//! remote wallets must map a declined prompt to
//! [`GateError::user_rejected`] so the retry controller never resubmits a
//! rejection.

use alloy_primitives::{hex, Address, B256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::core::{GateError, Result};

/// A signer capable of approving sponsored-call digests.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The signing account.
    fn address(&self) -> Address;

    /// Sign a 32-byte digest, returning the 65-byte `r || s || v`
    /// signature as a 0x-prefixed hex string.
    async fn sign_digest(&self, digest: B256) -> Result<String>;
}

/// In-process signer backed by a private key.
///
/// Used by tests and headless tooling; production deployments wrap the
/// user's wallet instead.
#[derive(Clone)]
pub struct LocalWalletSigner {
    inner: PrivateKeySigner,
}

impl LocalWalletSigner {
    /// Wrap an existing private-key signer.
    #[must_use]
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    /// Parse a signer from a hex-encoded private key.
    pub fn from_key(key: &str) -> Result<Self> {
        let inner: PrivateKeySigner = key
            .parse()
            .map_err(|e| GateError::config(format!("Invalid private key: {e}")))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_digest(&self, digest: B256) -> Result<String> {
        let signature = self
            .inner
            .sign_hash(&digest)
            .await
            .map_err(|e| GateError::config(format!("Local signing failed: {e}")))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}
