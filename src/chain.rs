//! On-chain read access and ERC-20 calldata encoding.
//!
//! The engine never talks to a node directly; everything goes through the
//! narrow [`ChainView`] contract so tests can substitute a double. The
//! production implementation, [`RpcChainView`], speaks raw JSON-RPC
//! `eth_call` for contract reads and uses the alloy provider for
//! `eth_getCode`.

use alloy_primitives::{hex, keccak256, Address, U256};
use alloy_provider::{Provider, ProviderBuilder};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::core::{GateConfig, GateError, Result};

/// Compute the 4-byte function selector for a Solidity signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Left-pad an address into a 32-byte ABI word.
#[must_use]
pub fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// Encode `transfer(address,uint256)` calldata.
#[must_use]
pub fn encode_transfer(recipient: Address, amount: U256) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&selector("transfer(address,uint256)"));
    data.extend_from_slice(&address_word(recipient));
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    data
}

/// Encode `balanceOf(address)` calldata.
#[must_use]
pub fn encode_balance_of(owner: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&selector("balanceOf(address)"));
    data.extend_from_slice(&address_word(owner));
    data
}

/// Format a base-unit amount as a human-readable token amount.
///
/// Trailing zeroes in the fractional part are trimmed, matching how the
/// amount is shown to the user in balance error messages.
#[must_use]
pub fn format_units(amount: U256, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let integer = amount / divisor;
    let fraction = amount % divisor;
    if fraction.is_zero() {
        return integer.to_string();
    }
    let fraction = format!("{fraction:0>width$}", width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    format!("{integer}.{fraction}")
}

/// Read-only view of the chain required by the gate engine.
#[async_trait]
pub trait ChainView: Send + Sync {
    /// Chain id the RPC endpoint is serving.
    async fn chain_id(&self) -> Result<u64>;

    /// Deployed bytecode at an address (empty if none).
    async fn get_code(&self, address: Address) -> Result<Vec<u8>>;

    /// ERC-20 `balanceOf(owner)`.
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;

    /// ERC-20 `decimals()`.
    async fn decimals(&self, token: Address) -> Result<u8>;

    /// ERC-2771 forwarder nonce for a user.
    async fn forwarder_nonce(&self, forwarder: Address, user: Address) -> Result<U256>;

    /// Best-effort probe of meta-transaction support: tries
    /// `isTrustedForwarder(address)`, falls back to `trustedForwarder()`.
    /// `None` means the token exposes neither; absence is not fatal.
    async fn supports_forwarder(&self, token: Address, forwarder: Address) -> Option<bool>;
}

/// JSON-RPC backed [`ChainView`].
#[derive(Clone)]
pub struct RpcChainView {
    client: Client,
    rpc_url: String,
}

impl RpcChainView {
    /// Create a view against the configured RPC endpoint.
    pub fn new(config: &GateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| GateError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
        })
    }

    /// Issue a raw JSON-RPC request and return the `result` value.
    async fn rpc_request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::api(status.as_u16(), "RPC call failed"));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GateError::parse(format!("Failed to parse RPC response: {e}")))?;

        if let Some(error) = json.get("error") {
            return Err(GateError::network_simple(format!("RPC error: {error}")));
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| GateError::parse("Missing result in RPC response"))
    }

    /// `eth_call` against `to` with the given calldata, returning the raw
    /// return bytes.
    async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .rpc_request(
                "eth_call",
                serde_json::json!([
                    { "to": format!("{to:?}"), "data": format!("0x{}", hex::encode(data)) },
                    "latest"
                ]),
            )
            .await?;

        let result_hex = result
            .as_str()
            .ok_or_else(|| GateError::parse("eth_call result is not a string"))?;

        hex::decode(result_hex.trim_start_matches("0x"))
            .map_err(|e| GateError::parse(format!("Invalid hex result: {e}")))
    }

    /// Decode a 32-byte ABI word into a `U256`.
    fn decode_u256(bytes: &[u8]) -> Result<U256> {
        if bytes.len() < 32 {
            return Err(GateError::parse(format!(
                "ABI word too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(U256::from_be_slice(&bytes[..32]))
    }
}

#[async_trait]
impl ChainView for RpcChainView {
    async fn chain_id(&self) -> Result<u64> {
        let result = self.rpc_request("eth_chainId", serde_json::json!([])).await?;
        let chain_hex = result
            .as_str()
            .ok_or_else(|| GateError::parse("eth_chainId result is not a string"))?;
        u64::from_str_radix(chain_hex.trim_start_matches("0x"), 16)
            .map_err(|e| GateError::parse(format!("Invalid chain id {chain_hex}: {e}")))
    }

    async fn get_code(&self, address: Address) -> Result<Vec<u8>> {
        let rpc_url: url::Url = self.rpc_url.parse()?;
        let provider = ProviderBuilder::new().connect_http(rpc_url);

        let code = provider
            .get_code_at(address)
            .await
            .map_err(|e| GateError::network_simple(format!("eth_getCode failed: {e}")))?;

        debug!(address = %address, code_len = code.len(), "Fetched contract code");
        Ok(code.to_vec())
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let data = encode_balance_of(owner);
        let result = self.eth_call(token, &data).await?;
        Self::decode_u256(&result)
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        let data = selector("decimals()").to_vec();
        let result = self.eth_call(token, &data).await?;
        let value = Self::decode_u256(&result)?;
        value
            .try_into()
            .map_err(|_| GateError::parse("decimals() out of u8 range"))
    }

    async fn forwarder_nonce(&self, forwarder: Address, user: Address) -> Result<U256> {
        let mut data = Vec::with_capacity(4 + 32);
        data.extend_from_slice(&selector("userNonce(address)"));
        data.extend_from_slice(&address_word(user));
        let result = self.eth_call(forwarder, &data).await?;
        Self::decode_u256(&result)
    }

    async fn supports_forwarder(&self, token: Address, forwarder: Address) -> Option<bool> {
        let mut data = Vec::with_capacity(4 + 32);
        data.extend_from_slice(&selector("isTrustedForwarder(address)"));
        data.extend_from_slice(&address_word(forwarder));

        if let Ok(result) = self.eth_call(token, &data).await {
            if let Some(&last) = result.last() {
                return Some(last != 0);
            }
        }

        // Alternative probe used by older forwarder-aware tokens.
        let data = selector("trustedForwarder()").to_vec();
        match self.eth_call(token, &data).await {
            Ok(result) if result.len() >= 32 => {
                let declared = Address::from_slice(&result[12..32]);
                Some(declared == forwarder)
            }
            _ => None,
        }
    }
}
