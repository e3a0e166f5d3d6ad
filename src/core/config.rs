//! Gate engine configuration.
//!
//! Everything environment-specific is injected here: relay API key,
//! required chain, token contract, game recipient, and transfer amount.
//! Nothing in the engine hard-codes these.

use std::time::Duration;

/// Sepolia testnet chain id.
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Default relay API base URL.
pub const DEFAULT_RELAY_URL: &str = "https://api.gelato.digital";

/// Default Sepolia RPC endpoint (override via `PLAYGATE_RPC_URL`).
pub const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";

/// ERC-2771 trusted forwarder used by the sponsored relay on Sepolia.
pub const DEFAULT_TRUSTED_FORWARDER: &str = "0xd8253782c45a12053594b9deB72d8e8aB2Fca54c";

/// How long a signed sponsored call stays valid.
pub const USER_DEADLINE: Duration = Duration::from_secs(300);

/// Engine configuration.
///
/// Addresses are kept as strings and parsed during pre-flight validation
/// so malformed environment input surfaces as a validation error instead
/// of a startup panic.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Sponsor API key for the relay service
    pub relay_api_key: String,
    /// Relay API base URL
    pub relay_base_url: String,
    /// JSON-RPC endpoint for on-chain reads
    pub rpc_url: String,
    /// Chain the game runs on
    pub required_chain_id: u64,
    /// ERC-20 token contract address
    pub token_address: String,
    /// Game treasury address receiving the entry transfer
    pub recipient: String,
    /// Transfer amount in token base units (decimal string)
    pub transfer_amount: String,
    /// ERC-2771 trusted forwarder address
    pub trusted_forwarder: String,
    /// Request timeout for relay/RPC calls
    pub timeout: Duration,
    /// Relay client pacing (requests per second)
    pub rate_limit_per_second: u32,
    /// User agent string
    pub user_agent: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            relay_api_key: env_or("PLAYGATE_RELAY_API_KEY", ""),
            relay_base_url: env_or("PLAYGATE_RELAY_URL", DEFAULT_RELAY_URL),
            rpc_url: env_or("PLAYGATE_RPC_URL", DEFAULT_RPC_URL),
            required_chain_id: env_or("PLAYGATE_CHAIN_ID", "")
                .parse()
                .unwrap_or(SEPOLIA_CHAIN_ID),
            token_address: env_or("PLAYGATE_TOKEN_ADDRESS", ""),
            recipient: env_or("PLAYGATE_RECIPIENT", ""),
            transfer_amount: env_or("PLAYGATE_TRANSFER_AMOUNT", "0"),
            trusted_forwarder: env_or("PLAYGATE_TRUSTED_FORWARDER", DEFAULT_TRUSTED_FORWARDER),
            timeout: Duration::from_secs(30),
            rate_limit_per_second: 2,
            user_agent: concat!("playgate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl GateConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    /// Set the relay API key.
    #[must_use]
    pub fn with_relay_api_key(mut self, key: impl Into<String>) -> Self {
        self.relay_api_key = key.into();
        self
    }

    /// Set the relay base URL.
    #[must_use]
    pub fn with_relay_base_url(mut self, url: impl Into<String>) -> Self {
        self.relay_base_url = url.into();
        self
    }

    /// Set the RPC endpoint.
    #[must_use]
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = url.into();
        self
    }

    /// Set the required chain id.
    #[must_use]
    pub fn with_required_chain_id(mut self, chain_id: u64) -> Self {
        self.required_chain_id = chain_id;
        self
    }

    /// Set the token contract address.
    #[must_use]
    pub fn with_token_address(mut self, address: impl Into<String>) -> Self {
        self.token_address = address.into();
        self
    }

    /// Set the recipient address.
    #[must_use]
    pub fn with_recipient(mut self, address: impl Into<String>) -> Self {
        self.recipient = address.into();
        self
    }

    /// Set the transfer amount in base units.
    #[must_use]
    pub fn with_transfer_amount(mut self, amount: impl Into<String>) -> Self {
        self.transfer_amount = amount.into();
        self
    }

    /// Set the trusted forwarder address.
    #[must_use]
    pub fn with_trusted_forwarder(mut self, address: impl Into<String>) -> Self {
        self.trusted_forwarder = address.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set relay request pacing (requests per second).
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit_per_second = rate_limit;
        self
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
