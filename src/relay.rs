//! Sponsored relay client and task polling.
//!
//! The relay executes user-signed ERC-2771 calls and pays the gas. A
//! submission yields a task id which is then polled to a terminal state.
//! The one guarantee this module makes to the rest of the engine: a
//! transfer is only ever reported confirmed together with a concrete
//! transaction hash taken from a success-state poll response.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{hex, keccak256, Address, B256, U256};
use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovRateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::chain::address_word;
use crate::core::{GateConfig, GateError, Result};

type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// EIP712Domain type string for the sponsored-call forwarder.
const DOMAIN_TYPE_STR: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// SponsoredCallERC2771 struct type string.
const CALL_TYPE_STR: &str = "SponsoredCallERC2771(uint256 chainId,address target,bytes data,address user,uint256 userNonce,uint256 userDeadline)";

/// EIP-712 domain name of the sponsored-call forwarder.
const DOMAIN_NAME: &str = "GelatoRelay1BalanceERC2771";

/// EIP-712 domain version.
const DOMAIN_VERSION: &str = "1";

/// Overall polling budget for one submission.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(90);

/// Consecutive status-check failures tolerated before giving up on
/// monitoring (the submission itself may still have landed).
const MAX_STATUS_FAILURES: u32 = 5;

/// Task state reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Task accepted, not yet simulated
    Pending,
    /// Simulation/checks in progress
    CheckPending,
    /// Broadcast, waiting for inclusion
    WaitingForConfirmation,
    /// Executed successfully
    ExecSuccess,
    /// Executed and reverted
    ExecReverted,
    /// Cancelled before execution
    Cancelled,
    /// Unknown to the relay
    NotFound,
}

impl TaskState {
    /// Check if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecSuccess | Self::ExecReverted | Self::Cancelled | Self::NotFound
        )
    }

    /// Check if this is the success state.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::ExecSuccess)
    }
}

/// Status snapshot for a relay task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current task state
    #[serde(alias = "taskState")]
    pub state: TaskState,
    /// Transaction hash, present once the call is on-chain
    #[serde(
        alias = "transactionHash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_hash: Option<String>,
    /// Relay diagnostic for the last simulation/check
    #[serde(
        alias = "lastCheckMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_check_message: Option<String>,
}

/// Response to a sponsored-call submission.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayResponse {
    /// Identifier used to poll task status
    #[serde(alias = "taskId")]
    pub task_id: String,
}

/// A user-signed sponsored call, pending submission.
#[derive(Debug, Clone)]
pub struct SponsoredCallRequest {
    /// Chain the call targets
    pub chain_id: u64,
    /// Contract to call (the token)
    pub target: Address,
    /// Encoded calldata
    pub data: Vec<u8>,
    /// Signing user
    pub user: Address,
    /// Forwarder nonce for the user
    pub user_nonce: U256,
    /// Unix deadline after which the signature is void
    pub user_deadline: u64,
}

/// Compute the EIP-712 digest the user signs for a sponsored call.
///
/// Domain: `{name, version, chainId, verifyingContract = forwarder}`.
#[must_use]
pub fn sponsored_call_digest(request: &SponsoredCallRequest, forwarder: Address) -> B256 {
    let domain_type_hash = keccak256(DOMAIN_TYPE_STR.as_bytes());
    let call_type_hash = keccak256(CALL_TYPE_STR.as_bytes());
    let name_hash = keccak256(DOMAIN_NAME.as_bytes());
    let version_hash = keccak256(DOMAIN_VERSION.as_bytes());

    // Domain separator
    let mut domain_encoded = Vec::with_capacity(160);
    domain_encoded.extend_from_slice(domain_type_hash.as_slice());
    domain_encoded.extend_from_slice(name_hash.as_slice());
    domain_encoded.extend_from_slice(version_hash.as_slice());
    domain_encoded.extend_from_slice(&U256::from(request.chain_id).to_be_bytes::<32>());
    domain_encoded.extend_from_slice(&address_word(forwarder));
    let domain_separator = keccak256(&domain_encoded);

    // Struct hash; dynamic `bytes` are represented by their keccak hash
    let mut struct_encoded = Vec::with_capacity(224);
    struct_encoded.extend_from_slice(call_type_hash.as_slice());
    struct_encoded.extend_from_slice(&U256::from(request.chain_id).to_be_bytes::<32>());
    struct_encoded.extend_from_slice(&address_word(request.target));
    struct_encoded.extend_from_slice(keccak256(&request.data).as_slice());
    struct_encoded.extend_from_slice(&address_word(request.user));
    struct_encoded.extend_from_slice(&request.user_nonce.to_be_bytes::<32>());
    struct_encoded.extend_from_slice(&U256::from(request.user_deadline).to_be_bytes::<32>());
    let struct_hash = keccak256(&struct_encoded);

    // Final digest: keccak256(0x1901 || domainSeparator || structHash)
    let mut bytes = Vec::with_capacity(66);
    bytes.push(0x19);
    bytes.push(0x01);
    bytes.extend_from_slice(domain_separator.as_slice());
    bytes.extend_from_slice(struct_hash.as_slice());
    keccak256(&bytes)
}

/// Client contract for the relay service.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Submit a signed sponsored call, returning the task id.
    async fn sponsored_call(
        &self,
        request: &SponsoredCallRequest,
        signature: &str,
    ) -> Result<RelayResponse>;

    /// Fetch task status. `None` means the relay has no status yet and
    /// polling should continue.
    async fn task_status(&self, task_id: &str) -> Result<Option<TaskStatus>>;
}

/// HTTP implementation of [`RelayClient`].
#[derive(Clone)]
pub struct HttpRelayClient {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpRelayClient {
    /// Create a relay client from engine configuration.
    pub fn new(config: &GateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| GateError::config(format!("Failed to create HTTP client: {e}")))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.rate_limit_per_second).unwrap_or(NonZeroU32::new(2).unwrap()),
        );
        let rate_limiter = Arc::new(GovRateLimiter::direct(quota));

        Ok(Self {
            client,
            base_url: config.relay_base_url.clone(),
            api_key: config.relay_api_key.clone(),
            rate_limiter,
        })
    }

    async fn wait_for_rate_limit(&self) {
        self.rate_limiter.until_ready().await;
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    #[instrument(skip(self, request, signature), fields(user = %request.user, target = %request.target))]
    async fn sponsored_call(
        &self,
        request: &SponsoredCallRequest,
        signature: &str,
    ) -> Result<RelayResponse> {
        self.wait_for_rate_limit().await;

        let url = format!("{}/relays/v2/sponsored-call-erc2771", self.base_url);

        let body = serde_json::json!({
            "chainId": request.chain_id,
            "target": format!("{:?}", request.target),
            "data": format!("0x{}", hex::encode(&request.data)),
            "user": format!("{:?}", request.user),
            "userNonce": request.user_nonce.to_string(),
            "userDeadline": request.user_deadline,
            "userSignature": signature,
            "sponsorApiKey": self.api_key,
        });

        debug!(url = %url, chain_id = request.chain_id, "Submitting sponsored call");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Sponsored call rejected");
            return Err(GateError::api(status.as_u16(), body));
        }

        let relay_response: RelayResponse = response.json().await.map_err(|e| {
            GateError::parse_with_source(format!("Failed to parse relay response: {e}"), e)
        })?;

        debug!(task_id = %relay_response.task_id, "Sponsored call accepted");
        Ok(relay_response)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn task_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        self.wait_for_rate_limit().await;

        let url = format!("{}/tasks/status/{}", self.base_url, task_id);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            debug!(task_id = %task_id, "No status yet (404)");
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::api(status.as_u16(), body));
        }

        #[derive(Deserialize)]
        struct StatusEnvelope {
            task: TaskStatus,
        }

        let envelope: StatusEnvelope = response.json().await.map_err(|e| {
            GateError::parse_with_source(format!("Failed to parse task status: {e}"), e)
        })?;

        Ok(Some(envelope.task))
    }
}

/// Outcome of polling a task to its terminal state.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Task executed successfully with an on-chain hash
    Confirmed {
        /// Transaction hash from the success-state poll response
        transaction_hash: String,
    },
    /// Polling budget exhausted without a terminal state; the transaction
    /// may still land, so this is "unknown/pending", not a failure
    Unresolved {
        /// Last state observed, if any
        last_state: Option<TaskState>,
    },
}

/// Adaptive polling cadence: fast while inclusion is likely imminent,
/// slower once the task has clearly queued.
#[must_use]
pub fn poll_interval(poll_no: u32) -> Duration {
    match poll_no {
        0..=3 => Duration::from_secs(2),
        4..=6 => Duration::from_secs(5),
        _ => Duration::from_secs(8),
    }
}

/// Poll a task until terminal, bounded by [`POLL_TIMEOUT`].
///
/// Fatal terminal states map to [`GateError::Relay`]; a success state is
/// only confirmed once a transaction hash is present in the response.
#[instrument(skip(relay), fields(task_id = %task_id))]
pub async fn wait_for_task(relay: &dyn RelayClient, task_id: &str) -> Result<TaskOutcome> {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    let mut poll_no: u32 = 0;
    let mut last_state: Option<TaskState> = None;
    let mut status_failures: u32 = 0;

    loop {
        poll_no += 1;
        tokio::time::sleep(poll_interval(poll_no)).await;

        if tokio::time::Instant::now() >= deadline {
            warn!(task_id = %task_id, last_state = ?last_state, "Polling timeout reached");
            return Ok(TaskOutcome::Unresolved { last_state });
        }

        let status = match relay.task_status(task_id).await {
            Ok(status) => status,
            Err(e) => {
                status_failures += 1;
                warn!(task_id = %task_id, error = %e, failures = status_failures, "Status check failed");
                if status_failures > MAX_STATUS_FAILURES {
                    return Err(GateError::network_simple(
                        "unable to monitor transaction status",
                    ));
                }
                continue;
            }
        };
        status_failures = 0;

        let Some(status) = status else {
            debug!(task_id = %task_id, "No status yet, continuing to poll");
            continue;
        };

        if Some(status.state) != last_state {
            debug!(task_id = %task_id, from = ?last_state, to = ?status.state, "Task state changed");
            last_state = Some(status.state);
        }

        match status.state {
            TaskState::ExecSuccess => {
                match status.transaction_hash.filter(|h| !h.is_empty()) {
                    Some(transaction_hash) => {
                        debug!(task_id = %task_id, tx_hash = %transaction_hash, "Task executed");
                        return Ok(TaskOutcome::Confirmed { transaction_hash });
                    }
                    // Success without a hash cannot confirm the transfer;
                    // keep polling until the hash shows up or time runs out.
                    None => {
                        warn!(task_id = %task_id, "Success state without transaction hash");
                    }
                }
            }
            TaskState::ExecReverted => {
                let detail = status
                    .last_check_message
                    .unwrap_or_else(|| "transaction reverted".to_string());
                return Err(GateError::reverted(detail));
            }
            TaskState::Cancelled => {
                let detail = status
                    .last_check_message
                    .unwrap_or_else(|| "transaction cancelled".to_string());
                return Err(GateError::cancelled(detail));
            }
            TaskState::NotFound => {
                return Err(GateError::task_not_found(task_id));
            }
            TaskState::Pending | TaskState::CheckPending | TaskState::WaitingForConfirmation => {}
        }
    }
}
