//! Transfer orchestration: pre-flight, throttling, signing, submission,
//! and confirmation bookkeeping for one gasless entry transfer.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, U256};
use tracing::{debug, info, instrument, warn};

use crate::chain::{encode_transfer, ChainView};
use crate::core::{GateConfig, GateError, Result, USER_DEADLINE};
use crate::health::HealthMonitor;
use crate::preflight;
use crate::relay::{
    sponsored_call_digest, wait_for_task, RelayClient, SponsoredCallRequest, TaskOutcome,
};
use crate::retry::RetryPolicy;
use crate::signer::WalletSigner;

/// One transfer attempt, from submission through (possible) confirmation.
///
/// `confirmed` and the transaction hash are private and only settable
/// together through [`TransferRecord::confirmed`], so a record can never
/// claim confirmation without a hash. A confirmed record is never mutated.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    /// Transfer amount in base units
    pub amount: U256,
    /// Token contract
    pub token: Address,
    /// Recipient of the transfer
    pub recipient: Address,
    /// Relay task identifier
    pub task_id: String,
    transaction_hash: Option<String>,
    confirmed: bool,
}

impl TransferRecord {
    /// A submitted transfer whose outcome is not yet known.
    #[must_use]
    pub fn pending(amount: U256, token: Address, recipient: Address, task_id: String) -> Self {
        Self {
            amount,
            token,
            recipient,
            task_id,
            transaction_hash: None,
            confirmed: false,
        }
    }

    /// A transfer confirmed on-chain. The hash comes from a success-state
    /// poll response and must be non-empty.
    #[must_use]
    pub fn confirmed(
        amount: U256,
        token: Address,
        recipient: Address,
        task_id: String,
        transaction_hash: String,
    ) -> Self {
        debug_assert!(!transaction_hash.is_empty());
        Self {
            amount,
            token,
            recipient,
            task_id,
            transaction_hash: Some(transaction_hash),
            confirmed: true,
        }
    }

    /// Transaction hash, if the transfer reached the chain.
    #[must_use]
    pub fn transaction_hash(&self) -> Option<&str> {
        self.transaction_hash.as_deref()
    }

    /// Whether the relay confirmed execution.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// The gate invariant: a transfer only unlocks the game when it is
    /// confirmed AND carries a concrete transaction hash.
    #[must_use]
    pub fn unlocks_game(&self) -> bool {
        self.confirmed && self.transaction_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Result of driving one transfer to quiescence.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// Executed on-chain with a transaction hash
    Confirmed(TransferRecord),
    /// Submitted, but polling ran out before a terminal state; status is
    /// unknown/pending, not failed, and a manual retry is permitted
    Unresolved(TransferRecord),
}

/// Drives the submission protocol for the configured entry transfer.
pub struct TransferEngine {
    config: GateConfig,
    chain: Arc<dyn ChainView>,
    relay: Arc<dyn RelayClient>,
    health: Arc<HealthMonitor>,
    retry: RetryPolicy,
}

impl TransferEngine {
    /// Create an engine over the given services.
    pub fn new(
        config: GateConfig,
        chain: Arc<dyn ChainView>,
        relay: Arc<dyn RelayClient>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            config,
            chain,
            relay,
            health,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute the entry transfer for `signer`.
    ///
    /// Validation and throttle rejections return before anything reaches
    /// the relay and do not touch the circuit breaker; failures inside
    /// the submission protocol record a breaker failure, confirmations a
    /// success. An unresolved poll leaves the breaker untouched.
    #[instrument(skip(self, signer), fields(user = %signer.address()))]
    pub async fn execute(&self, signer: &dyn WalletSigner) -> Result<SubmissionOutcome> {
        let pf = preflight::validate(self.chain.as_ref(), Some(signer), &self.config).await?;

        self.health.record_attempt()?;
        self.health.ensure_available()?;

        let forwarder: Address = self.config.trusted_forwarder.parse().map_err(|_| {
            GateError::config(format!(
                "invalid trusted forwarder address: {}",
                self.config.trusted_forwarder
            ))
        })?;

        // Capability probe is best-effort: tokens without the ERC-2771
        // getters still go through, the relay simulation has the last word.
        match self.chain.supports_forwarder(pf.token, forwarder).await {
            Some(true) => debug!(token = %pf.token, "Token trusts the forwarder"),
            Some(false) => {
                warn!(token = %pf.token, forwarder = %forwarder, "Token does not declare the forwarder as trusted")
            }
            None => debug!(token = %pf.token, "Token exposes no forwarder probe"),
        }

        let data = encode_transfer(pf.recipient, pf.amount);
        let chain = self.chain.as_ref();
        let relay = self.relay.as_ref();
        let config = &self.config;
        let data_ref = &data;

        let result = self
            .retry
            .run(|attempt| async move {
                debug!(attempt, "Submitting sponsored transfer");
                submit_once(chain, relay, signer, config, pf.user, pf.token, forwarder, data_ref)
                    .await
            })
            .await;

        match result {
            Ok((task_id, TaskOutcome::Confirmed { transaction_hash })) => {
                self.health.record_success();
                info!(task_id = %task_id, tx_hash = %transaction_hash, "Transfer confirmed");
                Ok(SubmissionOutcome::Confirmed(TransferRecord::confirmed(
                    pf.amount,
                    pf.token,
                    pf.recipient,
                    task_id,
                    transaction_hash,
                )))
            }
            Ok((task_id, TaskOutcome::Unresolved { last_state })) => {
                warn!(task_id = %task_id, last_state = ?last_state, "Transfer unresolved after polling budget");
                Ok(SubmissionOutcome::Unresolved(TransferRecord::pending(
                    pf.amount,
                    pf.token,
                    pf.recipient,
                    task_id,
                )))
            }
            Err(err) => {
                self.health.record_failure();
                warn!(error = %err, category = err.category(), "Transfer failed");
                Err(err)
            }
        }
    }
}

/// One signed submission followed by polling to quiescence.
#[allow(clippy::too_many_arguments)]
async fn submit_once(
    chain: &dyn ChainView,
    relay: &dyn RelayClient,
    signer: &dyn WalletSigner,
    config: &GateConfig,
    user: Address,
    token: Address,
    forwarder: Address,
    data: &[u8],
) -> Result<(String, TaskOutcome)> {
    let user_nonce = chain.forwarder_nonce(forwarder, user).await?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| GateError::config(format!("System clock before epoch: {e}")))?
        .as_secs();

    let request = SponsoredCallRequest {
        chain_id: config.required_chain_id,
        target: token,
        data: data.to_vec(),
        user,
        user_nonce,
        user_deadline: now + USER_DEADLINE.as_secs(),
    };

    let digest = sponsored_call_digest(&request, forwarder);
    let signature = signer.sign_digest(digest).await?;

    let response = relay.sponsored_call(&request, &signature).await?;
    let outcome = wait_for_task(relay, &response.task_id).await?;
    Ok((response.task_id, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        CancelReason, RelayErrorKind, ThrottleErrorKind, ValidationErrorKind, WalletErrorKind,
    };
    use crate::relay::TaskState;
    use crate::test_support::{status_with_hash, MockChain, ScriptRelay, StubSigner};

    fn config() -> GateConfig {
        GateConfig::builder()
            .with_token_address("0xe42b6bF1fE13A4b24EDdC1DB3cdA1EeF2156DcAB")
            .with_recipient("0x0000000000000000000000000000000000000001")
            .with_transfer_amount("200000000000000000000")
            .with_relay_api_key("test-key")
    }

    fn engine(chain: MockChain, relay: Arc<ScriptRelay>) -> (TransferEngine, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new());
        let engine = TransferEngine::new(config(), Arc::new(chain), relay, health.clone());
        (engine, health)
    }

    #[test]
    fn record_invariant_is_structural() {
        let token: Address = "0xe42b6bF1fE13A4b24EDdC1DB3cdA1EeF2156DcAB".parse().unwrap();
        let recipient: Address = "0x0000000000000000000000000000000000000001".parse().unwrap();

        let pending =
            TransferRecord::pending(U256::from(1u64), token, recipient, "t".to_string());
        assert!(!pending.unlocks_game());
        assert!(pending.transaction_hash().is_none());

        let confirmed = TransferRecord::confirmed(
            U256::from(1u64),
            token,
            recipient,
            "t".to_string(),
            "0xabc".to_string(),
        );
        assert!(confirmed.unlocks_game());
        assert_eq!(confirmed.transaction_hash(), Some("0xabc"));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_transfer_resets_breaker_and_carries_hash() {
        let relay = ScriptRelay::with_statuses(vec![
            Ok(Some(status_with_hash(TaskState::ExecSuccess, "0xabc"))),
        ]);
        let (engine, health) = engine(
            MockChain::healthy().with_balance_tokens(200),
            relay.clone(),
        );
        health.record_failure();

        let signer = StubSigner::approving();
        match engine.execute(&signer).await.unwrap() {
            SubmissionOutcome::Confirmed(record) => {
                assert!(record.unlocks_game());
                assert_eq!(record.transaction_hash(), Some("0xabc"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(relay.submissions(), 1);
        assert_eq!(health.status().circuit_breaker.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_balance_never_reaches_the_relay() {
        let relay = ScriptRelay::new();
        let (engine, health) = engine(
            MockChain::healthy().with_balance_tokens(50),
            relay.clone(),
        );

        let signer = StubSigner::approving();
        let err = engine.execute(&signer).await.unwrap_err();
        match err {
            GateError::Validation { kind, .. } => {
                assert_eq!(kind, ValidationErrorKind::InsufficientBalance)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(relay.submissions(), 0);
        // Validation failures do not count against the breaker.
        assert_eq!(health.status().circuit_breaker.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_is_fatal_and_counts_a_failure() {
        let relay = ScriptRelay::with_statuses(vec![Ok(Some(crate::test_support::status_with_message(
            TaskState::Cancelled,
            "Execution check failed: insufficient balance",
        )))]);
        let (engine, health) = engine(
            MockChain::healthy().with_balance_tokens(500),
            relay.clone(),
        );

        let signer = StubSigner::approving();
        match engine.execute(&signer).await.unwrap_err() {
            GateError::Relay {
                kind: RelayErrorKind::Cancelled(reason),
                ..
            } => assert_eq!(reason, CancelReason::InsufficientBalance),
            other => panic!("unexpected error: {other:?}"),
        }
        // Fatal on-chain outcome: no second submission, one breaker failure.
        assert_eq!(relay.submissions(), 1);
        assert_eq!(health.status().circuit_breaker.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_exhaustion_is_unresolved_not_failed() {
        let relay = ScriptRelay::with_statuses(vec![Ok(Some(
            crate::test_support::status_only(TaskState::WaitingForConfirmation),
        ))]);
        let (engine, health) = engine(
            MockChain::healthy().with_balance_tokens(500),
            relay.clone(),
        );

        let signer = StubSigner::approving();
        match engine.execute(&signer).await.unwrap() {
            SubmissionOutcome::Unresolved(record) => {
                assert!(!record.unlocks_game());
                assert!(record.transaction_hash().is_none());
                assert!(!record.task_id.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(health.status().circuit_breaker.failures, 0);

        // A manual retry afterwards is permitted.
        assert!(engine.execute(&signer).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn user_rejection_is_not_resubmitted() {
        let relay = ScriptRelay::new();
        let (engine, _health) = engine(
            MockChain::healthy().with_balance_tokens(500),
            relay.clone(),
        );

        let signer = StubSigner::rejecting();
        match engine.execute(&signer).await.unwrap_err() {
            GateError::Wallet { kind, .. } => assert_eq!(kind, WalletErrorKind::UserRejected),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(relay.submissions(), 0);
        assert_eq!(signer.sign_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submission_failures_are_retried() {
        let relay = ScriptRelay::with_statuses(vec![
            Ok(Some(status_with_hash(TaskState::ExecSuccess, "0xbeef"))),
        ]);
        relay.queue_submit_error(GateError::network_simple("connection reset"));
        relay.queue_submit_error(GateError::api(502, "bad gateway"));

        let (engine, _health) = engine(
            MockChain::healthy().with_balance_tokens(500),
            relay.clone(),
        );

        let signer = StubSigner::approving();
        match engine.execute(&signer).await.unwrap() {
            SubmissionOutcome::Confirmed(record) => {
                assert_eq!(record.transaction_hash(), Some("0xbeef"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(relay.submissions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_attempt_is_rejected_before_submission() {
        let relay = ScriptRelay::new();
        let (engine, health) = engine(
            MockChain::healthy().with_balance_tokens(500),
            relay.clone(),
        );
        for _ in 0..crate::health::MAX_REQUESTS_PER_MINUTE {
            health.record_attempt().unwrap();
        }

        let signer = StubSigner::approving();
        match engine.execute(&signer).await.unwrap_err() {
            GateError::Throttle { kind, .. } => {
                assert_eq!(kind, ThrottleErrorKind::RateLimitExceeded)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(relay.submissions(), 0);
        assert_eq!(health.status().circuit_breaker.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_blocks_submission() {
        let relay = ScriptRelay::new();
        let (engine, health) = engine(
            MockChain::healthy().with_balance_tokens(500),
            relay.clone(),
        );
        for _ in 0..crate::health::FAILURE_THRESHOLD {
            health.record_failure();
        }

        let signer = StubSigner::approving();
        match engine.execute(&signer).await.unwrap_err() {
            GateError::Throttle { kind, .. } => assert_eq!(kind, ThrottleErrorKind::CircuitOpen),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(relay.submissions(), 0);
    }
}
