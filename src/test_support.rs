//! Shared test doubles for the engine's service seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::chain::ChainView;
use crate::core::{GateError, Result, SEPOLIA_CHAIN_ID};
use crate::gate::{AccountListener, NetworkListener, WalletProvider};
use crate::relay::{RelayClient, RelayResponse, SponsoredCallRequest, TaskState, TaskStatus};
use crate::signer::WalletSigner;

pub fn status_only(state: TaskState) -> TaskStatus {
    TaskStatus {
        state,
        transaction_hash: None,
        last_check_message: None,
    }
}

pub fn status_with_hash(state: TaskState, hash: &str) -> TaskStatus {
    TaskStatus {
        state,
        transaction_hash: Some(hash.to_string()),
        last_check_message: None,
    }
}

pub fn status_with_message(state: TaskState, message: &str) -> TaskStatus {
    TaskStatus {
        state,
        transaction_hash: None,
        last_check_message: Some(message.to_string()),
    }
}

/// Configurable in-memory [`ChainView`].
pub struct MockChain {
    chain_id: u64,
    code: Vec<u8>,
    balance: U256,
    decimals: u8,
    nonce: U256,
    forwarder_support: Option<bool>,
}

impl MockChain {
    /// Correct chain, deployed token, generous balance.
    pub fn healthy() -> Self {
        Self {
            chain_id: SEPOLIA_CHAIN_ID,
            code: vec![0x60, 0x80, 0x60, 0x40],
            balance: U256::from(1000u64) * U256::from(10u64).pow(U256::from(18u64)),
            decimals: 18,
            nonce: U256::ZERO,
            forwarder_support: Some(true),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Balance in whole tokens (18 decimals).
    pub fn with_balance_tokens(mut self, tokens: u64) -> Self {
        self.balance = U256::from(tokens) * U256::from(10u64).pow(U256::from(18u64));
        self
    }
}

#[async_trait]
impl ChainView for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn get_code(&self, _address: Address) -> Result<Vec<u8>> {
        Ok(self.code.clone())
    }

    async fn balance_of(&self, _token: Address, _owner: Address) -> Result<U256> {
        Ok(self.balance)
    }

    async fn decimals(&self, _token: Address) -> Result<u8> {
        Ok(self.decimals)
    }

    async fn forwarder_nonce(&self, _forwarder: Address, _user: Address) -> Result<U256> {
        Ok(self.nonce)
    }

    async fn supports_forwarder(&self, _token: Address, _forwarder: Address) -> Option<bool> {
        self.forwarder_support
    }
}

/// Signer double: approves with a fixed signature or rejects every prompt.
pub struct StubSigner {
    address: Address,
    reject: bool,
    calls: AtomicU32,
}

impl StubSigner {
    pub fn approving() -> Self {
        Self {
            address: "0x1234567890123456789012345678901234567890"
                .parse()
                .unwrap(),
            reject: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::approving()
        }
    }

    pub fn sign_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSigner for StubSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, _digest: B256) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(GateError::user_rejected());
        }
        Ok(format!("0x{}", "11".repeat(65)))
    }
}

fn clone_status_response(
    response: &Result<Option<TaskStatus>>,
) -> Result<Option<TaskStatus>> {
    match response {
        Ok(status) => Ok(status.clone()),
        Err(_) => Err(GateError::network_simple("scripted failure")),
    }
}

/// Relay double: scripted submission errors and status playback. Once the
/// scripted statuses run out, the last one repeats.
pub struct ScriptRelay {
    submit_errors: Mutex<VecDeque<GateError>>,
    statuses: Mutex<VecDeque<Result<Option<TaskStatus>>>>,
    last_status: Mutex<Option<Result<Option<TaskStatus>>>>,
    submissions: AtomicU32,
    task_counter: AtomicU32,
}

impl ScriptRelay {
    pub fn new() -> Arc<Self> {
        Self::with_statuses(Vec::new())
    }

    pub fn with_statuses(statuses: Vec<Result<Option<TaskStatus>>>) -> Arc<Self> {
        Arc::new(Self {
            submit_errors: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(None),
            submissions: AtomicU32::new(0),
            task_counter: AtomicU32::new(0),
        })
    }

    pub fn queue_submit_error(&self, err: GateError) {
        self.submit_errors.lock().unwrap().push_back(err);
    }

    /// Number of `sponsored_call` invocations, including failed ones.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayClient for ScriptRelay {
    async fn sponsored_call(
        &self,
        _request: &SponsoredCallRequest,
        _signature: &str,
    ) -> Result<RelayResponse> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.task_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RelayResponse {
            task_id: format!("task-{n}"),
        })
    }

    async fn task_status(&self, _task_id: &str) -> Result<Option<TaskStatus>> {
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.pop_front() {
            Some(response) => {
                *self.last_status.lock().unwrap() = Some(clone_status_response(&response));
                response
            }
            None => {
                let last = self.last_status.lock().unwrap();
                match last.as_ref() {
                    Some(response) => clone_status_response(response),
                    None => Ok(None),
                }
            }
        }
    }
}

/// Wallet provider double: records subscriptions and requests, and lets
/// tests fire events as the real SDK would.
pub struct MockProvider {
    account_listeners: Mutex<Vec<AccountListener>>,
    network_listeners: Mutex<Vec<NetworkListener>>,
    open_calls: AtomicU32,
    switch_requests: Mutex<Vec<u64>>,
    signer: Arc<dyn WalletSigner>,
}

impl MockProvider {
    pub fn with_signer(signer: StubSigner) -> Arc<Self> {
        Arc::new(Self {
            account_listeners: Mutex::new(Vec::new()),
            network_listeners: Mutex::new(Vec::new()),
            open_calls: AtomicU32::new(0),
            switch_requests: Mutex::new(Vec::new()),
            signer: Arc::new(signer),
        })
    }

    pub fn account_listener_count(&self) -> usize {
        self.account_listeners.lock().unwrap().len()
    }

    pub fn network_listener_count(&self) -> usize {
        self.network_listeners.lock().unwrap().len()
    }

    pub fn fire_account(&self, account: Option<Address>) {
        let listeners = self.account_listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(account);
        }
    }

    pub fn fire_network(&self, chain_id: Option<u64>) {
        let listeners = self.network_listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(chain_id);
        }
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn switch_requests(&self) -> Vec<u64> {
        self.switch_requests.lock().unwrap().clone()
    }
}

impl WalletProvider for MockProvider {
    fn subscribe_account(&self, listener: AccountListener) {
        self.account_listeners.lock().unwrap().push(listener);
    }

    fn subscribe_network(&self, listener: NetworkListener) {
        self.network_listeners.lock().unwrap().push(listener);
    }

    fn open(&self) {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn switch_network(&self, chain_id: u64) {
        self.switch_requests.lock().unwrap().push(chain_id);
    }

    fn signer(&self) -> Option<Arc<dyn WalletSigner>> {
        Some(self.signer.clone())
    }
}
