//! Wallet/network/transfer gating state machine.
//!
//! The controller owns the "may the game start" decision. It derives the
//! wallet state from the latest provider snapshot on every read instead
//! of accumulating deltas, so out-of-order-looking sequences (rapid
//! connect/disconnect/connect, duplicate subscription payloads) cannot
//! corrupt it, and health recovery is reflected without an explicit
//! transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::Address;
use tracing::{debug, info, warn};

use crate::chain::ChainView;
use crate::core::{GateConfig, GateError, Result};
use crate::health::{HealthMonitor, SystemStatus};
use crate::relay::RelayClient;
use crate::retry::RetryPolicy;
use crate::signer::WalletSigner;
use crate::transfer::{SubmissionOutcome, TransferEngine, TransferRecord};

/// Account subscription callback.
pub type AccountListener = Arc<dyn Fn(Option<Address>) + Send + Sync>;

/// Network subscription callback.
pub type NetworkListener = Arc<dyn Fn(Option<u64>) + Send + Sync>;

/// Narrow contract over the wallet-connection SDK.
///
/// Implementations must tolerate duplicate subscription payloads; the
/// controller handles them idempotently.
pub trait WalletProvider: Send + Sync {
    /// Subscribe to account changes (`None` = disconnected).
    fn subscribe_account(&self, listener: AccountListener);

    /// Subscribe to network changes (`None` = unknown).
    fn subscribe_network(&self, listener: NetworkListener);

    /// Open the wallet-connection modal.
    fn open(&self);

    /// Ask the wallet to switch to the given chain.
    fn switch_network(&self, chain_id: u64);

    /// Signer for the connected account, if any.
    fn signer(&self) -> Option<Arc<dyn WalletSigner>>;
}

/// Connection/network/health state of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    /// No account connected
    NotConnected,
    /// Wallet prompt opened, waiting for the user
    Connecting,
    /// Account connected, network not yet known
    Connected,
    /// Account connected on the wrong chain
    WrongNetwork,
    /// Connected, correct chain, subsystem healthy
    Ready,
    /// Connected but the transfer subsystem is throttled or broken
    ServiceUnavailable,
}

impl WalletState {
    /// Play-control label for this state.
    #[must_use]
    pub fn label(&self, unlocked: bool) -> &'static str {
        match self {
            Self::NotConnected => "Connect Wallet",
            Self::Connecting => "Connecting...",
            Self::Connected | Self::WrongNetwork => "Switch Network",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::Ready if unlocked => "Play",
            Self::Ready => "Transfer & Play",
        }
    }
}

/// Provider events applied to the controller, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletEvent {
    /// Account connected/changed/disconnected
    AccountChanged(Option<Address>),
    /// Chain changed (or became unknown)
    NetworkChanged(Option<u64>),
}

/// What a play press resulted in.
#[derive(Debug, Clone)]
pub enum PlayOutcome {
    /// Wallet modal opened; connection continues via subscriptions
    WalletPromptOpened,
    /// Network switch requested from the wallet
    NetworkSwitchRequested,
    /// Transfer confirmed, game may start
    GameUnlocked {
        /// Confirming transaction hash
        transaction_hash: String,
    },
    /// Transfer submitted but unconfirmed; game stays locked, a manual
    /// retry is allowed
    PendingConfirmation {
        /// Relay task to show to the user
        task_id: String,
    },
    /// A previous transfer already unlocked the game
    AlreadyUnlocked,
}

#[derive(Debug, Default, Clone, Copy)]
struct WalletSnapshot {
    account: Option<Address>,
    chain_id: Option<u64>,
    connecting: bool,
}

/// Clears the in-flight flag when a play action finishes, on every path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Top-level gating controller.
pub struct GateController {
    config: GateConfig,
    engine: TransferEngine,
    health: Arc<HealthMonitor>,
    provider: Arc<dyn WalletProvider>,
    snapshot: Mutex<WalletSnapshot>,
    record: Mutex<Option<TransferRecord>>,
    in_flight: AtomicBool,
    integrated: AtomicBool,
}

impl GateController {
    /// Create a controller over the given services.
    pub fn new(
        config: GateConfig,
        chain: Arc<dyn ChainView>,
        relay: Arc<dyn RelayClient>,
        provider: Arc<dyn WalletProvider>,
        health: Arc<HealthMonitor>,
    ) -> Arc<Self> {
        Self::with_retry_policy(config, chain, relay, provider, health, RetryPolicy::default())
    }

    /// Create a controller with a custom retry policy.
    pub fn with_retry_policy(
        config: GateConfig,
        chain: Arc<dyn ChainView>,
        relay: Arc<dyn RelayClient>,
        provider: Arc<dyn WalletProvider>,
        health: Arc<HealthMonitor>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        let engine = TransferEngine::new(config.clone(), chain, relay, health.clone())
            .with_retry_policy(retry);
        Arc::new(Self {
            config,
            engine,
            health,
            provider,
            snapshot: Mutex::new(WalletSnapshot::default()),
            record: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            integrated: AtomicBool::new(false),
        })
    }

    /// Wire provider subscriptions to this controller.
    ///
    /// Safe to call more than once: repeated calls attach nothing new.
    pub fn setup_integration(self: &Arc<Self>) {
        if self.integrated.swap(true, Ordering::SeqCst) {
            debug!("Integration already set up, skipping");
            return;
        }

        let weak = Arc::downgrade(self);
        self.provider.subscribe_account(Arc::new(move |account| {
            if let Some(controller) = weak.upgrade() {
                controller.apply_event(WalletEvent::AccountChanged(account));
            }
        }));

        let weak = Arc::downgrade(self);
        self.provider.subscribe_network(Arc::new(move |chain_id| {
            if let Some(controller) = weak.upgrade() {
                controller.apply_event(WalletEvent::NetworkChanged(chain_id));
            }
        }));

        info!("Wallet integration set up");
    }

    /// Apply a provider event. Events are processed in arrival order and
    /// replace the relevant snapshot field wholesale, so repeated
    /// identical payloads are no-ops.
    pub fn apply_event(&self, event: WalletEvent) {
        let mut snapshot = self.snapshot.lock().expect("snapshot poisoned");
        match event {
            WalletEvent::AccountChanged(account) => {
                if account.is_some() {
                    snapshot.connecting = false;
                }
                snapshot.account = account;
            }
            WalletEvent::NetworkChanged(chain_id) => {
                snapshot.chain_id = chain_id;
            }
        }
        debug!(
            event = ?event,
            account = ?snapshot.account,
            chain_id = ?snapshot.chain_id,
            "Applied wallet event"
        );
    }

    /// Current wallet state, derived from the latest snapshot and health.
    #[must_use]
    pub fn state(&self) -> WalletState {
        let snapshot = *self.snapshot.lock().expect("snapshot poisoned");
        derive_state(
            snapshot,
            self.config.required_chain_id,
            self.health.is_healthy(),
        )
    }

    /// Whether the game may start: the last transfer is confirmed with a
    /// concrete transaction hash.
    #[must_use]
    pub fn is_game_unlocked(&self) -> bool {
        self.record
            .lock()
            .expect("record poisoned")
            .as_ref()
            .is_some_and(TransferRecord::unlocks_game)
    }

    /// Last transfer record, for UI display of pending/confirmed status.
    #[must_use]
    pub fn last_transfer(&self) -> Option<TransferRecord> {
        self.record.lock().expect("record poisoned").clone()
    }

    /// Read-only health snapshot for UI display.
    #[must_use]
    pub fn system_status(&self) -> SystemStatus {
        self.health.status()
    }

    /// Play-control label for the current state.
    #[must_use]
    pub fn play_label(&self) -> &'static str {
        self.state().label(self.is_game_unlocked())
    }

    /// Handle a play press: the single entry point for the gate sequence.
    ///
    /// Re-entrant calls while a transfer is in flight are rejected with
    /// [`GateError::Busy`]; the in-flight operation always runs to
    /// completion or timeout.
    pub async fn handle_play_action(self: &Arc<Self>) -> Result<PlayOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Play pressed while a transfer is in flight");
            return Err(GateError::busy());
        }
        let _guard = InFlightGuard(&self.in_flight);

        match self.state() {
            WalletState::NotConnected | WalletState::Connecting => {
                info!("Opening wallet connection modal");
                self.snapshot.lock().expect("snapshot poisoned").connecting = true;
                self.provider.open();
                Ok(PlayOutcome::WalletPromptOpened)
            }
            WalletState::Connected | WalletState::WrongNetwork => {
                info!(chain_id = self.config.required_chain_id, "Requesting network switch");
                self.provider.switch_network(self.config.required_chain_id);
                Ok(PlayOutcome::NetworkSwitchRequested)
            }
            WalletState::ServiceUnavailable => {
                Err(self.health.availability_error().unwrap_or_else(|| {
                    GateError::network_simple("transfer subsystem unavailable")
                }))
            }
            WalletState::Ready => {
                if self.is_game_unlocked() {
                    debug!("Game already unlocked");
                    return Ok(PlayOutcome::AlreadyUnlocked);
                }
                self.run_transfer().await
            }
        }
    }

    async fn run_transfer(&self) -> Result<PlayOutcome> {
        let signer = self
            .provider
            .signer()
            .ok_or_else(GateError::wallet_not_connected)?;

        match self.engine.execute(signer.as_ref()).await? {
            SubmissionOutcome::Confirmed(record) => {
                let transaction_hash = record
                    .transaction_hash()
                    .expect("confirmed record always carries a hash")
                    .to_string();
                info!(tx_hash = %transaction_hash, "Game unlocked");
                *self.record.lock().expect("record poisoned") = Some(record);
                Ok(PlayOutcome::GameUnlocked { transaction_hash })
            }
            SubmissionOutcome::Unresolved(record) => {
                let task_id = record.task_id.clone();
                warn!(task_id = %task_id, "Transfer unconfirmed, game stays locked");
                *self.record.lock().expect("record poisoned") = Some(record);
                Ok(PlayOutcome::PendingConfirmation { task_id })
            }
        }
    }
}

fn derive_state(snapshot: WalletSnapshot, required_chain_id: u64, healthy: bool) -> WalletState {
    match snapshot.account {
        None if snapshot.connecting => WalletState::Connecting,
        None => WalletState::NotConnected,
        Some(_) if !healthy => WalletState::ServiceUnavailable,
        Some(_) => match snapshot.chain_id {
            Some(id) if id == required_chain_id => WalletState::Ready,
            Some(_) => WalletState::WrongNetwork,
            None => WalletState::Connected,
        },
    }
}
