//! # playgate
//!
//! Wallet-gated gasless transfer engine for a promotional scratch-card
//! game.
//!
//! The game may only start after the player's wallet has made a token
//! transfer that is cryptographically confirmed on-chain. This crate owns
//! that gate: connection and network state, pre-flight validation,
//! sponsored (gasless) relay submission with adaptive status polling,
//! bounded retry with exponential backoff, request rate limiting, and a
//! circuit breaker over the relay subsystem.
//!
//! ## Features
//!
//! - **Gating State Machine** - Connection, network, and confirmation
//!   state with a single re-entrant guarded play entry point
//! - **Pre-flight Validation** - Wallet, network, address, contract, and
//!   balance checks before anything reaches the relay
//! - **Sponsored Relay Client** - ERC-2771 meta-transaction submission and
//!   adaptive task polling
//! - **Failure Containment** - Retry classification, rate limiting, and a
//!   circuit breaker with automatic recovery
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use playgate::prelude::*;
//!
//! let config = GateConfig::default();
//! let chain = Arc::new(RpcChainView::new(&config)?);
//! let relay = Arc::new(HttpRelayClient::new(&config)?);
//! let health = Arc::new(HealthMonitor::new());
//!
//! let gate = GateController::new(config, chain, relay, provider, health);
//! gate.setup_integration();
//!
//! // Wired to the Play control:
//! match gate.handle_play_action().await? {
//!     PlayOutcome::GameUnlocked { transaction_hash } => start_game(),
//!     outcome => show_status(outcome),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`] - Error taxonomy and configuration
//! - [`chain`] - On-chain reads and calldata encoding
//! - [`signer`] - Wallet signer contract
//! - [`relay`] - Sponsored relay client and task polling
//! - [`health`] - Rate limiting and circuit breaker
//! - [`preflight`] - Pre-flight validation
//! - [`retry`] - Bounded retry with exponential backoff
//! - [`transfer`] - Transfer orchestration
//! - [`gate`] - Wallet/network/transfer state machine

// Core infrastructure
pub mod core;

// On-chain access
pub mod chain;
pub mod signer;

// Relay protocol
pub mod relay;

// Failure containment
pub mod health;
pub mod retry;

// Transfer pipeline
pub mod preflight;
pub mod transfer;

// Gating state machine
pub mod gate;

// Prelude for convenient imports
pub mod prelude;

#[cfg(test)]
mod test_support;

// ============================================================================
// Core Re-exports
// ============================================================================

pub use crate::core::{
    CancelReason, GateConfig, GateError, RelayErrorKind, Result, ThrottleErrorKind, UserAction,
    ValidationErrorKind, WalletErrorKind, SEPOLIA_CHAIN_ID,
};

// ============================================================================
// Service Re-exports
// ============================================================================

pub use chain::{ChainView, RpcChainView};
pub use health::{HealthMonitor, SystemStatus};
pub use relay::{HttpRelayClient, RelayClient, TaskOutcome, TaskState, TaskStatus};
pub use signer::{LocalWalletSigner, WalletSigner};

// ============================================================================
// Engine Re-exports
// ============================================================================

pub use gate::{GateController, PlayOutcome, WalletEvent, WalletProvider, WalletState};
pub use preflight::Preflight;
pub use retry::RetryPolicy;
pub use transfer::{SubmissionOutcome, TransferEngine, TransferRecord};
