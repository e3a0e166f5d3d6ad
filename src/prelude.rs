//! Commonly used types for quick imports.
//!
//! # Example
//!
//! ```rust,ignore
//! use playgate::prelude::*;
//!
//! let config = GateConfig::default();
//! let health = HealthMonitor::new();
//! ```

// Core
pub use crate::core::{GateConfig, GateError, Result, UserAction};

// Services
pub use crate::chain::{ChainView, RpcChainView};
pub use crate::health::{HealthMonitor, SystemStatus};
pub use crate::relay::{HttpRelayClient, RelayClient, TaskState};
pub use crate::signer::{LocalWalletSigner, WalletSigner};

// Engine
pub use crate::gate::{GateController, PlayOutcome, WalletProvider, WalletState};
pub use crate::retry::RetryPolicy;
pub use crate::transfer::{SubmissionOutcome, TransferEngine, TransferRecord};
