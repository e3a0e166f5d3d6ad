//! Core infrastructure: error taxonomy and configuration.

pub mod config;
pub mod error;

pub use config::{
    GateConfig, DEFAULT_RELAY_URL, DEFAULT_RPC_URL, DEFAULT_TRUSTED_FORWARDER, SEPOLIA_CHAIN_ID,
    USER_DEADLINE,
};
pub use error::{
    CancelReason, GateError, RelayErrorKind, Result, ThrottleErrorKind, UserAction,
    ValidationErrorKind, WalletErrorKind,
};
