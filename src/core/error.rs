//! Error types for the gate engine.
//!
//! Provides structured error handling with retry classification and
//! user-action mapping.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the gate engine.
#[derive(Error, Debug)]
pub enum GateError {
    /// Wallet-side errors requiring user action (never retryable)
    #[error("Wallet error: {message}")]
    Wallet {
        message: String,
        kind: WalletErrorKind,
    },

    /// Pre-flight validation errors (never retryable)
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        kind: ValidationErrorKind,
    },

    /// Rate limiting and circuit breaker rejections
    #[error("Throttled: {message}")]
    Throttle {
        message: String,
        kind: ThrottleErrorKind,
        /// Computed wait until the limit clears
        retry_after: Option<Duration>,
    },

    /// Fatal terminal states reported by the relay
    #[error("Relay error: {message}")]
    Relay {
        message: String,
        kind: RelayErrorKind,
    },

    /// A transfer is already in flight
    #[error("Busy: {message}")]
    Busy { message: String },

    /// Network-related errors (typically retryable)
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// HTTP errors from the relay or RPC endpoint
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Timeout errors
    #[error("Timeout: {operation} timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Parsing/serialization errors
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Config error: {message}")]
    Config { message: String },
}

/// Wallet error subcategories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletErrorKind {
    /// No wallet/signer is connected
    NotConnected,
    /// Connected to a chain other than the required one
    WrongNetwork,
    /// User declined the signature prompt
    UserRejected,
}

/// Validation error subcategories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Malformed token or recipient address
    InvalidAddress,
    /// Zero transfer amount
    InvalidAmount,
    /// No bytecode at the token address
    InvalidContract,
    /// Token balance below the transfer amount
    InsufficientBalance,
}

/// Throttle error subcategories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleErrorKind {
    /// Per-minute request cap reached
    RateLimitExceeded,
    /// Per-hour request cap reached
    HourlyLimitExceeded,
    /// Circuit breaker is open
    CircuitOpen,
}

/// Fatal relay outcome subcategories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// Transaction executed and reverted on-chain
    Reverted,
    /// Relay cancelled the task before execution
    Cancelled(CancelReason),
    /// Relay does not know the task id
    TaskNotFound,
}

/// Best-effort cancellation reason parsed from the relay's diagnostic
/// message. Enrichment only: control flow keys on [`RelayErrorKind`],
/// never on the parsed reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Sender balance too low for the transfer
    InsufficientBalance,
    /// Token allowance too low
    InsufficientAllowance,
    /// Simulated execution ran out of gas
    InsufficientGas,
    /// Nonce mismatch at execution time
    NonceMismatch,
    /// Sponsor's relay balance is depleted
    SponsorFundsDepleted,
    /// Signed deadline elapsed before execution
    DeadlineExpired,
    /// Diagnostic message did not match any known pattern
    Unknown,
}

impl CancelReason {
    /// Classify a relay diagnostic message by substring matching.
    ///
    /// The message text is provider-controlled and unstable, so matches
    /// are ordered most-specific first and anything unrecognized maps to
    /// [`CancelReason::Unknown`].
    #[must_use]
    pub fn from_diagnostic(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        if msg.contains("allowance") {
            Self::InsufficientAllowance
        } else if msg.contains("1balance") || msg.contains("sponsor") {
            Self::SponsorFundsDepleted
        } else if msg.contains("gas") {
            Self::InsufficientGas
        } else if msg.contains("nonce") {
            Self::NonceMismatch
        } else if msg.contains("deadline") || msg.contains("expired") || msg.contains("timeout") {
            Self::DeadlineExpired
        } else if msg.contains("insufficient") || msg.contains("balance") {
            Self::InsufficientBalance
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::InsufficientBalance => "insufficient balance/sponsor funds",
            Self::InsufficientAllowance => "insufficient allowance",
            Self::InsufficientGas => "insufficient gas",
            Self::NonceMismatch => "nonce mismatch",
            Self::SponsorFundsDepleted => "sponsor funds depleted",
            Self::DeadlineExpired => "deadline expired",
            Self::Unknown => "unknown reason",
        };
        f.write_str(text)
    }
}

/// Suggested next action for the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Connect a wallet
    ConnectWallet,
    /// Switch to the required network
    SwitchNetwork,
    /// Wait for a throttle window to clear
    Wait,
    /// Come back later (service-side problem)
    TryLater,
    /// Acquire more tokens
    GetTokens,
    /// Verify balance/network before retrying
    CheckBalance,
    /// Retry the operation
    Retry,
}

impl GateError {
    /// Check if this error is retryable by the retry controller.
    ///
    /// User-actionable, throttle, and fatal on-chain errors are excluded:
    /// those need out-of-band action, not a blind resubmission.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500 && *status < 600,
            _ => false,
        }
    }

    /// Get the suggested user action for this error.
    #[must_use]
    pub fn required_action(&self) -> UserAction {
        match self {
            Self::Wallet { kind, .. } => match kind {
                WalletErrorKind::NotConnected => UserAction::ConnectWallet,
                WalletErrorKind::WrongNetwork => UserAction::SwitchNetwork,
                WalletErrorKind::UserRejected => UserAction::Retry,
            },
            Self::Validation { kind, .. } => match kind {
                ValidationErrorKind::InsufficientBalance => UserAction::GetTokens,
                _ => UserAction::Retry,
            },
            Self::Throttle { kind, .. } => match kind {
                ThrottleErrorKind::CircuitOpen => UserAction::TryLater,
                _ => UserAction::Wait,
            },
            Self::Relay { kind, .. } => match kind {
                RelayErrorKind::Reverted => UserAction::CheckBalance,
                RelayErrorKind::Cancelled(
                    CancelReason::InsufficientBalance | CancelReason::SponsorFundsDepleted,
                ) => UserAction::GetTokens,
                _ => UserAction::Retry,
            },
            Self::Busy { .. } | Self::Timeout { .. } => UserAction::Wait,
            Self::Config { .. } => UserAction::TryLater,
            Self::Network { .. } | Self::Api { .. } | Self::Parse { .. } => UserAction::Retry,
        }
    }

    /// Get error category for logging/metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Wallet { .. } => "wallet",
            Self::Validation { .. } => "validation",
            Self::Throttle { .. } => "throttle",
            Self::Relay { .. } => "relay",
            Self::Busy { .. } => "busy",
            Self::Network { .. } => "network",
            Self::Api { .. } => "api",
            Self::Timeout { .. } => "timeout",
            Self::Parse { .. } => "parse",
            Self::Config { .. } => "config",
        }
    }
}

// Convenience constructors
impl GateError {
    /// No wallet/signer connected.
    pub fn wallet_not_connected() -> Self {
        Self::Wallet {
            message: "please connect your wallet".to_string(),
            kind: WalletErrorKind::NotConnected,
        }
    }

    /// Connected to the wrong chain.
    pub fn wrong_network(current: Option<u64>, required: u64) -> Self {
        let message = match current {
            Some(id) => format!("connected to chain {id}, please switch to chain {required}"),
            None => format!("network unknown, please switch to chain {required}"),
        };
        Self::Wallet {
            message,
            kind: WalletErrorKind::WrongNetwork,
        }
    }

    /// User declined the signature prompt.
    pub fn user_rejected() -> Self {
        Self::Wallet {
            message: "signature request was rejected in the wallet".to_string(),
            kind: WalletErrorKind::UserRejected,
        }
    }

    /// Malformed address.
    pub fn invalid_address(field: &str, value: &str) -> Self {
        Self::Validation {
            message: format!("invalid {field} address: {value}"),
            kind: ValidationErrorKind::InvalidAddress,
        }
    }

    /// Zero or otherwise unusable amount.
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            kind: ValidationErrorKind::InvalidAmount,
        }
    }

    /// No contract deployed at the token address.
    pub fn invalid_contract(address: impl std::fmt::Display) -> Self {
        Self::Validation {
            message: format!("no contract code at token address {address}"),
            kind: ValidationErrorKind::InvalidContract,
        }
    }

    /// Balance below transfer amount; amounts are pre-formatted in token
    /// units for direct display.
    pub fn insufficient_balance(have: &str, need: &str) -> Self {
        Self::Validation {
            message: format!("have {have} tokens, need {need}"),
            kind: ValidationErrorKind::InsufficientBalance,
        }
    }

    /// Per-minute cap reached.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::Throttle {
            message: format!(
                "too many requests, wait {} seconds",
                retry_after.as_secs().max(1)
            ),
            kind: ThrottleErrorKind::RateLimitExceeded,
            retry_after: Some(retry_after),
        }
    }

    /// Per-hour cap reached.
    pub fn hourly_limited(retry_after: Duration) -> Self {
        Self::Throttle {
            message: format!(
                "hourly limit reached, wait {} minutes",
                (retry_after.as_secs() / 60).max(1)
            ),
            kind: ThrottleErrorKind::HourlyLimitExceeded,
            retry_after: Some(retry_after),
        }
    }

    /// Circuit breaker is open.
    pub fn circuit_open(retry_after: Duration) -> Self {
        Self::Throttle {
            message: format!(
                "too many failures, service suspended for {} minutes",
                (retry_after.as_secs() / 60).max(1)
            ),
            kind: ThrottleErrorKind::CircuitOpen,
            retry_after: Some(retry_after),
        }
    }

    /// Transaction executed but reverted.
    pub fn reverted(detail: impl Into<String>) -> Self {
        Self::Relay {
            message: detail.into(),
            kind: RelayErrorKind::Reverted,
        }
    }

    /// Relay cancelled the task; the reason is parsed from the diagnostic.
    pub fn cancelled(diagnostic: impl Into<String>) -> Self {
        let message = diagnostic.into();
        let reason = CancelReason::from_diagnostic(&message);
        Self::Relay {
            message: format!("cancelled ({reason}): {message}"),
            kind: RelayErrorKind::Cancelled(reason),
        }
    }

    /// Relay does not know the task.
    pub fn task_not_found(task_id: &str) -> Self {
        Self::Relay {
            message: format!("task {task_id} not found in relay system"),
            kind: RelayErrorKind::TaskNotFound,
        }
    }

    /// A transfer is already in flight.
    pub fn busy() -> Self {
        Self::Busy {
            message: "a transfer is already in progress".to_string(),
        }
    }

    /// Create a network error with source.
    pub fn network<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error without source.
    pub fn network_simple(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration, operation: impl Into<String>) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a parse error with source.
    pub fn parse_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                duration: Duration::from_secs(30),
                operation: "HTTP request".to_string(),
            }
        } else {
            Self::network("HTTP request failed", err)
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_with_source(format!("JSON parsing failed: {err}"), err)
    }
}

impl From<url::ParseError> for GateError {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("Invalid URL: {err}"))
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, GateError>;
