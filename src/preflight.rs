//! Pre-flight validation.
//!
//! Everything that can be rejected locally or with cheap reads is
//! rejected here, before the relay ever sees a request. Checks run in a
//! fixed order and short-circuit on the first failure; nothing mutates
//! engine state.

use alloy_primitives::{Address, U256};
use tracing::debug;

use crate::chain::{format_units, ChainView};
use crate::core::{GateConfig, GateError, Result};
use crate::signer::WalletSigner;

/// Validated, parsed transfer parameters.
#[derive(Debug, Clone, Copy)]
pub struct Preflight {
    /// Signing user
    pub user: Address,
    /// Token contract
    pub token: Address,
    /// Transfer recipient
    pub recipient: Address,
    /// Transfer amount in base units
    pub amount: U256,
    /// Token decimals, for display formatting
    pub decimals: u8,
}

/// Run the pre-flight checks, in order:
/// signer present, correct network, well-formed addresses, contract code
/// present, non-zero amount, sufficient balance.
pub async fn validate(
    chain: &dyn ChainView,
    signer: Option<&dyn WalletSigner>,
    config: &GateConfig,
) -> Result<Preflight> {
    let signer = signer.ok_or_else(GateError::wallet_not_connected)?;
    let user = signer.address();

    let chain_id = chain.chain_id().await?;
    if chain_id != config.required_chain_id {
        return Err(GateError::wrong_network(
            Some(chain_id),
            config.required_chain_id,
        ));
    }

    let token: Address = config
        .token_address
        .parse()
        .map_err(|_| GateError::invalid_address("token", &config.token_address))?;
    let recipient: Address = config
        .recipient
        .parse()
        .map_err(|_| GateError::invalid_address("recipient", &config.recipient))?;

    let code = chain.get_code(token).await?;
    if code.is_empty() {
        return Err(GateError::invalid_contract(token));
    }

    let amount: U256 = config
        .transfer_amount
        .parse()
        .map_err(|_| GateError::invalid_amount("transfer amount is not a valid integer"))?;
    if amount.is_zero() {
        return Err(GateError::invalid_amount(
            "transfer amount must be greater than zero",
        ));
    }

    let balance = chain.balance_of(token, user).await?;
    // Decimals are display-only; a token without the optional getter still
    // validates, with amounts shown in base units.
    let decimals = chain.decimals(token).await.unwrap_or(0);
    if balance < amount {
        return Err(GateError::insufficient_balance(
            &format_units(balance, decimals),
            &format_units(amount, decimals),
        ));
    }

    debug!(
        user = %user,
        token = %token,
        recipient = %recipient,
        amount = %amount,
        "Pre-flight checks passed"
    );

    Ok(Preflight {
        user,
        token,
        recipient,
        amount,
        decimals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ValidationErrorKind, WalletErrorKind, SEPOLIA_CHAIN_ID};
    use crate::test_support::{MockChain, StubSigner};

    fn config() -> GateConfig {
        GateConfig::builder()
            .with_token_address("0xe42b6bF1fE13A4b24EDdC1DB3cdA1EeF2156DcAB")
            .with_recipient("0x0000000000000000000000000000000000000001")
            .with_transfer_amount("200000000000000000000")
    }

    fn validation_kind(err: GateError) -> ValidationErrorKind {
        match err {
            GateError::Validation { kind, .. } => kind,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_signer_is_rejected_first() {
        let chain = MockChain::healthy();
        let err = validate(&chain, None, &config()).await.unwrap_err();
        match err {
            GateError::Wallet { kind, .. } => assert_eq!(kind, WalletErrorKind::NotConnected),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_chain_is_rejected() {
        let chain = MockChain::healthy().with_chain_id(1);
        let signer = StubSigner::approving();
        let err = validate(&chain, Some(&signer), &config()).await.unwrap_err();
        match err {
            GateError::Wallet { kind, .. } => assert_eq!(kind, WalletErrorKind::WrongNetwork),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_token_address_is_rejected() {
        let chain = MockChain::healthy();
        let signer = StubSigner::approving();
        let bad = config().with_token_address("not-an-address");
        let err = validate(&chain, Some(&signer), &bad).await.unwrap_err();
        assert_eq!(validation_kind(err), ValidationErrorKind::InvalidAddress);
    }

    #[tokio::test]
    async fn missing_contract_code_is_rejected() {
        let chain = MockChain::healthy().with_code(Vec::new());
        let signer = StubSigner::approving();
        let err = validate(&chain, Some(&signer), &config()).await.unwrap_err();
        assert_eq!(validation_kind(err), ValidationErrorKind::InvalidContract);
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let chain = MockChain::healthy();
        let signer = StubSigner::approving();
        let bad = config().with_transfer_amount("0");
        let err = validate(&chain, Some(&signer), &bad).await.unwrap_err();
        assert_eq!(validation_kind(err), ValidationErrorKind::InvalidAmount);
    }

    #[tokio::test]
    async fn insufficient_balance_reports_have_and_need() {
        // Balance 50, transfer amount 200 (18 decimals).
        let chain = MockChain::healthy().with_balance_tokens(50);
        let signer = StubSigner::approving();
        let err = validate(&chain, Some(&signer), &config()).await.unwrap_err();
        match err {
            GateError::Validation {
                kind: ValidationErrorKind::InsufficientBalance,
                message,
            } => {
                assert!(message.contains("50"), "message: {message}");
                assert!(message.contains("200"), "message: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sufficient_balance_passes() {
        let chain = MockChain::healthy().with_balance_tokens(200);
        let signer = StubSigner::approving();
        let preflight = validate(&chain, Some(&signer), &config()).await.unwrap();

        assert_eq!(preflight.user, signer.address());
        assert_eq!(preflight.decimals, 18);
        assert_eq!(
            preflight.amount,
            U256::from(200u64) * U256::from(10u64).pow(U256::from(18u64))
        );
        assert_eq!(chain.chain_id().await.unwrap(), SEPOLIA_CHAIN_ID);
    }
}
