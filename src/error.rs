//! Error taxonomy for the sweeper.
//!
//! Adapter internals work with `anyhow::Result`; failures are mapped into
//! `SweepError` where they cross a component boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    /// No endpoint produced a valid quote for the token.
    #[error("no liquidity or all endpoints failed: {0}")]
    NoLiquidity(String),

    /// A quote existed but no endpoint built a usable swap transaction.
    #[error("swap build failed: {0}")]
    BuildFailure(String),

    #[error("wallet rejected signing: {0}")]
    SigningRejected(String),

    /// Submission or confirmation of a signed transaction failed.
    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("amount too small")]
    DustTooSmall,

    #[error("insufficient SOL balance for commission: have {available} lamports, need {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("failed to scan token balances: {0}")]
    ScanFailure(String),

    #[error("wallet not connected")]
    WalletNotConnected,

    #[error("wallet key {actual} does not match owner {expected}")]
    WalletMismatch { expected: String, actual: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SweepError {
    /// Whether the failure came from the aggregator side of a swap.
    pub fn is_route_failure(&self) -> bool {
        matches!(self, SweepError::NoLiquidity(_) | SweepError::BuildFailure(_))
    }
}
