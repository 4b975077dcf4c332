//! Ledger access: token account enumeration, balances and transaction
//! submission.
//!
//! `LedgerClient` is the seam the scanner, orchestrator and commission
//! settlement talk to. `RpcLedger` implements it over the nonblocking
//! Solana RPC client.

use crate::config::RpcConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionConfirmationStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// One SPL token account owned by the scanned wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccountBalance {
    /// Token account address
    pub address: Pubkey,
    pub mint: String,
    /// Balance in smallest units
    pub amount: u64,
    pub decimals: u8,
    /// Decimal-normalized balance
    pub ui_amount: f64,
    pub program: Pubkey,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Token accounts owned by `owner` under one token program.
    async fn token_accounts(&self, owner: &Pubkey, program: &Pubkey) -> Result<Vec<TokenAccountBalance>>;

    /// Native balance in lamports.
    async fn balance(&self, owner: &Pubkey) -> Result<u64>;

    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Submit a signed transaction with preflight at `confirmed`.
    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature>;

    /// Wait until the transaction is confirmed, failing on an on-chain error.
    async fn confirm_transaction(&self, signature: &Signature) -> Result<()>;
}

/// `LedgerClient` over the Solana JSON-RPC API.
pub struct RpcLedger {
    rpc: Arc<RpcClient>,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn new(config: &RpcConfig) -> Self {
        let rpc = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            Duration::from_secs(config.timeout_seconds),
            CommitmentConfig::confirmed(),
        );
        Self {
            rpc: Arc::new(rpc),
            confirm_timeout: Duration::from_secs(config.confirm_timeout_seconds),
            poll_interval: Duration::from_millis(config.confirm_poll_interval_ms),
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    #[instrument(skip(self), fields(owner = %owner, program = %program))]
    async fn token_accounts(&self, owner: &Pubkey, program: &Pubkey) -> Result<Vec<TokenAccountBalance>> {
        let accounts = self
            .rpc
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(*program))
            .await
            .context("Failed to fetch token accounts")?;

        let balances = collect_token_accounts(
            accounts.iter().map(|keyed| {
                let parsed = match &keyed.account.data {
                    UiAccountData::Json(parsed) => Some(&parsed.parsed),
                    _ => None,
                };
                (keyed.pubkey.as_str(), parsed)
            }),
            *program,
        );

        debug!("Found {} token accounts under {}", balances.len(), program);
        Ok(balances)
    }

    async fn balance(&self, owner: &Pubkey) -> Result<u64> {
        self.rpc
            .get_balance(owner)
            .await
            .context("Failed to fetch SOL balance")
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        self.rpc
            .get_latest_blockhash()
            .await
            .context("Failed to fetch latest blockhash")
    }

    #[instrument(skip(self, transaction))]
    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            ..RpcSendTransactionConfig::default()
        };
        let signature = self
            .rpc
            .send_transaction_with_config(transaction, config)
            .await
            .context("Failed to submit transaction")?;
        debug!("Submitted transaction {}", signature);
        Ok(signature)
    }

    #[instrument(skip(self), fields(signature = %signature))]
    async fn confirm_transaction(&self, signature: &Signature) -> Result<()> {
        let started = Instant::now();

        loop {
            let statuses = self
                .rpc
                .get_signature_statuses(&[*signature])
                .await
                .context("Failed to fetch signature status")?;

            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    bail!("Transaction {} failed on-chain: {}", signature, err);
                }
                match status.confirmation_status() {
                    TransactionConfirmationStatus::Confirmed | TransactionConfirmationStatus::Finalized => {
                        debug!("Transaction {} confirmed", signature);
                        return Ok(());
                    }
                    TransactionConfirmationStatus::Processed => {
                        debug!("Transaction {} processed, waiting for confirmation", signature);
                    }
                }
            }

            if started.elapsed() >= self.confirm_timeout {
                return Err(anyhow!(
                    "Transaction {} not confirmed within {:?}",
                    signature,
                    self.confirm_timeout
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Parse `(address, jsonParsed data)` pairs, skipping accounts that are
/// malformed or came back without parsed data.
pub fn collect_token_accounts<'a>(
    accounts: impl IntoIterator<Item = (&'a str, Option<&'a Value>)>,
    program: Pubkey,
) -> Vec<TokenAccountBalance> {
    let mut balances = Vec::new();
    for (address, parsed) in accounts {
        let Ok(address) = address.parse::<Pubkey>() else {
            warn!("Invalid token account address {}, skipping", address);
            continue;
        };
        let Some(parsed) = parsed else {
            warn!("Token account {} returned without parsed data, skipping", address);
            continue;
        };
        match parse_token_account(address, parsed, program) {
            Ok(balance) => balances.push(balance),
            Err(e) => warn!("Skipping malformed token account: {:#}", e),
        }
    }
    balances
}

/// Read the `info` object of a jsonParsed token account.
pub fn parse_token_account(address: Pubkey, parsed: &Value, program: Pubkey) -> Result<TokenAccountBalance> {
    let info = parsed
        .get("info")
        .ok_or_else(|| anyhow!("Token account {} has no info", address))?;

    let mint = info
        .get("mint")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Token account {} has no mint", address))?
        .to_string();

    let token_amount = info
        .get("tokenAmount")
        .ok_or_else(|| anyhow!("Token account {} has no tokenAmount", address))?;

    let amount: u64 = token_amount
        .get("amount")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("Token account {} has an invalid amount", address))?;

    let decimals = token_amount
        .get("decimals")
        .and_then(Value::as_u64)
        .and_then(|d| u8::try_from(d).ok())
        .ok_or_else(|| anyhow!("Token account {} has invalid decimals", address))?;

    let ui_amount = token_amount
        .get("uiAmountString")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or_else(|| amount as f64 / 10f64.powi(decimals as i32));

    Ok(TokenAccountBalance {
        address,
        mint,
        amount,
        decimals,
        ui_amount,
        program,
    })
}
