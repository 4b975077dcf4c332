//! Sequential sweep of a dust set into SOL.

use super::commission::CommissionSettlement;
use super::forward::forward_holding;
use super::progress::{emit, ProgressSender};
use crate::aggregator::AggregatorClient;
use crate::config::{FailedSwapPolicy, SweeperConfig};
use crate::error::SweepError;
use crate::ledger::LedgerClient;
use crate::types::{
    CommissionOutcome, FailedToken, Holding, StepStatus, SweepResult, SwapStep, COMMISSION_STEP_ID, SOL_MINT,
};
use crate::wallet::WalletCapability;
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Drives quote, build, sign, submit and confirm for each dust item, then
/// settles the commission once on the grand total.
pub struct SweepOrchestrator {
    aggregator: Arc<AggregatorClient>,
    ledger: Arc<dyn LedgerClient>,
    settlement: CommissionSettlement,
    slippage_bps: u16,
    item_delay: Duration,
    failed_swap_policy: FailedSwapPolicy,
}

impl SweepOrchestrator {
    pub fn new(
        aggregator: Arc<AggregatorClient>,
        ledger: Arc<dyn LedgerClient>,
        config: &SweeperConfig,
    ) -> Result<Self, SweepError> {
        let settlement = CommissionSettlement::new(ledger.clone(), &config.commission)?;
        if config.sweep.failed_swap_policy == FailedSwapPolicy::ForwardToRecipient && settlement.recipient().is_none() {
            warn!("Forward policy enabled without a commission recipient; failed items will only be recorded");
        }
        Ok(Self {
            aggregator,
            ledger,
            settlement,
            slippage_bps: config.aggregator.slippage_bps,
            item_delay: Duration::from_millis(config.sweep.item_delay_ms),
            failed_swap_policy: config.sweep.failed_swap_policy,
        })
    }

    /// Sweep `dust` owned by `owner`.
    ///
    /// Only precondition violations are returned as errors. Every per-item
    /// failure and the commission outcome are reported in the result.
    #[instrument(skip(self, dust, wallet, progress), fields(owner = %owner, items = dust.len()))]
    pub async fn sweep(
        &self,
        dust: &[Holding],
        owner: &Pubkey,
        wallet: &dyn WalletCapability,
        progress: Option<&ProgressSender>,
    ) -> Result<SweepResult, SweepError> {
        if !wallet.is_connected() {
            return Err(SweepError::WalletNotConnected);
        }
        let key = wallet.public_key().ok_or(SweepError::WalletNotConnected)?;
        if key != *owner {
            return Err(SweepError::WalletMismatch {
                expected: owner.to_string(),
                actual: key.to_string(),
            });
        }

        if dust.is_empty() {
            info!("Empty dust set, nothing to sweep");
            return Ok(SweepResult::empty("empty dust set"));
        }

        let started_at = Utc::now();
        let mut steps: Vec<SwapStep> = dust
            .iter()
            .map(|h| SwapStep::pending(h.token_account.to_string(), h.symbol.clone()))
            .collect();
        let mut commission_step = SwapStep::pending(COMMISSION_STEP_ID, "SOL");
        for step in steps.iter().chain(std::iter::once(&commission_step)) {
            emit(progress, step);
        }

        let mut total_lamports: u64 = 0;
        let mut signatures = Vec::new();
        let mut failed = Vec::new();

        for (idx, holding) in dust.iter().enumerate() {
            steps[idx].status = StepStatus::Swapping;
            emit(progress, &steps[idx]);

            match self.swap_one(holding, owner, wallet).await {
                Ok((lamports, signature)) => {
                    info!("Swapped {} {} for {} lamports: {}", holding.balance, holding.symbol, lamports, signature);
                    total_lamports = total_lamports.saturating_add(lamports);
                    signatures.push(signature.to_string());
                    steps[idx].status = StepStatus::Completed;
                }
                Err(err) => {
                    let reason = err.to_string();
                    warn!("Swap of {} failed: {}", holding.symbol, reason);
                    let forwarded_signature = self.forward_failed(&err, holding, owner, wallet).await;
                    failed.push(FailedToken {
                        mint: holding.mint.clone(),
                        symbol: holding.symbol.clone(),
                        reason: reason.clone(),
                        forwarded_signature,
                    });
                    steps[idx].status = StepStatus::Failed;
                    steps[idx].reason = Some(reason);
                }
            }
            emit(progress, &steps[idx]);

            if idx + 1 < dust.len() && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        commission_step.status = StepStatus::SendingCommission;
        emit(progress, &commission_step);

        let commission = match self.settlement.settle(total_lamports, owner, wallet).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Commission settlement failed: {}", err);
                CommissionOutcome::Failed {
                    lamports: self.settlement.commission_for(total_lamports),
                    reason: err.to_string(),
                }
            }
        };

        let commission_lamports = match &commission {
            CommissionOutcome::Paid { lamports, .. } => {
                commission_step.status = StepStatus::Completed;
                *lamports
            }
            CommissionOutcome::Skipped { reason } => {
                commission_step.status = StepStatus::Completed;
                commission_step.reason = Some(format!("skipped: {}", reason));
                0
            }
            CommissionOutcome::Failed { lamports, reason } => {
                commission_step.status = StepStatus::Failed;
                commission_step.reason = Some(reason.clone());
                *lamports
            }
        };
        emit(progress, &commission_step);
        steps.push(commission_step);

        let result = SweepResult {
            total_lamports,
            commission_lamports,
            user_lamports: total_lamports - commission_lamports,
            signatures,
            failed,
            steps,
            commission,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "Sweep finished: {} completed, {} failed, {} lamports total, {} commission",
            result.completed_count(),
            result.failed.len(),
            result.total_lamports,
            result.commission_lamports
        );
        Ok(result)
    }

    /// One item: amount check, quote, build, sign, submit, confirm.
    async fn swap_one(
        &self,
        holding: &Holding,
        owner: &Pubkey,
        wallet: &dyn WalletCapability,
    ) -> Result<(u64, Signature), SweepError> {
        let amount = holding.smallest_units();
        if amount == 0 {
            return Err(SweepError::DustTooSmall);
        }

        let quote = self
            .aggregator
            .get_quote(&holding.mint, SOL_MINT, amount, self.slippage_bps)
            .await?;
        let out_amount = quote.out_amount;

        let unsigned = self.aggregator.build_swap_transaction(quote, owner).await?;
        let signed = wallet.sign_transaction(unsigned).await?;

        let signature = self
            .ledger
            .send_transaction(&signed)
            .await
            .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;
        self.ledger
            .confirm_transaction(&signature)
            .await
            .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;

        Ok((out_amount, signature))
    }

    async fn forward_failed(
        &self,
        err: &SweepError,
        holding: &Holding,
        owner: &Pubkey,
        wallet: &dyn WalletCapability,
    ) -> Option<String> {
        if self.failed_swap_policy != FailedSwapPolicy::ForwardToRecipient || !err.is_route_failure() {
            return None;
        }
        let recipient = self.settlement.recipient()?;

        match forward_holding(self.ledger.as_ref(), wallet, holding, owner, &recipient).await {
            Ok(signature) => Some(signature.to_string()),
            Err(e) => {
                warn!("Could not forward {} to commission recipient: {}", holding.symbol, e);
                None
            }
        }
    }
}
