//! Commission settlement after a sweep.

use super::unsigned_transaction;
use crate::config::CommissionConfig;
use crate::error::SweepError;
use crate::ledger::LedgerClient;
use crate::types::CommissionOutcome;
use crate::wallet::WalletCapability;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// `floor(total * rate_bps / 10_000)` in lamports.
pub fn commission_for(total_lamports: u64, rate_bps: u16) -> u64 {
    (total_lamports as u128 * rate_bps as u128 / 10_000) as u64
}

/// Sends the service commission as one native transfer.
pub struct CommissionSettlement {
    ledger: Arc<dyn LedgerClient>,
    recipient: Option<Pubkey>,
    rate_bps: u16,
    min_fee_reserve: u64,
}

impl CommissionSettlement {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: &CommissionConfig) -> Result<Self, SweepError> {
        let recipient = config
            .recipient
            .as_deref()
            .map(|raw| raw.parse::<Pubkey>().map_err(|_| SweepError::InvalidAddress(raw.to_string())))
            .transpose()?;

        Ok(Self {
            ledger,
            recipient,
            rate_bps: config.rate_bps,
            min_fee_reserve: config.min_fee_reserve_lamports,
        })
    }

    pub fn recipient(&self) -> Option<Pubkey> {
        self.recipient
    }

    pub fn commission_for(&self, total_lamports: u64) -> u64 {
        commission_for(total_lamports, self.rate_bps)
    }

    /// Pay the commission on `total_lamports` from `owner`.
    ///
    /// Returns `Skipped` when there is nothing to pay or no recipient. Fails
    /// with `InsufficientBalance` before building anything when the live
    /// balance cannot cover the commission plus the fee reserve.
    #[instrument(skip(self, wallet), fields(owner = %owner))]
    pub async fn settle(
        &self,
        total_lamports: u64,
        owner: &Pubkey,
        wallet: &dyn WalletCapability,
    ) -> Result<CommissionOutcome, SweepError> {
        let commission = self.commission_for(total_lamports);
        if commission == 0 {
            return Ok(CommissionOutcome::Skipped {
                reason: "no commission due".to_string(),
            });
        }
        let Some(recipient) = self.recipient else {
            info!("No commission recipient configured, skipping commission");
            return Ok(CommissionOutcome::Skipped {
                reason: "no commission recipient configured".to_string(),
            });
        };

        let available = self
            .ledger
            .balance(owner)
            .await
            .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;
        let required = commission.saturating_add(self.min_fee_reserve);
        if available < required {
            warn!("Balance {} below commission {} plus reserve", available, commission);
            return Err(SweepError::InsufficientBalance { available, required });
        }

        let transfer = system_instruction::transfer(owner, &recipient, commission);
        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;
        let signed = wallet
            .sign_transaction(unsigned_transaction(&[transfer], owner, blockhash))
            .await?;

        let signature = self
            .ledger
            .send_transaction(&signed)
            .await
            .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;
        self.ledger
            .confirm_transaction(&signature)
            .await
            .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;

        info!("Commission of {} lamports sent to {}: {}", commission, recipient, signature);
        Ok(CommissionOutcome::Paid {
            lamports: commission,
            signature: signature.to_string(),
        })
    }
}
