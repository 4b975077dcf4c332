//! Core types and data structures for the dust sweeper.
//!
//! Everything here is a snapshot value: holdings are produced by a scan and
//! replaced wholesale by the next one, quotes are requested fresh for every
//! swap attempt, and a `SweepResult` is built once when a sweep finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Wrapped SOL mint, the only output asset of a sweep.
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Classic SPL Token program.
pub const TOKEN_PROGRAM_ID: Pubkey = spl_token::ID;

/// Token-2022 program.
pub const TOKEN_2022_PROGRAM_ID: Pubkey = spl_token_2022::ID;

/// Associated token account program.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = spl_associated_token_account::ID;

/// Float noise tolerated, in smallest units, when converting a decimal
/// balance: `0.3 * 10^6` is `299_999.99999999994` and must yield `300_000`.
const UNIT_TOLERANCE: f64 = 1e-6;

/// One non-zero token balance owned by the scanned account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    /// Mint address (base58)
    pub mint: String,
    pub symbol: String,
    pub name: String,
    /// Decimal-normalized balance
    pub balance: f64,
    /// Balance in smallest units as reported by the ledger
    pub raw_amount: u64,
    pub decimals: u8,
    /// Value in USD at scan time
    pub usd_value: f64,
    /// Value in SOL at scan time
    pub sol_value: f64,
    pub logo_uri: Option<String>,
    /// Token account holding the balance
    pub token_account: Pubkey,
    /// Token program owning the account
    pub token_program: Pubkey,
}

impl Holding {
    /// Amount to swap, in the token's smallest units.
    ///
    /// The ledger's raw amount when known. Otherwise `floor(balance *
    /// 10^decimals)`, snapping to the nearest integer only when the product
    /// is within float noise of it, so the result never exceeds the balance.
    pub fn smallest_units(&self) -> u64 {
        if self.raw_amount > 0 {
            return self.raw_amount;
        }
        if !self.balance.is_finite() || self.balance <= 0.0 {
            return 0;
        }
        let scaled = self.balance * 10f64.powi(self.decimals as i32);
        let nearest = scaled.round();
        let units = if (scaled - nearest).abs() <= UNIT_TOLERANCE {
            nearest
        } else {
            scaled.floor()
        };
        if units >= u64::MAX as f64 {
            u64::MAX
        } else {
            units as u64
        }
    }

    /// Parse the mint address.
    pub fn mint_pubkey(&self) -> Option<Pubkey> {
        self.mint.parse().ok()
    }
}

/// Holdings strictly below `threshold_usd` in value.
pub fn dust_set(holdings: &[Holding], threshold_usd: f64) -> Vec<Holding> {
    holdings
        .iter()
        .filter(|h| h.usd_value < threshold_usd)
        .cloned()
        .collect()
}

/// A priced route from one token into SOL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in smallest units
    pub in_amount: u64,
    /// Expected output in lamports
    pub out_amount: u64,
    pub slippage_bps: u16,
    /// Opaque aggregator payload, forwarded untouched to the swap build call
    pub route: serde_json::Value,
}

/// Lifecycle of a single sweep step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    Swapping,
    SendingCommission,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Swapping => "swapping",
            StepStatus::SendingCommission => "sending-commission",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    /// Whether the step has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }

    /// Rank used to keep transitions monotonic.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Swapping | StepStatus::SendingCommission => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Id of the synthetic commission step.
pub const COMMISSION_STEP_ID: &str = "commission";

/// One unit of visible sweep progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapStep {
    /// Token account address for token steps, `COMMISSION_STEP_ID` for the commission step
    pub id: String,
    pub symbol: String,
    pub status: StepStatus,
    pub reason: Option<String>,
}

impl SwapStep {
    pub fn pending(id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            status: StepStatus::Pending,
            reason: None,
        }
    }

    pub fn is_commission(&self) -> bool {
        self.id == COMMISSION_STEP_ID
    }
}

/// A dust item that could not be converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedToken {
    pub mint: String,
    pub symbol: String,
    pub reason: String,
    /// Signature of the direct transfer to the commission recipient, when the
    /// forward policy moved the balance instead of swapping it
    pub forwarded_signature: Option<String>,
}

/// What happened to the commission transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommissionOutcome {
    Paid { lamports: u64, signature: String },
    Skipped { reason: String },
    Failed { lamports: u64, reason: String },
}

impl CommissionOutcome {
    pub fn is_paid(&self) -> bool {
        matches!(self, CommissionOutcome::Paid { .. })
    }
}

/// Summary of one finished sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    /// Sum of quoted outputs of every completed swap
    pub total_lamports: u64,
    /// Commission computed on the total (0 when settlement was skipped)
    pub commission_lamports: u64,
    /// `total_lamports - commission_lamports`
    pub user_lamports: u64,
    /// Swap signatures in completion order
    pub signatures: Vec<String>,
    pub failed: Vec<FailedToken>,
    pub steps: Vec<SwapStep>,
    pub commission: CommissionOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepResult {
    /// Result for a sweep with nothing to do.
    pub fn empty(reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            total_lamports: 0,
            commission_lamports: 0,
            user_lamports: 0,
            signatures: Vec::new(),
            failed: Vec::new(),
            steps: Vec::new(),
            commission: CommissionOutcome::Skipped {
                reason: reason.into(),
            },
            started_at: now,
            finished_at: now,
        }
    }

    pub fn total_sol(&self) -> f64 {
        lamports_to_sol(self.total_lamports)
    }

    pub fn commission_sol(&self) -> f64 {
        lamports_to_sol(self.commission_lamports)
    }

    pub fn user_receives_sol(&self) -> f64 {
        lamports_to_sol(self.user_lamports)
    }

    /// Number of token steps that completed.
    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !s.is_commission() && s.status == StepStatus::Completed)
            .count()
    }
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}
