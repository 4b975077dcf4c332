//! Dust sweeper - batch conversion of low-value Solana token balances into SOL
//!
//! This crate scans a wallet's token holdings, selects the ones worth less
//! than a configurable threshold and swaps each of them into SOL through a
//! Jupiter-compatible aggregator, one signed transaction per token. A
//! percentage commission is settled in a single transfer once the sweep is
//! done.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod ledger;
pub mod scanner;
pub mod session;
pub mod sweep;
pub mod types;
pub mod wallet;

// Re-export main types for convenience
pub use aggregator::{AggregatorClient, AggregatorEndpoint, HttpTransport, ReqwestTransport};
pub use config::{FailedSwapPolicy, SweeperBuilder, SweeperConfig};
pub use error::SweepError;
pub use ledger::{LedgerClient, RpcLedger};
pub use scanner::{BalanceScanner, HttpMarketData, MarketDataSource};
pub use session::{SessionPhase, SessionSnapshot, WalletSession};
pub use sweep::{CommissionSettlement, ProgressEvent, ProgressReporter, SweepOrchestrator};
pub use types::{dust_set, CommissionOutcome, FailedToken, Holding, StepStatus, SweepResult, SwapQuote, SwapStep};
pub use wallet::{KeypairWallet, WalletCapability};
