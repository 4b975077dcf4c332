//! Balance scanner.
//!
//! Enumerates the owner's token accounts under both token programs, drops
//! empty ones and values the rest in USD and SOL.

pub mod market;
pub mod metadata;

pub use market::{best_pair, price_from_pairs, HttpMarketData, MarketDataSource, MarketPair, TokenListEntry};
pub use metadata::{MetadataResolver, TokenMetadata};

use crate::config::{RpcConfig, ScannerConfig};
use crate::error::SweepError;
use crate::ledger::{LedgerClient, TokenAccountBalance};
use crate::types::{Holding, SOL_MINT, TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, info, instrument, warn};

pub struct BalanceScanner {
    ledger: Arc<dyn LedgerClient>,
    market: Arc<dyn MarketDataSource>,
    metadata: MetadataResolver,
    config: ScannerConfig,
    retry_attempts: usize,
    retry_base_ms: u64,
}

impl BalanceScanner {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        market: Arc<dyn MarketDataSource>,
        config: ScannerConfig,
        rpc: &RpcConfig,
    ) -> Self {
        let metadata = MetadataResolver::new(
            market.clone(),
            Duration::from_secs(config.token_list_ttl_seconds),
            config.max_cache_entries,
        );
        Self {
            ledger,
            market,
            metadata,
            config,
            retry_attempts: rpc.retry_attempts,
            retry_base_ms: rpc.retry_base_ms,
        }
    }

    /// Non-zero holdings of `owner`, Token program accounts first.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn scan(&self, owner: &Pubkey) -> Result<Vec<Holding>, SweepError> {
        let sol_price = self.sol_price().await;

        let mut accounts = Vec::new();
        for program in [TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID] {
            accounts.extend(self.fetch_accounts(owner, &program).await?);
        }
        accounts.retain(|account| account.amount > 0);
        debug!("{} non-empty token accounts", accounts.len());

        let delay = Duration::from_millis(self.config.price_lookup_delay_ms);
        let mut pairs_by_mint: HashMap<String, Vec<MarketPair>> = HashMap::new();
        let mut holdings = Vec::with_capacity(accounts.len());

        for account in accounts {
            if !pairs_by_mint.contains_key(&account.mint) {
                if !pairs_by_mint.is_empty() && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let pairs = match self.market.pairs(&account.mint).await {
                    Ok(pairs) => pairs,
                    Err(e) => {
                        warn!("Price lookup failed for {}: {:#}", account.mint, e);
                        Vec::new()
                    }
                };
                pairs_by_mint.insert(account.mint.clone(), pairs);
            }
            let pairs = pairs_by_mint
                .get(&account.mint)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let price = price_from_pairs(pairs, &account.mint).unwrap_or(0.0);
            let metadata = self.metadata.resolve(&account.mint, pairs).await;
            holdings.push(value_holding(account, metadata, price, sol_price));
        }

        info!("Scanned {} holdings for {}", holdings.len(), owner);
        Ok(holdings)
    }

    /// Live SOL price, or the configured estimate when the lookup fails.
    async fn sol_price(&self) -> f64 {
        match self.market.pairs(SOL_MINT).await {
            Ok(pairs) => price_from_pairs(&pairs, SOL_MINT).unwrap_or_else(|| {
                warn!("No SOL price in market data, using {}", self.config.fallback_sol_price_usd);
                self.config.fallback_sol_price_usd
            }),
            Err(e) => {
                warn!("SOL price lookup failed ({:#}), using {}", e, self.config.fallback_sol_price_usd);
                self.config.fallback_sol_price_usd
            }
        }
    }

    async fn fetch_accounts(&self, owner: &Pubkey, program: &Pubkey) -> Result<Vec<TokenAccountBalance>, SweepError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_base_ms.max(1))
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts.saturating_sub(1));

        Retry::spawn(retry_strategy, || self.ledger.token_accounts(owner, program))
            .await
            .map_err(|e| SweepError::ScanFailure(format!("{} accounts: {:#}", program, e)))
    }
}

fn value_holding(account: TokenAccountBalance, metadata: TokenMetadata, price: f64, sol_price: f64) -> Holding {
    let usd_value = account.ui_amount * price;
    let sol_value = if price > 0.0 && sol_price > 0.0 {
        usd_value / sol_price
    } else {
        0.0
    };

    Holding {
        mint: account.mint,
        symbol: metadata.symbol,
        name: metadata.name,
        balance: account.ui_amount,
        raw_amount: account.amount,
        decimals: account.decimals,
        usd_value,
        sol_value,
        logo_uri: metadata.logo_uri,
        token_account: account.address,
        token_program: account.program,
    }
}
