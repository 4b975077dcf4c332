//! Sweeper configuration.
//!
//! Values come from defaults, an optional JSON file and environment
//! overrides, in that order.

use crate::aggregator::AggregatorEndpoint;
use crate::error::SweepError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use tracing::{debug, info};

/// What to do with dust items the aggregator could not convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedSwapPolicy {
    /// Leave the tokens in the wallet and report the failure.
    #[default]
    RecordOnly,
    /// Transfer the raw balance to the commission recipient's token account.
    ForwardToRecipient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Endpoints in fallback order
    pub endpoints: Vec<AggregatorEndpoint>,
    /// Sent as `x-api-key` when set
    pub api_key: Option<String>,
    pub slippage_bps: u16,
    /// Maximum passes over the endpoint list when rate limited
    pub max_rounds: usize,
    /// First wait after a 429, doubled on each further 429
    pub rate_limit_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub requests_per_second: u32,
    pub request_timeout_seconds: u64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            endpoints: AggregatorEndpoint::defaults(),
            api_key: None,
            slippage_bps: 500,
            max_rounds: 3,
            rate_limit_backoff_ms: 500,
            max_backoff_ms: 5_000,
            requests_per_second: 10,
            request_timeout_seconds: 15,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Holdings below this USD value are dust
    pub dust_threshold_usd: f64,
    /// SOL price used when the live lookup fails
    pub fallback_sol_price_usd: f64,
    /// Pause between per-mint market lookups
    pub price_lookup_delay_ms: u64,
    pub token_list_url: String,
    /// Pair lookup base URL, the mint is appended
    pub pair_lookup_url: String,
    pub token_list_ttl_seconds: u64,
    pub max_cache_entries: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            dust_threshold_usd: 5.0,
            fallback_sol_price_usd: 180.0,
            price_lookup_delay_ms: 100,
            token_list_url: "https://token.jup.ag/strict".to_string(),
            pair_lookup_url: "https://api.dexscreener.com/latest/dex/tokens/".to_string(),
            token_list_ttl_seconds: 600,
            max_cache_entries: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Pause between consecutive dust items
    pub item_delay_ms: u64,
    pub failed_swap_policy: FailedSwapPolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            item_delay_ms: 1_000,
            failed_swap_policy: FailedSwapPolicy::RecordOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionConfig {
    /// Base58 address receiving the commission; no commission when unset
    pub recipient: Option<String>,
    /// Commission rate in basis points of the swapped total
    pub rate_bps: u16,
    /// Lamports kept back for the transfer fee
    pub min_fee_reserve_lamports: u64,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            recipient: None,
            rate_bps: 1_000,
            min_fee_reserve_lamports: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Disconnect after this long without activity
    pub idle_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 120,
        }
    }
}

/// Complete sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SweeperConfig {
    pub rpc: RpcConfig,
    pub aggregator: AggregatorConfig,
    pub scanner: ScannerConfig,
    pub sweep: SweepConfig,
    pub commission: CommissionConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub timeout_seconds: u64,
    /// Attempts for read-only ledger queries
    pub retry_attempts: usize,
    /// Base delay of the ledger query retry backoff
    pub retry_base_ms: u64,
    pub confirm_timeout_seconds: u64,
    pub confirm_poll_interval_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_base_ms: 100,
            confirm_timeout_seconds: 60,
            confirm_poll_interval_ms: 500,
        }
    }
}

impl SweeperConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: SweeperConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SweepError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SOLANA_RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(wallet) = lookup("PROJECT_WALLET") {
            let wallet = wallet.trim().to_string();
            self.commission.recipient = if wallet.is_empty() { None } else { Some(wallet) };
        }
        if let Some(key) = lookup("JUPITER_API_KEY") {
            self.aggregator.api_key = Some(key);
        }
        if let Some(raw) = lookup("DUST_THRESHOLD_USD") {
            self.scanner.dust_threshold_usd = parse_var("DUST_THRESHOLD_USD", &raw)?;
        }
        if let Some(raw) = lookup("COMMISSION_BPS") {
            self.commission.rate_bps = parse_var("COMMISSION_BPS", &raw)?;
        }
        if let Some(raw) = lookup("SLIPPAGE_BPS") {
            self.aggregator.slippage_bps = parse_var("SLIPPAGE_BPS", &raw)?;
        }
        debug!("Applied environment overrides");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.aggregator.endpoints.is_empty() {
            return Err(SweepError::Config("aggregator endpoint list is empty".to_string()));
        }
        if self.aggregator.max_rounds == 0 {
            return Err(SweepError::Config("max_rounds must be at least 1".to_string()));
        }
        if self.commission.rate_bps > 10_000 {
            return Err(SweepError::Config(format!(
                "commission rate {} bps exceeds 10000",
                self.commission.rate_bps
            )));
        }
        let threshold = self.scanner.dust_threshold_usd;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(SweepError::Config("dust threshold must be non-negative".to_string()));
        }
        self.commission_recipient()?;
        Ok(())
    }

    /// Parsed commission recipient, if one is configured.
    pub fn commission_recipient(&self) -> Result<Option<Pubkey>, SweepError> {
        self.commission
            .recipient
            .as_deref()
            .map(|raw| {
                raw.parse::<Pubkey>()
                    .map_err(|_| SweepError::InvalidAddress(raw.to_string()))
            })
            .transpose()
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, SweepError> {
    raw.trim()
        .parse()
        .map_err(|_| SweepError::Config(format!("{} has invalid value '{}'", key, raw)))
}

/// Builder for `SweeperConfig` with sensible defaults.
#[derive(Debug, Default)]
pub struct SweeperBuilder {
    config: SweeperConfig,
}

impl SweeperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ledger RPC URL.
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc.url = url.into();
        self
    }

    /// Replace the aggregator endpoint list.
    pub fn with_endpoints(mut self, endpoints: Vec<AggregatorEndpoint>) -> Self {
        self.config.aggregator.endpoints = endpoints;
        self
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.config.aggregator.slippage_bps = slippage_bps;
        self
    }

    /// Set the 429 backoff schedule and round cap.
    pub fn with_rate_limit_backoff(mut self, initial_ms: u64, max_ms: u64, max_rounds: usize) -> Self {
        self.config.aggregator.rate_limit_backoff_ms = initial_ms;
        self.config.aggregator.max_backoff_ms = max_ms;
        self.config.aggregator.max_rounds = max_rounds;
        self
    }

    pub fn with_requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.config.aggregator.requests_per_second = requests_per_second;
        self
    }

    pub fn with_dust_threshold(mut self, threshold_usd: f64) -> Self {
        self.config.scanner.dust_threshold_usd = threshold_usd;
        self
    }

    pub fn with_price_lookup_delay(mut self, delay_ms: u64) -> Self {
        self.config.scanner.price_lookup_delay_ms = delay_ms;
        self
    }

    pub fn with_item_delay(mut self, delay_ms: u64) -> Self {
        self.config.sweep.item_delay_ms = delay_ms;
        self
    }

    pub fn with_failed_swap_policy(mut self, policy: FailedSwapPolicy) -> Self {
        self.config.sweep.failed_swap_policy = policy;
        self
    }

    /// Set the commission recipient and rate.
    pub fn with_commission(mut self, recipient: Option<String>, rate_bps: u16) -> Self {
        self.config.commission.recipient = recipient;
        self.config.commission.rate_bps = rate_bps;
        self
    }

    pub fn with_fee_reserve(mut self, lamports: u64) -> Self {
        self.config.commission.min_fee_reserve_lamports = lamports;
        self
    }

    /// Set confirmation polling.
    pub fn with_confirmation(mut self, timeout_seconds: u64, poll_interval_ms: u64) -> Self {
        self.config.rpc.confirm_timeout_seconds = timeout_seconds;
        self.config.rpc.confirm_poll_interval_ms = poll_interval_ms;
        self
    }

    /// Set ledger query retries.
    pub fn with_ledger_retries(mut self, attempts: usize, base_ms: u64) -> Self {
        self.config.rpc.retry_attempts = attempts;
        self.config.rpc.retry_base_ms = base_ms;
        self
    }

    pub fn with_idle_timeout(mut self, seconds: u64) -> Self {
        self.config.session.idle_timeout_seconds = seconds;
        self
    }

    pub fn build(self) -> Result<SweeperConfig, SweepError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
