//! Command-line front-end for the dust sweeper.
//!
//! `scan` lists holdings and the dust subset for any address. `sweep` loads a
//! keypair, converts its dust into SOL and settles the commission.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dust_sweeper::aggregator::{AggregatorClient, HttpTransport, ReqwestTransport};
use dust_sweeper::config::{FailedSwapPolicy, SweeperConfig};
use dust_sweeper::ledger::{LedgerClient, RpcLedger};
use dust_sweeper::scanner::{BalanceScanner, HttpMarketData};
use dust_sweeper::session::WalletSession;
use dust_sweeper::sweep::{ProgressEvent, ProgressReporter, SweepOrchestrator};
use dust_sweeper::types::{dust_set, lamports_to_sol, CommissionOutcome, Holding};
use dust_sweeper::wallet::KeypairWallet;
use solana_sdk::pubkey::Pubkey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dust-sweeper", version, about = "Sweep low-value token balances into SOL")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the RPC endpoint
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Dust threshold in USD
    #[arg(long, global = true)]
    threshold: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List holdings and the dust subset of an address
    Scan {
        address: String,
    },
    /// Swap the dust of a keypair wallet into SOL
    Sweep {
        /// Solana keypair file
        #[arg(long)]
        keypair: PathBuf,

        /// Transfer unroutable tokens to the commission recipient
        #[arg(long)]
        forward_failed: bool,

        /// Show the dust set without sending anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SweeperConfig::load(path)?,
        None => SweeperConfig::from_env()?,
    };
    if let Some(url) = &cli.rpc_url {
        config.rpc.url = url.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.scanner.dust_threshold_usd = threshold;
    }

    match cli.command {
        Command::Scan { address } => run_scan(config, &address).await,
        Command::Sweep {
            keypair,
            forward_failed,
            dry_run,
        } => {
            if forward_failed {
                config.sweep.failed_swap_policy = FailedSwapPolicy::ForwardToRecipient;
            }
            run_sweep(config, &keypair, dry_run).await
        }
    }
}

struct Components {
    scanner: Arc<BalanceScanner>,
    orchestrator: Arc<SweepOrchestrator>,
}

fn build_components(config: &SweeperConfig) -> Result<Components> {
    config.validate()?;

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
        Duration::from_secs(config.aggregator.request_timeout_seconds),
        config.aggregator.api_key.clone(),
    )?);
    let market_transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
        Duration::from_secs(config.aggregator.request_timeout_seconds),
        None,
    )?);
    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::new(&config.rpc));
    let market = Arc::new(HttpMarketData::new(
        market_transport,
        config.scanner.token_list_url.clone(),
        config.scanner.pair_lookup_url.clone(),
    ));

    let scanner = Arc::new(BalanceScanner::new(
        ledger.clone(),
        market,
        config.scanner.clone(),
        &config.rpc,
    ));
    let aggregator = Arc::new(AggregatorClient::new(&config.aggregator, transport)?);
    let orchestrator = Arc::new(SweepOrchestrator::new(aggregator, ledger, config)?);

    Ok(Components { scanner, orchestrator })
}

async fn run_scan(config: SweeperConfig, address: &str) -> Result<()> {
    let owner: Pubkey = address
        .parse()
        .with_context(|| format!("Invalid address {}", address))?;
    let components = build_components(&config)?;

    let holdings = components.scanner.scan(&owner).await?;
    print_holdings("Holdings", &holdings);

    let dust = dust_set(&holdings, config.scanner.dust_threshold_usd);
    print_holdings(
        &format!("Dust below ${:.2}", config.scanner.dust_threshold_usd),
        &dust,
    );
    Ok(())
}

async fn run_sweep(config: SweeperConfig, keypair: &Path, dry_run: bool) -> Result<()> {
    let components = build_components(&config)?;
    let wallet = Arc::new(KeypairWallet::from_file(keypair)?);
    let session = Arc::new(WalletSession::new(
        wallet,
        components.scanner,
        components.orchestrator,
        &config,
    ));

    session.connect().await?;
    let watchdog = session.clone().spawn_idle_watchdog(Duration::from_secs(5));
    let dust = session.dust();
    print_holdings(
        &format!("Dust below ${:.2}", config.scanner.dust_threshold_usd),
        &dust,
    );
    if dry_run || dust.is_empty() {
        watchdog.abort();
        session.disconnect().await;
        return Ok(());
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let printer = tokio::spawn(async move {
        let mut reporter = ProgressReporter::new();
        while let Some(event) = progress_rx.recv().await {
            reporter.apply(&event);
            match &event.reason {
                Some(reason) => println!("[{:>5.1}%] {:<10} {} ({})", reporter.percent(), event.symbol, event.status, reason),
                None => println!("[{:>5.1}%] {:<10} {}", reporter.percent(), event.symbol, event.status),
            }
        }
    });

    let result = session.sweep_dust(Some(&progress_tx)).await;
    drop(progress_tx);
    printer.await.context("Progress printer panicked")?;
    let result = result?;

    println!();
    println!("Received:   {:.9} SOL", result.total_sol());
    println!("Commission: {:.9} SOL", result.commission_sol());
    println!("You keep:   {:.9} SOL", result.user_receives_sol());
    match &result.commission {
        CommissionOutcome::Paid { signature, .. } => println!("Commission transfer: {}", signature),
        CommissionOutcome::Skipped { reason } => println!("Commission skipped: {}", reason),
        CommissionOutcome::Failed { lamports, reason } => {
            println!("Commission of {:.9} SOL not sent: {}", lamports_to_sol(*lamports), reason)
        }
    }
    for failed in &result.failed {
        match &failed.forwarded_signature {
            Some(signature) => println!("Failed {}: {} (forwarded: {})", failed.symbol, failed.reason, signature),
            None => println!("Failed {}: {} (swap manually)", failed.symbol, failed.reason),
        }
    }

    info!("Sweep complete with {} signatures", result.signatures.len());
    watchdog.abort();
    session.disconnect().await;
    Ok(())
}

fn print_holdings(title: &str, holdings: &[Holding]) {
    println!("{} ({}):", title, holdings.len());
    for holding in holdings {
        println!(
            "  {:<10} {:>20.6} ${:>10.4} {:>12.9} SOL  {}",
            holding.symbol, holding.balance, holding.usd_value, holding.sol_value, holding.mint
        );
    }
}
