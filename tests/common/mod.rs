//! Shared stubs for integration tests: HTTP transport, ledger and market data.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dust_sweeper::aggregator::{AggregatorClient, AggregatorEndpoint, HttpReply, HttpTransport};
use dust_sweeper::config::{SweeperBuilder, SweeperConfig};
use dust_sweeper::error::SweepError;
use dust_sweeper::ledger::{LedgerClient, TokenAccountBalance};
use dust_sweeper::scanner::{MarketDataSource, MarketPair, TokenListEntry};
use dust_sweeper::sweep::SweepOrchestrator;
use dust_sweeper::types::{Holding, TOKEN_PROGRAM_ID};
use dust_sweeper::wallet::{KeypairWallet, WalletCapability};
use serde_json::{json, Value};
use solana_sdk::hash::Hash;
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const LAMPORTS: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// HTTP

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Router = Box<dyn Fn(&RecordedRequest) -> Result<HttpReply> + Send + Sync>;

/// Transport answering from a routing closure and recording every request.
pub struct StubTransport {
    router: Router,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StubTransport {
    pub fn new(router: impl Fn(&RecordedRequest) -> Result<HttpReply> + Send + Sync + 'static) -> Self {
        Self {
            router: Box::new(router),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn handle(&self, request: RecordedRequest) -> Result<HttpReply> {
        let reply = (self.router)(&request);
        self.requests.lock().unwrap().push(request);
        reply
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply> {
        self.handle(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            query: query.to_vec(),
            body: None,
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply> {
        self.handle(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            query: Vec::new(),
            body: Some(body.clone()),
        })
    }
}

pub fn test_endpoints() -> Vec<AggregatorEndpoint> {
    ["alpha", "beta", "gamma"]
        .iter()
        .map(|name| {
            AggregatorEndpoint::new(
                *name,
                format!("https://{}.test/quote", name),
                format!("https://{}.test/swap", name),
            )
        })
        .collect()
}

/// Unsigned swap-shaped transaction paid by `payer`, as the aggregator returns it.
pub fn encoded_swap_transaction(payer: &Pubkey) -> String {
    let ix = system_instruction::transfer(payer, &Pubkey::new_unique(), 1);
    let message = Message::new_with_blockhash(&[ix], Some(payer), &Hash::new_unique());
    let transaction = VersionedTransaction {
        signatures: vec![Signature::default()],
        message: VersionedMessage::Legacy(message),
    };
    STANDARD.encode(bincode::serialize(&transaction).unwrap())
}

/// Scripted Jupiter-compatible aggregator.
#[derive(Default, Clone)]
pub struct JupiterStub {
    /// Quoted lamport output per input mint; other mints have no route
    pub routes: HashMap<String, u64>,
    /// Mints whose quote requests answer 503 on every endpoint
    pub unavailable: HashSet<String>,
    /// Mints whose swap build answers with an HTML error page
    pub unbuildable: HashSet<String>,
    /// Endpoint names that answer 429
    pub rate_limited: HashSet<String>,
}

impl JupiterStub {
    pub fn with_route(mut self, mint: &str, lamports: u64) -> Self {
        self.routes.insert(mint.to_string(), lamports);
        self
    }

    pub fn reply(&self, request: &RecordedRequest) -> Result<HttpReply> {
        if self.rate_limited.iter().any(|name| request.url.contains(name.as_str())) {
            return Ok(HttpReply::new(429, Some("application/json"), "{}"));
        }

        if request.url.ends_with("/quote") {
            let mint = request.param("inputMint").unwrap_or_default();
            if self.unavailable.contains(mint) {
                return Ok(HttpReply::new(503, Some("text/html"), "<html>Service Unavailable</html>"));
            }
            return Ok(match self.routes.get(mint) {
                Some(out) => HttpReply::json_ok(&json!({
                    "inputMint": mint,
                    "outputMint": request.param("outputMint"),
                    "inAmount": request.param("amount"),
                    "outAmount": out.to_string(),
                    "slippageBps": 500,
                    "platformFee": {"amount": "0", "feeBps": 0},
                    "routePlan": [],
                })),
                None => HttpReply::new(
                    400,
                    Some("application/json"),
                    json!({"error": "Could not find any route", "errorCode": "COULD_NOT_FIND_ANY_ROUTE"}).to_string(),
                ),
            });
        }

        if request.url.ends_with("/swap") {
            let body = request.body.clone().unwrap_or_default();
            let mint = body["quoteResponse"]["inputMint"].as_str().unwrap_or_default();
            if self.unbuildable.contains(mint) {
                return Ok(HttpReply::new(200, Some("text/html"), "<!DOCTYPE html><html>error</html>"));
            }
            let payer: Pubkey = body["userPublicKey"].as_str().unwrap_or_default().parse()?;
            return Ok(HttpReply::json_ok(&json!({
                "swapTransaction": encoded_swap_transaction(&payer),
                "lastValidBlockHeight": 1,
            })));
        }

        bail!("unexpected request to {}", request.url)
    }
}

// ---------------------------------------------------------------------------
// Ledger

/// In-memory ledger that verifies signatures of submitted transactions.
pub struct StubLedger {
    accounts: Mutex<HashMap<Pubkey, Vec<TokenAccountBalance>>>,
    failing_programs: Mutex<HashSet<Pubkey>>,
    balance: AtomicU64,
    reject_sends: AtomicBool,
    failing_confirmations: AtomicUsize,
    sent: Mutex<Vec<VersionedTransaction>>,
    pub token_account_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub blockhash_calls: AtomicUsize,
}

impl StubLedger {
    pub fn new(balance: u64) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            failing_programs: Mutex::new(HashSet::new()),
            balance: AtomicU64::new(balance),
            reject_sends: AtomicBool::new(false),
            failing_confirmations: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            token_account_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            blockhash_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_account(&self, account: TokenAccountBalance) {
        self.accounts
            .lock()
            .unwrap()
            .entry(account.program)
            .or_default()
            .push(account);
    }

    pub fn clear_accounts(&self) {
        self.accounts.lock().unwrap().clear();
    }

    pub fn fail_program(&self, program: Pubkey) {
        self.failing_programs.lock().unwrap().insert(program);
    }

    pub fn reject_sends(&self) {
        self.reject_sends.store(true, Ordering::SeqCst);
    }

    /// The next `count` confirmations report an on-chain failure.
    pub fn fail_confirmations(&self, count: usize) {
        self.failing_confirmations.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.token_account_calls.load(Ordering::SeqCst)
            + self.balance_calls.load(Ordering::SeqCst)
            + self.blockhash_calls.load(Ordering::SeqCst)
            + self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    async fn token_accounts(&self, _owner: &Pubkey, program: &Pubkey) -> Result<Vec<TokenAccountBalance>> {
        self.token_account_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_programs.lock().unwrap().contains(program) {
            bail!("RPC node unavailable");
        }
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or_default())
    }

    async fn balance(&self, _owner: &Pubkey) -> Result<u64> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        self.blockhash_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Hash::new_unique())
    }

    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        if self.reject_sends.load(Ordering::SeqCst) {
            bail!("Transaction simulation failed: blockhash not found");
        }
        if !transaction.verify_with_results().iter().all(|ok| *ok) {
            bail!("signature verification failed");
        }
        self.sent.lock().unwrap().push(transaction.clone());
        Ok(transaction.signatures[0])
    }

    async fn confirm_transaction(&self, signature: &Signature) -> Result<()> {
        let failing = self
            .failing_confirmations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            bail!("Transaction {} failed on-chain: SlippageToleranceExceeded", signature);
        }
        Ok(())
    }
}

pub fn token_account(mint: &str, amount: u64, decimals: u8, program: Pubkey) -> TokenAccountBalance {
    TokenAccountBalance {
        address: Pubkey::new_unique(),
        mint: mint.to_string(),
        amount,
        decimals,
        ui_amount: amount as f64 / 10f64.powi(decimals as i32),
        program,
    }
}

// ---------------------------------------------------------------------------
// Wallet

/// Keypair wallet whose user declines the next `refusals` signing requests.
pub struct RefusingWallet {
    inner: KeypairWallet,
    refusals: AtomicUsize,
}

impl RefusingWallet {
    pub fn new(keypair: Keypair, refusals: usize) -> Self {
        Self {
            inner: KeypairWallet::new(keypair),
            refusals: AtomicUsize::new(refusals),
        }
    }
}

#[async_trait]
impl WalletCapability for RefusingWallet {
    async fn connect(&self) -> std::result::Result<Pubkey, SweepError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn public_key(&self) -> Option<Pubkey> {
        self.inner.public_key()
    }

    async fn sign_transaction(
        &self,
        transaction: VersionedTransaction,
    ) -> std::result::Result<VersionedTransaction, SweepError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if refused.is_ok() {
            return Err(SweepError::SigningRejected("user rejected the request".to_string()));
        }
        self.inner.sign_transaction(transaction).await
    }
}

// ---------------------------------------------------------------------------
// Market data

#[derive(Default)]
pub struct StubMarket {
    pub prices: HashMap<String, f64>,
    pub token_list: Vec<TokenListEntry>,
    pub fail_pairs: bool,
    pub fail_list: bool,
    pub pair_calls: Mutex<Vec<String>>,
}

impl StubMarket {
    pub fn with_price(mut self, mint: &str, price: f64) -> Self {
        self.prices.insert(mint.to_string(), price);
        self
    }

    pub fn pair_calls(&self) -> Vec<String> {
        self.pair_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataSource for StubMarket {
    async fn token_list(&self) -> Result<Vec<TokenListEntry>> {
        if self.fail_list {
            bail!("token list unavailable");
        }
        Ok(self.token_list.clone())
    }

    async fn pairs(&self, mint: &str) -> Result<Vec<MarketPair>> {
        self.pair_calls.lock().unwrap().push(mint.to_string());
        if self.fail_pairs {
            bail!("pair lookup unavailable");
        }
        Ok(self
            .prices
            .get(mint)
            .map(|price| {
                vec![MarketPair {
                    base_address: mint.to_string(),
                    base_symbol: None,
                    base_name: None,
                    price_usd: Some(*price),
                    liquidity_usd: 10_000.0,
                    image_url: None,
                }]
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Sweep harness

pub fn holding(symbol: &str, balance: f64, decimals: u8, usd_value: f64) -> Holding {
    Holding {
        mint: Pubkey::new_unique().to_string(),
        symbol: symbol.to_string(),
        name: format!("{} Token", symbol),
        balance,
        raw_amount: (balance * 10f64.powi(decimals as i32)).round() as u64,
        decimals,
        usd_value,
        sol_value: usd_value / 200.0,
        logo_uri: None,
        token_account: Pubkey::new_unique(),
        token_program: TOKEN_PROGRAM_ID,
    }
}

/// Builder preset with no delays and a commission recipient.
pub fn test_builder(recipient: &Pubkey) -> SweeperBuilder {
    SweeperBuilder::new()
        .with_endpoints(test_endpoints())
        .with_item_delay(0)
        .with_price_lookup_delay(0)
        .with_rate_limit_backoff(1, 2, 2)
        .with_requests_per_second(1_000)
        .with_ledger_retries(2, 1)
        .with_confirmation(1, 1)
        .with_commission(Some(recipient.to_string()), 1_000)
}

pub struct Harness {
    pub transport: Arc<StubTransport>,
    pub ledger: Arc<StubLedger>,
    pub wallet: Arc<KeypairWallet>,
    pub owner: Pubkey,
    pub recipient: Pubkey,
    pub config: SweeperConfig,
    pub aggregator: Arc<AggregatorClient>,
    pub orchestrator: SweepOrchestrator,
}

pub async fn harness(stub: JupiterStub, configure: impl FnOnce(SweeperBuilder) -> SweeperBuilder) -> Harness {
    let recipient = Pubkey::new_unique();
    let config = configure(test_builder(&recipient)).build().unwrap();

    let transport = Arc::new(StubTransport::new(move |request| stub.reply(request)));
    let ledger = Arc::new(StubLedger::new(LAMPORTS));
    let wallet = Arc::new(KeypairWallet::new(Keypair::new()));
    let owner = wallet.connect().await.unwrap();

    let aggregator = Arc::new(AggregatorClient::new(&config.aggregator, transport.clone()).unwrap());
    let orchestrator = SweepOrchestrator::new(aggregator.clone(), ledger.clone(), &config).unwrap();

    Harness {
        transport,
        ledger,
        wallet,
        owner,
        recipient,
        config,
        aggregator,
        orchestrator,
    }
}
