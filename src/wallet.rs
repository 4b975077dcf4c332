//! Wallet capability injected into sessions and sweeps.

use crate::error::SweepError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// What the sweeper needs from a wallet provider. Signing itself stays with
/// the provider.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    async fn connect(&self) -> Result<Pubkey, SweepError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Public key, when connected.
    fn public_key(&self) -> Option<Pubkey>;

    /// Sign a transaction whose fee payer is this wallet.
    async fn sign_transaction(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction, SweepError>;
}

/// Local keypair wallet used by the command-line front-end.
pub struct KeypairWallet {
    keypair: Keypair,
    connected: AtomicBool,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            connected: AtomicBool::new(false),
        }
    }

    /// Load a keypair from a JSON keypair file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keypair = read_keypair_file(path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to read keypair {}", path.display()))?;
        Ok(Self::new(keypair))
    }
}

#[async_trait]
impl WalletCapability for KeypairWallet {
    async fn connect(&self) -> Result<Pubkey, SweepError> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Wallet {} connected", self.keypair.pubkey());
        Ok(self.keypair.pubkey())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!("Wallet {} disconnected", self.keypair.pubkey());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn public_key(&self) -> Option<Pubkey> {
        self.is_connected().then(|| self.keypair.pubkey())
    }

    async fn sign_transaction(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction, SweepError> {
        if !self.is_connected() {
            return Err(SweepError::WalletNotConnected);
        }
        VersionedTransaction::try_new(transaction.message, &[&self.keypair])
            .map_err(|e| SweepError::SigningRejected(e.to_string()))
    }
}
