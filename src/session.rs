//! Wallet session controller.
//!
//! Owns the connection phase, the latest holdings snapshot and the last
//! sweep result. All state changes go through `WalletSession::update`, and
//! observers follow along through a `watch` subscription.

use crate::config::SweeperConfig;
use crate::error::SweepError;
use crate::scanner::BalanceScanner;
use crate::sweep::{ProgressSender, SweepOrchestrator};
use crate::types::{dust_set, Holding, SweepResult};
use crate::wallet::WalletCapability;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
    Scanning,
    /// Connected with a holdings snapshot and nothing in flight
    Idle,
    Sweeping,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub owner: Option<Pubkey>,
    pub holdings: Vec<Holding>,
    pub last_result: Option<SweepResult>,
    pub last_error: Option<String>,
    pub last_activity: Instant,
}

impl SessionSnapshot {
    fn disconnected() -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            owner: None,
            holdings: Vec::new(),
            last_result: None,
            last_error: None,
            last_activity: Instant::now(),
        }
    }
}

pub struct WalletSession {
    wallet: Arc<dyn WalletCapability>,
    scanner: Arc<BalanceScanner>,
    orchestrator: Arc<SweepOrchestrator>,
    dust_threshold_usd: f64,
    idle_timeout: Duration,
    state: watch::Sender<SessionSnapshot>,
    /// Serializes connect, refresh, sweep and disconnect
    operation: Mutex<()>,
}

impl WalletSession {
    pub fn new(
        wallet: Arc<dyn WalletCapability>,
        scanner: Arc<BalanceScanner>,
        orchestrator: Arc<SweepOrchestrator>,
        config: &SweeperConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::disconnected());
        Self {
            wallet,
            scanner,
            orchestrator,
            dust_threshold_usd: config.scanner.dust_threshold_usd,
            idle_timeout: Duration::from_secs(config.session.idle_timeout_seconds),
            state,
            operation: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    fn update(&self, change: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_modify(change);
    }

    /// Record user activity, postponing the idle timeout.
    pub fn touch(&self) {
        self.update(|s| s.last_activity = Instant::now());
    }

    /// Connect the wallet and load its holdings.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<Vec<Holding>, SweepError> {
        let _guard = self.operation.lock().await;
        self.update(|s| {
            s.phase = SessionPhase::Connecting;
            s.last_error = None;
            s.last_activity = Instant::now();
        });

        let owner = match self.wallet.connect().await {
            Ok(owner) => owner,
            Err(err) => {
                warn!("Wallet connection failed: {}", err);
                self.update(|s| {
                    s.phase = SessionPhase::Disconnected;
                    s.last_error = Some(err.to_string());
                });
                return Err(err);
            }
        };

        self.update(|s| {
            s.phase = SessionPhase::Connected;
            s.owner = Some(owner);
        });
        info!("Session connected for {}", owner);

        self.scan_locked(owner).await
    }

    /// Rescan holdings for the connected wallet.
    pub async fn refresh(&self) -> Result<Vec<Holding>, SweepError> {
        let _guard = self.operation.lock().await;
        let owner = self.connected_owner()?;
        self.touch();
        self.scan_locked(owner).await
    }

    /// Holdings in the current snapshot below the dust threshold.
    pub fn dust(&self) -> Vec<Holding> {
        dust_set(&self.state.borrow().holdings, self.dust_threshold_usd)
    }

    /// Sweep the current dust set, then rescan.
    #[instrument(skip(self, progress))]
    pub async fn sweep_dust(&self, progress: Option<&ProgressSender>) -> Result<SweepResult, SweepError> {
        let _guard = self.operation.lock().await;
        let owner = self.connected_owner()?;
        let dust = self.dust();

        self.update(|s| {
            s.phase = SessionPhase::Sweeping;
            s.last_error = None;
            s.last_activity = Instant::now();
        });

        let result = match self
            .orchestrator
            .sweep(&dust, &owner, self.wallet.as_ref(), progress)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                self.update(|s| {
                    s.phase = SessionPhase::Idle;
                    s.last_error = Some(err.to_string());
                });
                return Err(err);
            }
        };

        self.update(|s| s.last_result = Some(result.clone()));

        if !dust.is_empty() {
            if let Err(err) = self.scan_locked(owner).await {
                warn!("Rescan after sweep failed: {}", err);
            }
        } else {
            self.update(|s| s.phase = SessionPhase::Idle);
        }

        Ok(result)
    }

    /// Disconnect the wallet and drop all session state.
    pub async fn disconnect(&self) {
        let _guard = self.operation.lock().await;
        self.disconnect_locked().await;
    }

    /// Disconnect when the session has been idle past its timeout. Sessions
    /// with a sweep in flight never expire.
    pub async fn expire_if_idle(&self) -> bool {
        let Ok(_guard) = self.operation.try_lock() else {
            return false;
        };
        let (phase, idle_for) = {
            let state = self.state.borrow();
            (state.phase, state.last_activity.elapsed())
        };
        if matches!(phase, SessionPhase::Disconnected | SessionPhase::Sweeping) || idle_for < self.idle_timeout {
            return false;
        }

        info!("Session idle for {:?}, disconnecting", idle_for);
        self.disconnect_locked().await;
        true
    }

    /// Check the idle timeout periodically until the session disconnects.
    pub fn spawn_idle_watchdog(self: Arc<Self>, check_every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_every);
            loop {
                interval.tick().await;
                if self.phase() == SessionPhase::Disconnected || self.expire_if_idle().await {
                    break;
                }
            }
        })
    }

    fn connected_owner(&self) -> Result<Pubkey, SweepError> {
        let state = self.state.borrow();
        match (state.phase, state.owner) {
            (SessionPhase::Disconnected | SessionPhase::Connecting, _) | (_, None) => Err(SweepError::WalletNotConnected),
            (_, Some(owner)) => Ok(owner),
        }
    }

    async fn scan_locked(&self, owner: Pubkey) -> Result<Vec<Holding>, SweepError> {
        self.update(|s| s.phase = SessionPhase::Scanning);

        match self.scanner.scan(&owner).await {
            Ok(holdings) => {
                self.update(|s| {
                    s.phase = SessionPhase::Idle;
                    s.holdings = holdings.clone();
                });
                Ok(holdings)
            }
            Err(err) => {
                self.update(|s| {
                    s.phase = SessionPhase::Idle;
                    s.last_error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    async fn disconnect_locked(&self) {
        self.wallet.disconnect().await;
        self.update(|s| *s = SessionSnapshot::disconnected());
        info!("Session disconnected");
    }
}
