//! ============================================================================
//! Wallet Gate - Session state machine with throttled balance checks
//! ============================================================================
//! Owns the wallet session, reacts to wallet events, queries every gating
//! token concurrently and derives access from the settled balances.
//!
//! A check is admitted under one write lock: the in-flight marker and the
//! cooldown are read and the marker is set before any RPC work starts, so a
//! second trigger arriving mid-cycle is a no-op. The marker is released by a
//! drop guard, so a cycle cancelled mid-query never wedges the gate. Each
//! address change bumps the session epoch, and a cycle whose epoch is no
//! longer current is discarded instead of applied.
//!
//! Session writes to the store happen after the lock is released. Every
//! snapshot carries a revision and older revisions are never written over
//! newer ones.
//! ============================================================================

use anyhow::anyhow;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::checker::{Erc20Token, RpcPool, TokenBalanceSource};
use super::types::Threshold;
use crate::config::{GateConfig, DEFAULT_CHECK_COOLDOWN_SECS, DEFAULT_RPC_TIMEOUT_SECS};
use crate::db::{PersistedSession, SessionDb, SESSION_NAMESPACE};
use crate::types::{
    CheckOutcome, CheckReport, EvmAddress, GateError, GateState, SessionEvent, TokenBalance,
    TokenSymbol, WalletSession,
};
use crate::wallet::{WalletEvent, WalletProvider};

/// Capacity of the session notification channel
pub const SESSION_EVENT_CAPACITY: usize = 64;

/// Timing and threshold knobs for a gate
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub cooldown: Duration,
    pub query_timeout: Duration,
    pub threshold: Threshold,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_CHECK_COOLDOWN_SECS),
            query_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            threshold: Threshold::default(),
        }
    }
}

impl GateSettings {
    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        Ok(Self {
            cooldown: config.check_cooldown(),
            query_timeout: config.rpc_timeout(),
            threshold: config.threshold()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckTrigger {
    Manual,
    Forced,
    AccountChanged,
    ChainChanged,
}

impl CheckTrigger {
    fn bypasses_cooldown(self) -> bool {
        !matches!(self, CheckTrigger::Manual)
    }
}

struct GateInner {
    session: WalletSession,
    epoch: u64,
    last_checked_at: Option<Instant>,
    /// Bumped on every session change that must reach the store
    revision: u64,
}

impl GateInner {
    fn state(&self, in_flight: Option<u64>) -> GateState {
        if !self.session.is_connected() {
            GateState::Disconnected
        } else if in_flight == Some(self.epoch) {
            GateState::ConnectedChecking
        } else if self.last_checked_at.is_some() {
            GateState::ConnectedSettled
        } else {
            GateState::ConnectedUnchecked
        }
    }

    /// Start a new epoch: any cycle in flight becomes stale
    fn next_epoch(&mut self) {
        self.epoch += 1;
        self.last_checked_at = None;
    }

    fn snapshot(&mut self) -> SessionSnapshot {
        self.revision += 1;
        SessionSnapshot {
            revision: self.revision,
            record: self
                .session
                .is_connected()
                .then(|| PersistedSession::from(&self.session)),
        }
    }
}

/// Session state to write once the gate lock is released
struct SessionSnapshot {
    revision: u64,
    /// `None` clears the stored session
    record: Option<PersistedSession>,
}

/// Holds the in-flight marker for one cycle and releases it when dropped,
/// whether the cycle completed or its future was cancelled
struct CheckGuard<'a> {
    slot: &'a Mutex<Option<u64>>,
    epoch: u64,
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if *slot == Some(self.epoch) {
            *slot = None;
        }
    }
}

/// Token-gated wallet session controller
pub struct WalletGateController {
    provider: Arc<dyn WalletProvider>,
    tokens: Vec<Arc<dyn TokenBalanceSource>>,
    store: Option<Arc<SessionDb>>,
    settings: GateSettings,
    inner: RwLock<GateInner>,
    /// Epoch of the cycle currently in flight
    in_flight: Mutex<Option<u64>>,
    /// Highest snapshot revision written to the store
    persisted_revision: Mutex<u64>,
    events: broadcast::Sender<SessionEvent>,
}

impl WalletGateController {
    /// Build a gate reading real ERC-20 contracts over JSON-RPC
    pub fn from_config(
        config: &GateConfig,
        provider: Arc<dyn WalletProvider>,
        store: Option<Arc<SessionDb>>,
    ) -> Result<Self, GateError> {
        config.validate()?;
        let settings = GateSettings::from_config(config)?;
        let pool = Arc::new(RpcPool::new(settings.query_timeout));

        let mut tokens: Vec<Arc<dyn TokenBalanceSource>> = Vec::with_capacity(config.tokens.len());
        for token in &config.tokens {
            let contract = token.contract.as_deref().ok_or_else(|| {
                GateError::Config(format!("missing contract for {}", token.symbol))
            })?;
            tokens.push(Arc::new(Erc20Token::new(
                token.symbol,
                EvmAddress::parse(contract)?,
                &token.rpc_url,
                pool.clone(),
            )));
        }

        Ok(Self::new(provider, tokens, store, settings))
    }

    /// Build a gate over arbitrary balance sources, hydrating from `store`
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        tokens: Vec<Arc<dyn TokenBalanceSource>>,
        store: Option<Arc<SessionDb>>,
        settings: GateSettings,
    ) -> Self {
        let symbols: Vec<TokenSymbol> = tokens.iter().map(|t| t.symbol()).collect();
        let session = store
            .as_deref()
            .and_then(|db| hydrate(db, &symbols, &settings.threshold))
            .unwrap_or_else(|| WalletSession::disconnected(&symbols));

        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        Self {
            provider,
            tokens,
            store,
            settings,
            inner: RwLock::new(GateInner {
                session,
                epoch: 0,
                last_checked_at: None,
                revision: 0,
            }),
            in_flight: Mutex::new(None),
            persisted_revision: Mutex::new(0),
            events,
        }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Current session snapshot
    pub async fn session(&self) -> WalletSession {
        self.inner.read().await.session.clone()
    }

    pub async fn state(&self) -> GateState {
        let inner = self.inner.read().await;
        inner.state(self.in_flight_epoch())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Connect through the wallet provider and check balances.
    /// Failures leave the session untouched.
    pub async fn connect(&self) -> Result<WalletSession, GateError> {
        let address = match self.provider.connect().await {
            Ok(address) => address,
            Err(e) => {
                warn!("Wallet connection failed: {}", e);
                return Err(e);
            }
        };

        info!("Wallet connected: {}", address);
        self.adopt_address(address.clone(), SessionEvent::Connected { address })
            .await;
        Ok(self.run_check(CheckTrigger::Manual).await)
    }

    /// Drop the session back to defaults. Always succeeds.
    pub async fn disconnect(&self) -> WalletSession {
        if let Err(e) = self.provider.disconnect().await {
            warn!("Wallet provider disconnect failed: {} - resetting session anyway", e);
        }
        self.reset().await
    }

    /// Refresh balances unless a check ran within the cooldown or is in flight
    pub async fn check_balances(&self) -> WalletSession {
        self.run_check(CheckTrigger::Manual).await
    }

    /// Refresh balances now, ignoring the cooldown. Still a no-op while a
    /// check is in flight.
    pub async fn refresh(&self) -> WalletSession {
        self.run_check(CheckTrigger::Forced).await
    }

    /// Wallet reported a new account list
    pub async fn handle_accounts_changed(&self, accounts: &[String]) -> WalletSession {
        let Some(first) = accounts.first() else {
            info!("Wallet reported no accounts - disconnecting");
            return self.reset().await;
        };

        let address = match EvmAddress::parse(first) {
            Ok(address) => address,
            Err(e) => {
                warn!("Ignoring account change: {}", e);
                return self.session().await;
            }
        };

        self.adopt_address(address.clone(), SessionEvent::AccountChanged { address })
            .await;
        self.run_check(CheckTrigger::AccountChanged).await
    }

    /// Wallet switched networks; balances must be re-validated
    pub async fn handle_chain_changed(&self, chain_id: u64) -> WalletSession {
        info!("Wallet chain changed to {}", chain_id);
        self.run_check(CheckTrigger::ChainChanged).await
    }

    pub async fn handle_event(&self, event: WalletEvent) -> WalletSession {
        match event {
            WalletEvent::AccountsChanged { accounts } => self.handle_accounts_changed(&accounts).await,
            WalletEvent::ChainChanged { chain_id } => self.handle_chain_changed(chain_id).await,
        }
    }

    /// Feed the provider's events into this gate until the provider closes
    /// its channel or the gate is dropped. Abort the handle to stop early.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.provider.subscribe();
        let gate: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(gate) = gate.upgrade() else { break };
                        debug!("Wallet event: {:?}", event);
                        gate.handle_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Wallet event listener lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Wallet event listener stopped");
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn adopt_address(&self, address: EvmAddress, event: SessionEvent) {
        let snapshot = {
            let mut inner = self.inner.write().await;
            if inner.session.address() == Some(&address) {
                return;
            }
            inner.next_epoch();
            inner.session.set_address(address);
            inner.snapshot()
        };
        self.persist(snapshot);
        let _ = self.events.send(event);
    }

    async fn reset(&self) -> WalletSession {
        let (session, snapshot) = {
            let mut inner = self.inner.write().await;
            inner.next_epoch();
            inner.session = WalletSession::disconnected(&self.symbols());
            (inner.session.clone(), inner.snapshot())
        };
        self.persist(snapshot);
        let _ = self.events.send(SessionEvent::Disconnected);
        info!("Wallet session reset");
        session
    }

    async fn run_check(&self, trigger: CheckTrigger) -> WalletSession {
        let (guard, owner) = {
            let mut inner = self.inner.write().await;

            let Some(owner) = inner.session.address().cloned() else {
                debug!("Balance check skipped: no wallet connected");
                return inner.session.clone();
            };

            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if *in_flight == Some(inner.epoch) {
                debug!("Balance check skipped: a check is already in flight");
                return inner.session.clone();
            }

            if !trigger.bypasses_cooldown() {
                if let Some(last) = inner.last_checked_at {
                    let elapsed = last.elapsed();
                    if elapsed < self.settings.cooldown {
                        debug!(
                            "Balance check skipped: last check {:?} ago (cooldown {:?})",
                            elapsed, self.settings.cooldown
                        );
                        return inner.session.clone();
                    }
                }
            }

            *in_flight = Some(inner.epoch);
            let guard = CheckGuard {
                slot: &self.in_flight,
                epoch: inner.epoch,
            };
            (guard, owner)
        };

        debug!("Checking balances for {} ({:?})", owner, trigger);
        let results = join_all(
            self.tokens
                .iter()
                .map(|token| self.query_token(token.as_ref(), &owner)),
        )
        .await;

        let (session, has_access, snapshot) = {
            let mut inner = self.inner.write().await;
            if inner.epoch != guard.epoch {
                debug!("Discarding balance check for {}: session changed meanwhile", owner);
                return inner.session.clone();
            }

            let mut balances = inner.session.balances().clone();
            let mut outcomes = BTreeMap::new();
            for (symbol, result) in results {
                match result {
                    Ok(balance) => {
                        balances.insert(symbol, balance);
                        outcomes.insert(symbol, CheckOutcome::Updated);
                    }
                    Err(e) => {
                        let err = GateError::BalanceQueryFailed {
                            symbol,
                            reason: format!("{:#}", e),
                        };
                        warn!("{} - keeping last known value", err);
                        outcomes.insert(symbol, CheckOutcome::Failed(format!("{:#}", e)));
                    }
                }
            }

            inner.session.set_balances(balances, &self.settings.threshold);
            inner.session.set_last_check(CheckReport {
                checked_at: Utc::now(),
                outcomes,
            });
            inner.last_checked_at = Some(Instant::now());
            drop(guard);

            let has_access = inner.session.has_access();
            (inner.session.clone(), has_access, inner.snapshot())
        };
        self.persist(snapshot);

        info!(
            "Balances for {}: {} -> access {}",
            owner,
            describe_balances(&session),
            if has_access { "granted" } else { "denied" }
        );
        let _ = self.events.send(SessionEvent::BalancesUpdated { has_access });
        session
    }

    async fn query_token(
        &self,
        token: &dyn TokenBalanceSource,
        owner: &EvmAddress,
    ) -> (TokenSymbol, anyhow::Result<TokenBalance>) {
        let query = async {
            let decimals = token.decimals().await?;
            let raw = token.balance_of(owner).await?;
            Ok::<TokenBalance, anyhow::Error>(TokenBalance::new(raw, decimals))
        };

        let result = match tokio::time::timeout(self.settings.query_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "timed out after {}s",
                self.settings.query_timeout.as_secs_f64()
            )),
        };
        (token.symbol(), result)
    }

    fn symbols(&self) -> Vec<TokenSymbol> {
        self.tokens.iter().map(|t| t.symbol()).collect()
    }

    fn in_flight_epoch(&self) -> Option<u64> {
        *self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, snapshot: SessionSnapshot) {
        let Some(db) = self.store.as_deref() else { return };

        let mut written = self
            .persisted_revision
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if snapshot.revision <= *written {
            debug!("Skipping stale session write (revision {})", snapshot.revision);
            return;
        }

        let result = match &snapshot.record {
            Some(record) => db.store_session(SESSION_NAMESPACE, record),
            None => db.clear_session(SESSION_NAMESPACE).map(|_| ()),
        };

        match result {
            Ok(()) => *written = snapshot.revision,
            Err(e) => warn!("Failed to persist wallet session: {}", e),
        }
    }
}

fn hydrate(db: &SessionDb, symbols: &[TokenSymbol], threshold: &Threshold) -> Option<WalletSession> {
    let stored = match db.load_session(SESSION_NAMESPACE) {
        Ok(Some(stored)) => stored,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to load persisted wallet session: {} - starting fresh", e);
            return None;
        }
    };

    let Some(address) = stored.address.filter(|_| stored.is_connected) else {
        debug!("Stored wallet session is not connected; starting disconnected");
        return Some(WalletSession::disconnected(symbols));
    };
    let balances = symbols
        .iter()
        .map(|symbol| (*symbol, stored.balances.get(symbol).copied().unwrap_or_default()))
        .collect();

    info!("Hydrated wallet session ({})", address);
    let session = WalletSession::restore(Some(address), balances, threshold);
    if session.has_access() != stored.has_access {
        debug!("Stored access flag disagrees with stored balances; using balances");
    }
    Some(session)
}

fn describe_balances(session: &WalletSession) -> String {
    session
        .balances()
        .iter()
        .map(|(symbol, balance)| format!("{}={}", symbol, balance))
        .collect::<Vec<_>>()
        .join(", ")
}
