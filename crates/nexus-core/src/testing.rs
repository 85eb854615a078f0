//! Scripted collaborators for gate tests.

use alloy_primitives::U256;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::access::{parse_units, TokenBalanceSource};
use crate::types::{EvmAddress, GateError, TokenSymbol};
use crate::wallet::{WalletEvent, WalletProvider, WALLET_EVENT_CAPACITY};

pub const ALICE: &str = "0xA11CE00000000000000000000000000000000001";
pub const BOB: &str = "0xb0b0000000000000000000000000000000000002";

/// Token whose balance, failure and latency are set by the test
pub struct ScriptedToken {
    symbol: TokenSymbol,
    decimals: u8,
    balance: Mutex<Result<U256, String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedToken {
    pub fn new(symbol: TokenSymbol, decimals: u8) -> Arc<Self> {
        Arc::new(Self {
            symbol,
            decimals,
            balance: Mutex::new(Ok(U256::ZERO)),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    /// Set the balance in whole tokens, e.g. "0.05"
    pub fn set_balance(&self, amount: &str) {
        *self.balance.lock().unwrap() = Ok(parse_units(amount, self.decimals).unwrap());
    }

    pub fn fail(&self, reason: &str) {
        *self.balance.lock().unwrap() = Err(reason.to_string());
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of `balance_of` round-trips issued
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenBalanceSource for ScriptedToken {
    fn symbol(&self) -> TokenSymbol {
        self.symbol
    }

    async fn decimals(&self) -> Result<u8> {
        Ok(self.decimals)
    }

    async fn balance_of(&self, _owner: &EvmAddress) -> Result<U256> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.balance.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

/// Wallet whose connect result is set by the test
pub struct ScriptedProvider {
    result: Mutex<Result<String, GateError>>,
    events: broadcast::Sender<WalletEvent>,
    disconnects: AtomicUsize,
}

impl ScriptedProvider {
    pub fn accepting(address: &str) -> Arc<Self> {
        Self::with_result(Ok(address.to_string()))
    }

    pub fn rejecting(error: GateError) -> Arc<Self> {
        Self::with_result(Err(error))
    }

    fn with_result(result: Result<String, GateError>) -> Arc<Self> {
        let (events, _) = broadcast::channel(WALLET_EVENT_CAPACITY);
        Arc::new(Self {
            result: Mutex::new(result),
            events,
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn set_result(&self, result: Result<String, GateError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn emit(&self, event: WalletEvent) {
        self.events.send(event).unwrap();
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for ScriptedProvider {
    async fn connect(&self) -> Result<EvmAddress, GateError> {
        let result = self.result.lock().unwrap().clone();
        EvmAddress::parse(&result?)
    }

    async fn disconnect(&self) -> Result<(), GateError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
