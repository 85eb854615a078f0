//! ============================================================================
//! Wallet Module - Wallet provider seam
//! ============================================================================
//! The gate never talks to a wallet directly. A provider connects, reports
//! the active account, and pushes account/chain changes as events.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use crate::types::{EvmAddress, GateError};

/// Capacity of a provider's event channel
pub const WALLET_EVENT_CAPACITY: usize = 32;

/// Changes reported by the wallet underneath the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    /// Active accounts changed; an empty list means the wallet disconnected
    AccountsChanged { accounts: Vec<String> },
    /// Active network changed
    ChainChanged { chain_id: u64 },
}

/// External wallet-authentication provider
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for an account. Fails with `NoProvider`,
    /// `UserRejected` or `ConnectionFailed`.
    async fn connect(&self) -> Result<EvmAddress, GateError>;

    async fn disconnect(&self) -> Result<(), GateError>;

    /// Stream of account/chain changes for the lifetime of the provider
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Provider backed by a fixed, configured address.
///
/// Used by the CLI, where there is no interactive wallet. With no address it
/// behaves like a missing wallet extension.
pub struct StaticWalletProvider {
    address: RwLock<Option<String>>,
    events: broadcast::Sender<WalletEvent>,
}

impl StaticWalletProvider {
    pub fn new(address: Option<String>) -> Self {
        let (events, _) = broadcast::channel(WALLET_EVENT_CAPACITY);
        Self {
            address: RwLock::new(address),
            events,
        }
    }

    /// Replace the active account and notify subscribers
    pub fn switch_accounts(&self, accounts: Vec<String>) {
        if let Ok(mut address) = self.address.write() {
            *address = accounts.first().cloned();
        }
        let _ = self.events.send(WalletEvent::AccountsChanged { accounts });
    }

    pub fn switch_chain(&self, chain_id: u64) {
        let _ = self.events.send(WalletEvent::ChainChanged { chain_id });
    }
}

#[async_trait]
impl WalletProvider for StaticWalletProvider {
    async fn connect(&self) -> Result<EvmAddress, GateError> {
        let address = self
            .address
            .read()
            .map_err(|_| GateError::ConnectionFailed("provider state poisoned".into()))?
            .clone();

        match address {
            Some(raw) => EvmAddress::parse(&raw),
            None => Err(GateError::NoProvider),
        }
    }

    async fn disconnect(&self) -> Result<(), GateError> {
        info!("Static wallet provider disconnected");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_without_address() {
        let provider = StaticWalletProvider::new(None);
        assert_eq!(provider.connect().await.unwrap_err(), GateError::NoProvider);
    }

    #[tokio::test]
    async fn test_static_provider_connects_lowercase() {
        let provider =
            StaticWalletProvider::new(Some("0xABCDEF0123456789ABCDEF0123456789ABCDEF01".into()));
        let address = provider.connect().await.unwrap();
        assert_eq!(address.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[tokio::test]
    async fn test_static_provider_rejects_bad_address() {
        let provider = StaticWalletProvider::new(Some("not-an-address".into()));
        assert!(matches!(
            provider.connect().await,
            Err(GateError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_static_provider_emits_events() {
        let provider = StaticWalletProvider::new(None);
        let mut rx = provider.subscribe();

        provider.switch_accounts(vec!["0x2222222222222222222222222222222222222222".into()]);
        provider.switch_chain(8453);

        assert!(matches!(rx.recv().await.unwrap(), WalletEvent::AccountsChanged { .. }));
        assert_eq!(rx.recv().await.unwrap(), WalletEvent::ChainChanged { chain_id: 8453 });
        assert!(provider.connect().await.is_ok());
    }
}
