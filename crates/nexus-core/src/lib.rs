//! ============================================================================
//! NEXUS-CORE: Wallet gate for the ZAO Nexus directory
//! ============================================================================
//! This crate handles the token-gating backend:
//! - Wallet session state machine with throttled balance checks
//! - ERC-20 balance reads over EVM JSON-RPC (ZAO on Optimism, LOANZ on Base)
//! - Session persistence in an embedded redb database
//! - Environment-driven configuration
//! ============================================================================

pub mod access;
pub mod config;
pub mod db;
pub mod types;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use access::{GateSettings, WalletGateController};
pub use config::GateConfig;
pub use db::{PersistedSession, SessionDb, SESSION_NAMESPACE};
pub use types::*;
pub use wallet::{StaticWalletProvider, WalletEvent, WalletProvider};
