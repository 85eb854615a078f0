//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{EvmAddress, TokenBalance, TokenSymbol, WalletSession};

/// Projection of a wallet session that survives restarts.
/// Check timing is deliberately absent so a fresh load may check at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub address: Option<EvmAddress>,
    pub is_connected: bool,
    pub balances: BTreeMap<TokenSymbol, TokenBalance>,
    /// Informational only; recomputed from balances on load
    pub has_access: bool,
    pub saved_at: i64,
}

impl From<&WalletSession> for PersistedSession {
    fn from(session: &WalletSession) -> Self {
        Self {
            address: session.address().cloned(),
            is_connected: session.is_connected(),
            balances: session.balances().clone(),
            has_access: session.has_access(),
            saved_at: chrono::Utc::now().timestamp(),
        }
    }
}
