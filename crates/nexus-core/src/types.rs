//! ============================================================================
//! Core Types for the Nexus Wallet Gate
//! ============================================================================
//! Session model, token balances, gate state and error taxonomy.
//! These types are serialized to JSON for the CLI and for persistence.
//! ============================================================================

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::access::{format_units, meets_threshold, Threshold};

/// Decimals assumed for a balance that has never been read from chain
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

// ============================================================================
// Addresses & Tokens
// ============================================================================

/// 20-byte EVM address, normalized to lowercase `0x`-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EvmAddress(String);

impl EvmAddress {
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| GateError::InvalidAddress(raw.to_string()))?;

        if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
            return Err(GateError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address without the `0x` prefix, as used in ABI words
    pub fn hex_digits(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EvmAddress {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EvmAddress> for String {
    fn from(value: EvmAddress) -> Self {
        value.0
    }
}

/// Tokens whose balances gate access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenSymbol {
    #[serde(rename = "ZAO")]
    Zao,
    #[serde(rename = "LOANZ")]
    Loanz,
}

impl TokenSymbol {
    pub const ALL: [TokenSymbol; 2] = [TokenSymbol::Zao, TokenSymbol::Loanz];

    pub fn ticker(&self) -> &'static str {
        match self {
            TokenSymbol::Zao => "ZAO",
            TokenSymbol::Loanz => "LOANZ",
        }
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

/// Token balance in the token's smallest unit, with the decimals it was read with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub raw: U256,
    pub decimals: u8,
}

impl TokenBalance {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero() -> Self {
        Self::new(U256::ZERO, DEFAULT_TOKEN_DECIMALS)
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    /// Human-readable decimal string ("0", "0.3", "1250.5")
    pub fn formatted(&self) -> String {
        format_units(self.raw, self.decimals)
    }

    pub fn meets(&self, threshold: &Threshold) -> bool {
        meets_threshold(self.raw, self.decimals, threshold)
    }
}

impl Default for TokenBalance {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for TokenBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Outcome of one token query within a balance-check cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CheckOutcome {
    Updated,
    Failed(String),
}

/// Summary of the most recent completed balance-check cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub checked_at: DateTime<Utc>,
    pub outcomes: BTreeMap<TokenSymbol, CheckOutcome>,
}

impl CheckReport {
    pub fn failed_tokens(&self) -> Vec<TokenSymbol> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CheckOutcome::Failed(_)))
            .map(|(symbol, _)| *symbol)
            .collect()
    }
}

/// Wallet session as seen by consumers.
///
/// `has_access` is only ever written by [`WalletSession::set_balances`], so it
/// always agrees with `balances` under the threshold in force.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSession {
    address: Option<EvmAddress>,
    is_connected: bool,
    balances: BTreeMap<TokenSymbol, TokenBalance>,
    has_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_check: Option<CheckReport>,
}

impl WalletSession {
    /// Disconnected session with zero balances for every tracked token
    pub fn disconnected(tokens: &[TokenSymbol]) -> Self {
        Self {
            address: None,
            is_connected: false,
            balances: tokens.iter().map(|t| (*t, TokenBalance::zero())).collect(),
            has_access: false,
            last_check: None,
        }
    }

    pub fn address(&self) -> Option<&EvmAddress> {
        self.address.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn balances(&self) -> &BTreeMap<TokenSymbol, TokenBalance> {
        &self.balances
    }

    pub fn balance(&self, symbol: TokenSymbol) -> TokenBalance {
        self.balances.get(&symbol).copied().unwrap_or_default()
    }

    pub fn has_access(&self) -> bool {
        self.has_access
    }

    pub fn last_check(&self) -> Option<&CheckReport> {
        self.last_check.as_ref()
    }

    /// True until a balance-check cycle completes for the current address
    pub fn never_checked(&self) -> bool {
        self.last_check.is_none()
    }

    /// Switch to a new address, dropping balances that belonged to the old one
    pub(crate) fn set_address(&mut self, address: EvmAddress) {
        let tokens: Vec<TokenSymbol> = self.balances.keys().copied().collect();
        *self = Self::disconnected(&tokens);
        self.address = Some(address);
        self.is_connected = true;
    }

    /// Merge fresh balances over the tracked ones. Tokens missing from
    /// `balances` keep their current value.
    pub(crate) fn set_balances(
        &mut self,
        balances: BTreeMap<TokenSymbol, TokenBalance>,
        threshold: &Threshold,
    ) {
        self.balances.extend(balances);
        self.has_access = self.balances.values().any(|b| b.meets(threshold));
    }

    pub(crate) fn set_last_check(&mut self, report: CheckReport) {
        self.last_check = Some(report);
    }

    /// Rebuild a session from stored parts, re-deriving access from balances
    pub(crate) fn restore(
        address: Option<EvmAddress>,
        balances: BTreeMap<TokenSymbol, TokenBalance>,
        threshold: &Threshold,
    ) -> Self {
        let mut session = Self {
            is_connected: address.is_some(),
            address,
            balances: BTreeMap::new(),
            has_access: false,
            last_check: None,
        };
        session.set_balances(balances, threshold);
        session
    }
}

/// Gate lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Disconnected,
    ConnectedUnchecked,
    ConnectedChecking,
    ConnectedSettled,
}

/// Notifications broadcast to session subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected { address: EvmAddress },
    AccountChanged { address: EvmAddress },
    BalancesUpdated { has_access: bool },
    Disconnected,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum GateError {
    #[error("No wallet provider detected - install or enable a wallet")]
    NoProvider,

    #[error("Connection rejected by user")]
    UserRejected,

    #[error("Wallet connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Balance query for {symbol} failed: {reason}")]
    BalanceQueryFailed { symbol: TokenSymbol, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalized_to_lowercase() {
        let addr = EvmAddress::parse("0xAbCdEf0123456789aBcDeF0123456789ABCDEF01").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(addr.hex_digits().len(), 40);
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!(EvmAddress::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(EvmAddress::parse("0x1234").is_err());
        assert!(EvmAddress::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_disconnected_session_defaults() {
        let session = WalletSession::disconnected(&TokenSymbol::ALL);
        assert!(!session.is_connected());
        assert!(!session.has_access());
        assert!(session.never_checked());
        assert_eq!(session.balance(TokenSymbol::Zao).formatted(), "0");
        assert_eq!(session.balance(TokenSymbol::Loanz).formatted(), "0");
    }

    #[test]
    fn test_access_follows_balances() {
        let threshold = Threshold::default();
        let mut session = WalletSession::disconnected(&TokenSymbol::ALL);

        let mut balances = BTreeMap::new();
        balances.insert(TokenSymbol::Zao, TokenBalance::new(U256::from(100_000_000_000_000_000u64), 18));
        balances.insert(TokenSymbol::Loanz, TokenBalance::zero());
        session.set_balances(balances.clone(), &threshold);
        assert!(session.has_access());

        balances.insert(TokenSymbol::Zao, TokenBalance::zero());
        session.set_balances(balances, &threshold);
        assert!(!session.has_access());
    }

    #[test]
    fn test_set_address_resets_balances() {
        let threshold = Threshold::default();
        let mut session = WalletSession::disconnected(&TokenSymbol::ALL);
        let mut balances = BTreeMap::new();
        balances.insert(TokenSymbol::Zao, TokenBalance::new(U256::from(5u64), 0));
        session.set_balances(balances, &threshold);
        assert!(session.has_access());

        session.set_address(EvmAddress::parse("0x00000000000000000000000000000000000000aa").unwrap());
        assert!(session.is_connected());
        assert!(!session.has_access());
        assert!(session.balance(TokenSymbol::Zao).is_zero());
        assert_eq!(session.balances().len(), 2);
    }

    #[test]
    fn test_partial_balances_keep_other_tokens() {
        let threshold = Threshold::default();
        let mut session = WalletSession::disconnected(&TokenSymbol::ALL);

        let mut loanz = BTreeMap::new();
        loanz.insert(TokenSymbol::Loanz, TokenBalance::new(U256::from(200_000_000_000_000_000u64), 18));
        session.set_balances(loanz, &threshold);

        let mut zao = BTreeMap::new();
        zao.insert(TokenSymbol::Zao, TokenBalance::zero());
        session.set_balances(zao, &threshold);

        assert_eq!(session.balances().len(), 2);
        assert_eq!(session.balance(TokenSymbol::Loanz).formatted(), "0.2");
        assert!(session.has_access());
    }

    #[test]
    fn test_session_json_shape() {
        let session = WalletSession::disconnected(&TokenSymbol::ALL);
        let json = serde_json::to_value(&session).unwrap();
        assert!(json["address"].is_null());
        assert_eq!(json["is_connected"], false);
        assert!(json["balances"]["ZAO"].is_object());
        assert_eq!(json["has_access"], false);
    }
}
