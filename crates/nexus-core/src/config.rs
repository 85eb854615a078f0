//! ============================================================================
//! Gate Configuration - RPC endpoints, token contracts and timing
//! ============================================================================
//! Defaults target ZAO on Optimism and LOANZ on Base. Contract addresses have
//! no default and must come from the environment.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::access::{Threshold, DEFAULT_ACCESS_THRESHOLD};
use crate::types::{EvmAddress, GateError, TokenSymbol};

/// Minimum interval between balance checks, in seconds
pub const DEFAULT_CHECK_COOLDOWN_SECS: u64 = 10;

/// Upper bound on a single balance query, in seconds
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_ZAO_RPC_URL: &str = "https://mainnet.optimism.io";
pub const DEFAULT_LOANZ_RPC_URL: &str = "https://mainnet.base.org";

/// Where one gating token lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: TokenSymbol,
    pub rpc_url: String,
    pub contract: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    pub tokens: Vec<TokenConfig>,
    pub check_cooldown_secs: u64,
    pub rpc_timeout_secs: u64,
    /// Whole-token threshold as a decimal string, e.g. "0.1"
    pub access_threshold: String,
    pub db_path: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tokens: vec![
                TokenConfig {
                    symbol: TokenSymbol::Zao,
                    rpc_url: DEFAULT_ZAO_RPC_URL.to_string(),
                    contract: None,
                },
                TokenConfig {
                    symbol: TokenSymbol::Loanz,
                    rpc_url: DEFAULT_LOANZ_RPC_URL.to_string(),
                    contract: None,
                },
            ],
            check_cooldown_secs: DEFAULT_CHECK_COOLDOWN_SECS,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            access_threshold: DEFAULT_ACCESS_THRESHOLD.to_string(),
            db_path: None,
        }
    }
}

impl GateConfig {
    /// Build from NEXUS_* environment variables on top of the defaults
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        for token in &mut config.tokens {
            let prefix = format!("NEXUS_{}", token.symbol.ticker());
            if let Some(url) = lookup(&format!("{}_RPC_URL", prefix)) {
                token.rpc_url = url;
            }
            token.contract = lookup(&format!("{}_CONTRACT", prefix));
        }

        if let Some(raw) = lookup("NEXUS_CHECK_COOLDOWN_SECS") {
            config.check_cooldown_secs = parse_secs("NEXUS_CHECK_COOLDOWN_SECS", &raw)?;
        }
        if let Some(raw) = lookup("NEXUS_RPC_TIMEOUT_SECS") {
            config.rpc_timeout_secs = parse_secs("NEXUS_RPC_TIMEOUT_SECS", &raw)?;
        }
        if let Some(threshold) = lookup("NEXUS_ACCESS_THRESHOLD") {
            config.access_threshold = threshold;
        }
        config.db_path = lookup("NEXUS_DB_PATH");

        Ok(config)
    }

    /// Check everything a live gate needs: URLs, contracts and threshold
    pub fn validate(&self) -> Result<(), GateError> {
        if self.tokens.is_empty() {
            return Err(GateError::Config("no gating tokens configured".into()));
        }

        for token in &self.tokens {
            let url = url::Url::parse(&token.rpc_url).map_err(|e| {
                GateError::Config(format!("{} RPC URL '{}': {}", token.symbol, token.rpc_url, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(GateError::Config(format!(
                    "{} RPC URL must be http(s), got '{}'",
                    token.symbol, token.rpc_url
                )));
            }

            let contract = token.contract.as_deref().ok_or_else(|| {
                GateError::Config(format!(
                    "missing NEXUS_{}_CONTRACT",
                    token.symbol.ticker()
                ))
            })?;
            EvmAddress::parse(contract).map_err(|_| {
                GateError::Config(format!("{} contract '{}' is not an address", token.symbol, contract))
            })?;
        }

        if self.rpc_timeout_secs == 0 {
            return Err(GateError::Config("RPC timeout must be at least 1 second".into()));
        }

        if self.threshold()?.is_zero() {
            return Err(GateError::Config(
                "access threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn threshold(&self) -> Result<Threshold, GateError> {
        Threshold::parse(&self.access_threshold)
    }

    pub fn check_cooldown(&self) -> Duration {
        Duration::from_secs(self.check_cooldown_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn token_symbols(&self) -> Vec<TokenSymbol> {
        self.tokens.iter().map(|t| t.symbol).collect()
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64, GateError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| GateError::Config(format!("{} must be a whole number of seconds, got '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const ZAO: &str = "0x1000000000000000000000000000000000000001";
    const LOANZ: &str = "0x2000000000000000000000000000000000000002";

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.check_cooldown(), Duration::from_secs(10));
        assert_eq!(config.token_symbols(), vec![TokenSymbol::Zao, TokenSymbol::Loanz]);
        assert_eq!(config.threshold().unwrap(), Threshold::default());
    }

    #[test]
    fn test_default_config_needs_contracts() {
        let err = GateConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("NEXUS_ZAO_CONTRACT"));
    }

    #[test]
    fn test_from_lookup_applies_overrides() {
        let config = GateConfig::from_lookup(lookup_from(&[
            ("NEXUS_ZAO_CONTRACT", ZAO),
            ("NEXUS_LOANZ_CONTRACT", LOANZ),
            ("NEXUS_LOANZ_RPC_URL", "https://base.example.org"),
            ("NEXUS_CHECK_COOLDOWN_SECS", "30"),
            ("NEXUS_ACCESS_THRESHOLD", "1.5"),
        ]))
        .unwrap();

        assert_eq!(config.tokens[1].rpc_url, "https://base.example.org");
        assert_eq!(config.check_cooldown_secs, 30);
        assert_eq!(config.threshold().unwrap().to_string(), "1.5");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(GateConfig::from_lookup(lookup_from(&[("NEXUS_RPC_TIMEOUT_SECS", "soon")])).is_err());

        let bad_contract = GateConfig::from_lookup(lookup_from(&[
            ("NEXUS_ZAO_CONTRACT", "0x123"),
            ("NEXUS_LOANZ_CONTRACT", LOANZ),
        ]))
        .unwrap();
        assert!(bad_contract.validate().is_err());

        let bad_url = GateConfig::from_lookup(lookup_from(&[
            ("NEXUS_ZAO_CONTRACT", ZAO),
            ("NEXUS_LOANZ_CONTRACT", LOANZ),
            ("NEXUS_ZAO_RPC_URL", "ws://localhost:8546"),
        ]))
        .unwrap();
        assert!(bad_url.validate().is_err());

        let bad_threshold = GateConfig::from_lookup(lookup_from(&[
            ("NEXUS_ZAO_CONTRACT", ZAO),
            ("NEXUS_LOANZ_CONTRACT", LOANZ),
            ("NEXUS_ACCESS_THRESHOLD", "lots"),
        ]))
        .unwrap();
        assert!(bad_threshold.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_threshold() {
        for zero in ["0", "0.0", ".000"] {
            let config = GateConfig::from_lookup(lookup_from(&[
                ("NEXUS_ZAO_CONTRACT", ZAO),
                ("NEXUS_LOANZ_CONTRACT", LOANZ),
                ("NEXUS_ACCESS_THRESHOLD", zero),
            ]))
            .unwrap();
            assert!(config.threshold().unwrap().is_zero());
            assert!(matches!(config.validate(), Err(GateError::Config(_))));
        }
    }
}
