//! ============================================================================
//! Balance Checker - ERC-20 balance reads over EVM JSON-RPC
//! ============================================================================
//! Reads `balanceOf(owner)` and `decimals()` through `eth_call`. RPC clients
//! are created lazily, one per endpoint, and shared by every token on that
//! chain for as long as the owning gate lives.
//! ============================================================================

use alloy_primitives::U256;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::types::MAX_TOKEN_DECIMALS;
use crate::types::{EvmAddress, TokenSymbol};

/// `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// `decimals()` selector
const DECIMALS_SELECTOR: &str = "313ce567";

/// Read-only source of one token's balances.
///
/// The gate only talks to tokens through this trait.
#[async_trait]
pub trait TokenBalanceSource: Send + Sync {
    fn symbol(&self) -> TokenSymbol;

    /// Token decimals. Implementations may cache this.
    async fn decimals(&self) -> Result<u8>;

    /// Raw balance of `owner` in the token's smallest unit
    async fn balance_of(&self, owner: &EvmAddress) -> Result<U256>;
}

// ============================================================================
// JSON-RPC client
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Minimal EVM JSON-RPC client for read-only contract calls
pub struct EvmRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl EvmRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `eth_call` against the latest block, returning the raw return data
    pub async fn eth_call(&self, to: &EvmAddress, data: &str) -> Result<Vec<u8>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: serde_json::json!([{ "to": to.as_str(), "data": data }, "latest"]),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("RPC request to {} failed: {}", self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("RPC {} returned {}: {}", self.url, status, body);
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse RPC response: {}", e))?;

        parse_call_result(body)
    }
}

fn parse_call_result(body: JsonRpcResponse) -> Result<Vec<u8>> {
    if let Some(err) = body.error {
        bail!("RPC error {}: {}", err.code, err.message);
    }

    let result = body
        .result
        .ok_or_else(|| anyhow!("RPC response has neither result nor error"))?;
    let digits = result.strip_prefix("0x").unwrap_or(&result);

    hex::decode(digits).map_err(|e| anyhow!("Malformed eth_call result '{}': {}", result, e))
}

/// Calldata for `balanceOf(owner)`
pub fn encode_balance_of(owner: &EvmAddress) -> String {
    format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, owner.hex_digits())
}

/// Calldata for `decimals()`
pub fn encode_decimals() -> String {
    format!("0x{}", DECIMALS_SELECTOR)
}

/// Decode the first ABI word of a call result as a uint256
pub fn decode_uint256(data: &[u8]) -> Result<U256> {
    if data.is_empty() {
        bail!("empty call result (no contract at this address?)");
    }
    let word = &data[..data.len().min(32)];
    U256::try_from_be_slice(word).ok_or_else(|| anyhow!("call result does not fit a uint256"))
}

fn decode_decimals(data: &[u8]) -> Result<u8> {
    let value = decode_uint256(data)?;
    if value > U256::from(MAX_TOKEN_DECIMALS) {
        bail!("token reports unsupported decimals {}", value);
    }
    Ok(value.as_limbs()[0] as u8)
}

// ============================================================================
// Client pool
// ============================================================================

/// Lazily-populated RPC clients keyed by endpoint URL
pub struct RpcPool {
    timeout: Duration,
    clients: Mutex<HashMap<String, Arc<EvmRpcClient>>>,
}

impl RpcPool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Get the client for `url`, creating it on first use
    pub fn client(&self, url: &str) -> Result<Arc<EvmRpcClient>> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| anyhow!("RPC pool lock poisoned"))?;

        if let Some(client) = clients.get(url) {
            return Ok(client.clone());
        }

        debug!("Creating RPC client for {}", url);
        let client = Arc::new(EvmRpcClient::new(url, self.timeout)?);
        clients.insert(url.to_string(), client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// ERC-20 binding
// ============================================================================

/// One ERC-20 contract on one chain
pub struct Erc20Token {
    symbol: TokenSymbol,
    contract: EvmAddress,
    rpc_url: String,
    pool: Arc<RpcPool>,
    client: OnceCell<Arc<EvmRpcClient>>,
    decimals: tokio::sync::OnceCell<u8>,
}

impl Erc20Token {
    pub fn new(symbol: TokenSymbol, contract: EvmAddress, rpc_url: &str, pool: Arc<RpcPool>) -> Self {
        Self {
            symbol,
            contract,
            rpc_url: rpc_url.to_string(),
            pool,
            client: OnceCell::new(),
            decimals: tokio::sync::OnceCell::new(),
        }
    }

    pub fn contract(&self) -> &EvmAddress {
        &self.contract
    }

    fn rpc(&self) -> Result<&Arc<EvmRpcClient>> {
        self.client.get_or_try_init(|| self.pool.client(&self.rpc_url))
    }
}

#[async_trait]
impl TokenBalanceSource for Erc20Token {
    fn symbol(&self) -> TokenSymbol {
        self.symbol
    }

    async fn decimals(&self) -> Result<u8> {
        let decimals = self
            .decimals
            .get_or_try_init(|| async {
                let data = self.rpc()?.eth_call(&self.contract, &encode_decimals()).await?;
                let decimals = decode_decimals(&data)?;
                debug!("{} decimals: {}", self.symbol, decimals);
                Ok::<u8, anyhow::Error>(decimals)
            })
            .await?;
        Ok(*decimals)
    }

    async fn balance_of(&self, owner: &EvmAddress) -> Result<U256> {
        let data = self
            .rpc()?
            .eth_call(&self.contract, &encode_balance_of(owner))
            .await?;
        let balance = decode_uint256(&data)?;
        debug!("{} balance for {}: {} (raw)", self.symbol, owner, balance);
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> EvmAddress {
        EvmAddress::parse("0x1111111111111111111111111111111111111111").unwrap()
    }

    #[test]
    fn test_encode_balance_of() {
        let data = encode_balance_of(&owner());
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000"));
        assert!(data.ends_with("1111111111111111111111111111111111111111"));
    }

    #[test]
    fn test_encode_decimals() {
        assert_eq!(encode_decimals(), "0x313ce567");
    }

    #[test]
    fn test_decode_uint256() {
        let mut word = [0u8; 32];
        word[31] = 0x2a;
        assert_eq!(decode_uint256(&word).unwrap(), U256::from(42u64));
        assert!(decode_uint256(&[]).is_err());
    }

    #[test]
    fn test_decode_decimals_bounds() {
        let mut word = [0u8; 32];
        word[31] = 18;
        assert_eq!(decode_decimals(&word).unwrap(), 18);
        word[31] = 200;
        assert!(decode_decimals(&word).is_err());
    }

    #[test]
    fn test_parse_call_result() {
        let ok = JsonRpcResponse {
            result: Some("0x0000000000000000000000000000000000000000000000000000000000000006".into()),
            error: None,
        };
        assert_eq!(parse_call_result(ok).unwrap().len(), 32);

        let err = JsonRpcResponse {
            result: None,
            error: Some(JsonRpcError {
                code: -32000,
                message: "execution reverted".into(),
            }),
        };
        let msg = parse_call_result(err).unwrap_err().to_string();
        assert!(msg.contains("execution reverted"));

        let empty = JsonRpcResponse { result: None, error: None };
        assert!(parse_call_result(empty).is_err());
    }

    #[test]
    fn test_pool_reuses_client_per_url() {
        let pool = RpcPool::new(Duration::from_secs(5));
        let a = pool.client("https://mainnet.optimism.io").unwrap();
        let b = pool.client("https://mainnet.optimism.io").unwrap();
        let c = pool.client("https://mainnet.base.org").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_token_client_is_lazy() {
        let pool = Arc::new(RpcPool::new(Duration::from_secs(5)));
        let token = Erc20Token::new(
            TokenSymbol::Zao,
            owner(),
            "https://mainnet.optimism.io",
            pool.clone(),
        );
        assert!(pool.is_empty());
        token.rpc().unwrap();
        token.rpc().unwrap();
        assert_eq!(pool.len(), 1);
    }
}
