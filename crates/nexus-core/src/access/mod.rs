//! ============================================================================
//! Access Module - Token-gated wallet access for ZAO Nexus
//! ============================================================================
//! Grants access when the connected wallet holds at least 0.1 of either
//! gating token:
//! - **ZAO** on Optimism
//! - **LOANZ** on Base
//!
//! ## Usage
//! ```rust,ignore
//! use nexus_core::access::WalletGateController;
//!
//! let gate = Arc::new(WalletGateController::from_config(&config, provider, Some(store))?);
//! let _listener = gate.spawn_event_listener();
//! let session = gate.connect().await?;
//! if session.has_access() { /* render the directory */ }
//! ```
//! ============================================================================

mod checker;
mod gate;
mod types;

pub use checker::{
    decode_uint256, encode_balance_of, encode_decimals, Erc20Token, EvmRpcClient, RpcPool,
    TokenBalanceSource,
};
pub use gate::{GateSettings, WalletGateController, SESSION_EVENT_CAPACITY};
pub use types::{
    format_units, meets_threshold, parse_units, pow10, Threshold, DEFAULT_ACCESS_THRESHOLD,
    MAX_TOKEN_DECIMALS,
};
