//! Types for the canonical transaction model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Blockchains the engine knows how to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "ETH")]
    Ethereum,
    #[serde(rename = "BNB")]
    Bnb,
    #[serde(rename = "TRON")]
    Tron,
    #[serde(rename = "BTC")]
    Bitcoin,
    #[serde(rename = "LTC")]
    Litecoin,
    #[serde(rename = "SOL")]
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 6] = [
        Chain::Ethereum,
        Chain::Bnb,
        Chain::Tron,
        Chain::Bitcoin,
        Chain::Litecoin,
        Chain::Solana,
    ];

    /// Short code used in configuration keys and logs
    pub fn code(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETH",
            Chain::Bnb => "BNB",
            Chain::Tron => "TRON",
            Chain::Bitcoin => "BTC",
            Chain::Litecoin => "LTC",
            Chain::Solana => "SOL",
        }
    }

    /// Symbol of the chain's native asset
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETH",
            Chain::Bnb => "BNB",
            Chain::Tron => "TRX",
            Chain::Bitcoin => "BTC",
            Chain::Litecoin => "LTC",
            Chain::Solana => "SOL",
        }
    }

    /// EVM addresses are hex and compare case-insensitively
    pub fn is_evm(&self) -> bool {
        matches!(self, Chain::Ethereum | Chain::Bnb)
    }

    /// Normalize an address the way it is keyed everywhere in the engine.
    pub fn normalize_address(&self, address: &str) -> String {
        let trimmed = address.trim();
        if self.is_evm() {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown chain: {0}")]
pub struct UnknownChainError(pub String);

impl FromStr for Chain {
    type Err = UnknownChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ETH" | "ETHEREUM" => Ok(Chain::Ethereum),
            "BNB" | "BSC" => Ok(Chain::Bnb),
            "TRON" | "TRX" => Ok(Chain::Tron),
            "BTC" | "BITCOIN" => Ok(Chain::Bitcoin),
            "LTC" | "LITECOIN" => Ok(Chain::Litecoin),
            "SOL" | "SOLANA" => Ok(Chain::Solana),
            _ => Err(UnknownChainError(s.to_string())),
        }
    }
}

/// Whether a record moves the chain's native asset or a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxCategory {
    Native,
    Token,
}

/// Direction of a transfer relative to the watched wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Confirmed,
    Pending,
    Failed,
}

/// A transaction normalized into the shape every adapter must produce.
///
/// Amounts are kept as exact decimal strings as reported by the chain. The tuple
/// (hash, wallet address, effective token) identifies a stored record, so one hash can yield
/// several records when it moves several assets for the same wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub chain: Chain,
    pub wallet_address: String,
    pub hash: String,
    /// Token symbol; empty on a native record means the chain's native asset.
    #[serde(default)]
    pub token: String,
    pub category: TxCategory,
    #[serde(default)]
    pub method: String,
    /// Block height or slot, as reported
    #[serde(default)]
    pub block: String,
    /// Unix seconds
    pub timestamp: u64,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub direction: Direction,
    #[serde(default)]
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    pub status: TxStatus,
}

impl CanonicalTransaction {
    /// Token used for deduplication and storage.
    pub fn effective_token(&self) -> String {
        let token = self.token.trim();
        match self.category {
            TxCategory::Native if token.is_empty() => self.chain.native_symbol().to_string(),
            _ => token.to_string(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            hash: self.hash.trim().to_string(),
            wallet_address: self.chain.normalize_address(&self.wallet_address),
            token: self.effective_token(),
        }
    }
}

/// Uniqueness key of a stored transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub hash: String,
    pub wallet_address: String,
    pub token: String,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.hash, self.wallet_address, self.token)
    }
}

/// Durable per-(wallet, chain) state, including the resume checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletChainState {
    pub address: String,
    pub chain: Chain,
    #[serde(default)]
    pub balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_quote: Option<String>,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
    /// Highest block timestamp or slot observed; never decreases
    #[serde(default)]
    pub checkpoint: Option<u64>,
}

impl WalletChainState {
    pub fn new(chain: Chain, address: &str) -> Self {
        Self {
            address: chain.normalize_address(address),
            chain,
            balance: String::new(),
            balance_quote: None,
            last_fetched: None,
            checkpoint: None,
        }
    }
}

/// Process-local registration gating whether new transactions are alerted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveMonitor {
    pub address: String,
    pub chain: Chain,
    pub alert_target: Option<String>,
}
