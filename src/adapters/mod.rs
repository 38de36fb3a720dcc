//! Chain adapter contract and bundled adapters
//!
//! Every chain is driven through one `ChainAdapter`. An adapter translates its chain's API into
//! `CanonicalTransaction`s plus a resume checkpoint, and optionally exposes push-style account
//! activity. The engine never talks to a chain any other way.

/// Solana JSON-RPC adapter with `accountSubscribe` push support
pub mod solana;
/// Adapter error and result types
mod types;

pub use solana::SolanaRpcAdapter;
pub use types::*;

use crate::models::{CanonicalTransaction, Chain};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-chain fetch, normalize and subscribe interface.
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
	/// Chain served by this adapter
	fn chain(&self) -> Chain;

	/// Reject addresses that can never be served. Called once at registration.
	fn validate_address(&self, address: &str) -> Result<(), AdapterError> {
		if address.trim().is_empty() {
			return Err(AdapterError::InvalidAddress(
				"address must not be empty".to_string(),
			));
		}
		Ok(())
	}

	/// Fetch the native balance of `address`.
	async fn fetch_balance(&self, address: &str) -> Result<BalanceSnapshot, AdapterError>;

	/// Fetch records newer than `checkpoint`, or the full available history when it is `None`.
	///
	/// When a checkpoint is given every returned record must sit strictly after it.
	async fn fetch_transactions_since(
		&self,
		address: &str,
		checkpoint: Option<u64>,
	) -> Result<FetchBatch, AdapterError>;

	/// Position of a record on the checkpoint axis (block timestamp unless overridden).
	fn checkpoint_of(&self, record: &CanonicalTransaction) -> u64 {
		record.timestamp
	}

	/// Whether `subscribe` is worth attempting
	fn supports_push(&self) -> bool {
		false
	}

	/// Start delivering account activity for `address` to `on_activity`.
	async fn subscribe(
		&self,
		_address: &str,
		_on_activity: ActivityCallback,
	) -> Result<SubscriptionHandle, AdapterError> {
		Err(AdapterError::Unsupported("push subscription"))
	}

	/// Stop a subscription previously returned by `subscribe`.
	async fn unsubscribe(&self, _handle: SubscriptionHandle) -> Result<(), AdapterError> {
		Err(AdapterError::Unsupported("push subscription"))
	}
}

/// Adapters keyed by the chain they serve
#[derive(Clone, Default)]
pub struct AdapterSet {
	adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl AdapterSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register an adapter, replacing any previous adapter for the same chain.
	pub fn insert(&mut self, adapter: Arc<dyn ChainAdapter>) {
		self.adapters.insert(adapter.chain(), adapter);
	}

	pub fn get(&self, chain: Chain) -> Option<Arc<dyn ChainAdapter>> {
		self.adapters.get(&chain).cloned()
	}

	/// Chains with an adapter, in a stable order
	pub fn chains(&self) -> Vec<Chain> {
		let mut chains: Vec<Chain> = self.adapters.keys().copied().collect();
		chains.sort();
		chains
	}

	pub fn is_empty(&self) -> bool {
		self.adapters.is_empty()
	}
}
