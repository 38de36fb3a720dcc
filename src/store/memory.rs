//! In-process repositories, used by tests and deployments that do not need durability.

use super::repositories::{TransactionRepository, WalletStateRepository, merge_state};
use super::{InsertOutcome, StoreError};
use crate::models::{CanonicalTransaction, Chain, DedupKey, WalletChainState};

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct TransactionTable {
	/// Insertion order
	rows: Vec<CanonicalTransaction>,
	keys: HashSet<(Chain, DedupKey)>,
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
	table: Mutex<TransactionTable>,
}

impl InMemoryTransactionRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// Total number of stored rows across all chains
	pub fn len(&self) -> usize {
		lock(&self.table).rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait::async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
	async fn find_existing(
		&self,
		chain: Chain,
		keys: &[DedupKey],
	) -> Result<HashSet<DedupKey>, StoreError> {
		let table = lock(&self.table);
		Ok(keys
			.iter()
			.filter(|k| table.keys.contains(&(chain, (*k).clone())))
			.cloned()
			.collect())
	}

	async fn insert_unordered(
		&self,
		records: &[CanonicalTransaction],
	) -> Result<Vec<InsertOutcome>, StoreError> {
		let mut table = lock(&self.table);
		let outcomes = records
			.iter()
			.map(|record| {
				if table.keys.insert((record.chain, record.dedup_key())) {
					table.rows.push(record.clone());
					InsertOutcome::Inserted
				} else {
					InsertOutcome::Duplicate
				}
			})
			.collect();
		Ok(outcomes)
	}

	async fn list_for_wallet(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Vec<CanonicalTransaction>, StoreError> {
		let address = chain.normalize_address(address);
		let table = lock(&self.table);
		Ok(table
			.rows
			.iter()
			.filter(|tx| tx.chain == chain && tx.wallet_address == address)
			.cloned()
			.collect())
	}
}

#[derive(Default)]
pub struct InMemoryWalletStateRepository {
	states: Mutex<HashMap<(Chain, String), WalletChainState>>,
}

impl InMemoryWalletStateRepository {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl WalletStateRepository for InMemoryWalletStateRepository {
	async fn load(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Option<WalletChainState>, StoreError> {
		let key = (chain, chain.normalize_address(address));
		Ok(lock(&self.states).get(&key).cloned())
	}

	async fn upsert(&self, state: &WalletChainState) -> Result<WalletChainState, StoreError> {
		let key = (state.chain, state.chain.normalize_address(&state.address));
		let mut states = lock(&self.states);
		let merged = merge_state(states.get(&key), state);
		states.insert(key, merged.clone());
		Ok(merged)
	}

	async fn list_addresses(&self, chain: Chain) -> Result<Vec<String>, StoreError> {
		let mut addresses: Vec<String> = lock(&self.states)
			.keys()
			.filter(|(c, _)| *c == chain)
			.map(|(_, address)| address.clone())
			.collect();
		addresses.sort();
		Ok(addresses)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::native_tx;

	#[tokio::test]
	async fn test_same_hash_on_other_chain_is_distinct() {
		let repo = InMemoryTransactionRepository::new();
		let eth = native_tx(Chain::Ethereum, "w", "0xA", 1);
		let mut bnb = eth.clone();
		bnb.chain = Chain::Bnb;
		bnb.token = "BNB".to_string();

		let outcomes = repo.insert_unordered(&[eth, bnb]).await.unwrap();
		assert_eq!(outcomes, vec![InsertOutcome::Inserted, InsertOutcome::Inserted]);
		assert_eq!(repo.len(), 2);
	}

	#[tokio::test]
	async fn test_wallet_state_upsert_is_monotonic() {
		let repo = InMemoryWalletStateRepository::new();
		let mut state = WalletChainState::new(Chain::Ethereum, "0xAbC");
		state.checkpoint = Some(10);
		repo.upsert(&state).await.unwrap();

		state.checkpoint = Some(5);
		repo.upsert(&state).await.unwrap();

		let loaded = repo.load(Chain::Ethereum, "0xabc").await.unwrap().unwrap();
		assert_eq!(loaded.checkpoint, Some(10));
		assert_eq!(
			repo.list_addresses(Chain::Ethereum).await.unwrap(),
			vec!["0xabc".to_string()]
		);
	}
}
