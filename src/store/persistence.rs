//! Dedup-aware persistence service.
//!
//! `PersistenceService` is the single write path for canonical transactions and wallet state. A
//! candidate batch is normalized, deduplicated within itself, checked against storage, and the
//! remaining records are inserted independently. Only the records this call actually stored are
//! reported as inserted, which is what makes notification at-most-once under concurrent or retried
//! cycles.

use super::repositories::{TransactionRepository, WalletStateRepository};
use super::{InsertOutcome, PersistOutcome, StoreError};
use crate::models::{CanonicalTransaction, Chain, DedupKey, WalletChainState};

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Service coordinating the transaction and wallet-state repositories.
#[derive(Clone)]
pub struct PersistenceService {
    transactions: Arc<dyn TransactionRepository>,
    wallets: Arc<dyn WalletStateRepository>,
}

impl PersistenceService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        wallets: Arc<dyn WalletStateRepository>,
    ) -> Self {
        Self {
            transactions,
            wallets,
        }
    }

    /// Persist a candidate batch for one wallet and return what was newly stored.
    ///
    /// A failing existence lookup aborts the call with nothing stored. A failing insert is reported per
    /// record in `PersistOutcome::failed` instead.
    pub async fn persist_batch(
        &self,
        chain: Chain,
        wallet: &str,
        candidates: Vec<CanonicalTransaction>,
    ) -> Result<PersistOutcome, StoreError> {
        let mut outcome = PersistOutcome::default();
        let prepared = prepare_batch(chain, wallet, candidates, &mut outcome);
        if prepared.is_empty() {
            return Ok(outcome);
        }

        let keys: Vec<DedupKey> = prepared.iter().map(|tx| tx.dedup_key()).collect();
        let existing = self.transactions.find_existing(chain, &keys).await?;

        let fresh: Vec<CanonicalTransaction> = prepared
            .into_iter()
            .zip(keys.iter())
            .filter_map(|(tx, key)| (!existing.contains(key)).then_some(tx))
            .collect();
        outcome.duplicates += keys.len() - fresh.len();

        if fresh.is_empty() {
            return Ok(outcome);
        }

        let results = match self.transactions.insert_unordered(&fresh).await {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    chain = %chain,
                    wallet = %wallet,
                    "Insert of {} transactions failed: {}",
                    fresh.len(),
                    e
                );
                vec![InsertOutcome::Failed(e.to_string()); fresh.len()]
            }
        };

        for (index, tx) in fresh.into_iter().enumerate() {
            match results.get(index) {
                Some(InsertOutcome::Inserted) => outcome.inserted.push(tx),
                Some(InsertOutcome::Duplicate) => outcome.duplicates += 1,
                Some(InsertOutcome::Failed(reason)) => {
                    debug!("Failed to store {}: {}", tx.dedup_key(), reason);
                    outcome.failed.push(tx);
                }
                None => outcome.failed.push(tx),
            }
        }

        Ok(outcome)
    }

    pub async fn load_state(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Option<WalletChainState>, StoreError> {
        self.wallets.load(chain, address).await
    }

    /// Upsert wallet state; the stored checkpoint never decreases.
    pub async fn save_state(
        &self,
        state: &WalletChainState,
    ) -> Result<WalletChainState, StoreError> {
        self.wallets.upsert(state).await
    }

    /// Addresses with stored state on `chain`
    pub async fn known_addresses(&self, chain: Chain) -> Result<Vec<String>, StoreError> {
        self.wallets.list_addresses(chain).await
    }

    pub async fn transactions_for(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Vec<CanonicalTransaction>, StoreError> {
        self.transactions.list_for_wallet(chain, address).await
    }
}

/// Normalize candidates and drop empty hashes and in-batch duplicates (first one wins).
fn prepare_batch(
    chain: Chain,
    wallet: &str,
    candidates: Vec<CanonicalTransaction>,
    outcome: &mut PersistOutcome,
) -> Vec<CanonicalTransaction> {
    let wallet = chain.normalize_address(wallet);
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut prepared = Vec::with_capacity(candidates.len());

    for mut tx in candidates {
        tx.hash = tx.hash.trim().to_string();
        if tx.hash.is_empty() {
            debug!(chain = %chain, wallet = %wallet, "Dropping record without hash");
            continue;
        }
        tx.chain = chain;
        tx.wallet_address = wallet.clone();
        tx.token = tx.effective_token();

        if seen.insert(tx.dedup_key()) {
            prepared.push(tx);
        } else {
            outcome.duplicates += 1;
        }
    }

    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTransactionRepository, InMemoryWalletStateRepository};
    use crate::test_support::{FlakyTransactionRepository, native_tx};

    fn service() -> PersistenceService {
        PersistenceService::new(
            Arc::new(InMemoryTransactionRepository::new()),
            Arc::new(InMemoryWalletStateRepository::new()),
        )
    }

    #[tokio::test]
    async fn test_replaying_batch_inserts_nothing() {
        let service = service();
        let batch = vec![
            native_tx(Chain::Ethereum, "0xW", "0xA", 10),
            native_tx(Chain::Ethereum, "0xW", "0xB", 11),
        ];

        let first = service
            .persist_batch(Chain::Ethereum, "0xW", batch.clone())
            .await
            .unwrap();
        assert_eq!(first.inserted.len(), 2);

        let second = service
            .persist_batch(Chain::Ethereum, "0xW", batch)
            .await
            .unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.duplicates, 2);
    }

    #[tokio::test]
    async fn test_same_hash_different_token_are_distinct_rows() {
        let service = service();
        let eth = native_tx(Chain::Ethereum, "0xW", "0xA", 10);
        let mut usdt = native_tx(Chain::Ethereum, "0xW", "0xA", 10);
        usdt.token = "USDT".to_string();
        usdt.category = crate::models::TxCategory::Token;

        let outcome = service
            .persist_batch(Chain::Ethereum, "0xW", vec![eth, usdt])
            .await
            .unwrap();
        assert_eq!(outcome.inserted.len(), 2);

        let stored = service
            .transactions_for(Chain::Ethereum, "0xw")
            .await
            .unwrap();
        let tokens: Vec<&str> = stored.iter().map(|tx| tx.token.as_str()).collect();
        assert_eq!(tokens, vec!["ETH", "USDT"]);
    }

    #[tokio::test]
    async fn test_batch_is_normalized_before_dedup() {
        let service = service();
        let mut blank_token = native_tx(Chain::Ethereum, "0xW", "0xA", 10);
        blank_token.token = String::new();
        let explicit = native_tx(Chain::Ethereum, "0xw", "0xA", 10);
        let mut no_hash = native_tx(Chain::Ethereum, "0xW", "0xC", 10);
        no_hash.hash = "  ".to_string();

        let outcome = service
            .persist_batch(Chain::Ethereum, "0xW", vec![blank_token, explicit, no_hash])
            .await
            .unwrap();

        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.inserted[0].token, "ETH");
        assert_eq!(outcome.inserted[0].wallet_address, "0xw");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persist_inserts_each_key_once() {
        let service = service();
        let batch: Vec<_> = (0..20)
            .map(|i| native_tx(Chain::Bnb, "0xW", &format!("0x{}", i), i))
            .collect();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let batch = batch.clone();
                tokio::spawn(async move {
                    service
                        .persist_batch(Chain::Bnb, "0xW", batch)
                        .await
                        .unwrap()
                        .inserted
                        .len()
                })
            })
            .collect();

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, 20);
        assert_eq!(
            service.transactions_for(Chain::Bnb, "0xW").await.unwrap().len(),
            20
        );
    }

    #[tokio::test]
    async fn test_failed_inserts_are_reported() {
        let flaky = Arc::new(FlakyTransactionRepository::new());
        flaky.fail_hash("0xB");
        let service =
            PersistenceService::new(flaky.clone(), Arc::new(InMemoryWalletStateRepository::new()));

        let outcome = service
            .persist_batch(
                Chain::Ethereum,
                "0xW",
                vec![
                    native_tx(Chain::Ethereum, "0xW", "0xA", 1),
                    native_tx(Chain::Ethereum, "0xW", "0xB", 2),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].hash, "0xB");
        assert!(!outcome.is_complete());
    }
}
