//! The ingestion cycle shared by every trigger.
//!
//! Poll ticks, resync sweeps, manual refreshes and subscription reconciliations all run the same
//! pass for one wallet:
//!
//! 1. load the stored checkpoint
//! 2. fetch balance and records newer than the checkpoint, through the retry policy
//! 3. drop records at or before the checkpoint, and records the caller has already seen
//! 4. persist, receiving only the newly inserted subset
//! 5. advance the checkpoint, capped below the earliest record that failed to persist
//! 6. dispatch the newly inserted subset, unless alerts are suppressed
//!
//! Any error before step 4 leaves stored state untouched.

use super::checkpoint::next_checkpoint;
use super::retry::RetryPolicy;
use super::types::{CycleReport, CycleRequest, EngineError};
use crate::adapters::AdapterSet;
use crate::models::WalletChainState;
use crate::notify::NotificationDispatcher;
use crate::store::PersistenceService;

use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct IngestionCycle {
    adapters: AdapterSet,
    persistence: PersistenceService,
    dispatcher: NotificationDispatcher,
    retry: RetryPolicy,
}

impl IngestionCycle {
    pub fn new(
        adapters: AdapterSet,
        persistence: PersistenceService,
        dispatcher: NotificationDispatcher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            adapters,
            persistence,
            dispatcher,
            retry,
        }
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn persistence(&self) -> &PersistenceService {
        &self.persistence
    }

    /// Run one cycle for the requested wallet.
    pub async fn run(&self, request: CycleRequest) -> Result<CycleReport, EngineError> {
        let CycleRequest {
            chain,
            address,
            trigger,
            suppress_alerts,
            already_seen,
        } = request;

        let adapter = self
            .adapters
            .get(chain)
            .ok_or(EngineError::NoAdapter(chain))?;

        let stored = self.persistence.load_state(chain, &address).await?;
        let current = stored.as_ref().and_then(|state| state.checkpoint);
        let label = format!("{} {}", chain, address);

        let balance = self
            .retry
            .run(&label, || adapter.fetch_balance(&address))
            .await?;
        let batch = self
            .retry
            .run(&label, || adapter.fetch_transactions_since(&address, current))
            .await?;

        let mut report = CycleReport {
            fetched: batch.records.len(),
            ..CycleReport::default()
        };

        let mut candidates = Vec::with_capacity(batch.records.len());
        let mut skipped_seen = 0usize;
        for record in batch.records {
            if current.is_some_and(|c| adapter.checkpoint_of(&record) <= c) {
                report.stale += 1;
                continue;
            }
            if already_seen.contains(record.hash.trim()) {
                skipped_seen += 1;
                continue;
            }
            candidates.push(record);
        }

        if report.stale > 0 {
            warn!(
                chain = %chain,
                address = %address,
                "Adapter returned {} records at or before checkpoint {:?}, dropped",
                report.stale,
                current
            );
        }

        let candidate_hashes: Vec<String> = candidates
            .iter()
            .map(|tx| tx.hash.trim().to_string())
            .filter(|hash| !hash.is_empty())
            .collect();

        let outcome = self
            .persistence
            .persist_batch(chain, &address, candidates)
            .await?;

        let earliest_unpersisted = outcome
            .failed
            .iter()
            .map(|tx| adapter.checkpoint_of(tx))
            .min();
        if let Some(position) = earliest_unpersisted {
            warn!(
                chain = %chain,
                address = %address,
                "{} records failed to persist, holding checkpoint below {}",
                outcome.failed.len(),
                position
            );
        }

        let failed_hashes: HashSet<&str> =
            outcome.failed.iter().map(|tx| tx.hash.as_str()).collect();
        let mut observed = HashSet::new();
        report.observed_hashes = candidate_hashes
            .into_iter()
            .filter(|hash| !failed_hashes.contains(hash.as_str()))
            .filter(|hash| observed.insert(hash.clone()))
            .collect();

        let mut state = stored.unwrap_or_else(|| WalletChainState::new(chain, &address));
        state.balance = balance.balance;
        state.balance_quote = balance.value_in_quote;
        state.last_fetched = Some(Utc::now());
        state.checkpoint = next_checkpoint(current, batch.new_checkpoint, earliest_unpersisted);
        let saved = self.persistence.save_state(&state).await?;

        report.inserted = outcome.inserted.len();
        report.duplicates = outcome.duplicates + skipped_seen;
        report.failed = outcome.failed.len();
        report.checkpoint = saved.checkpoint;

        if !suppress_alerts {
            report.dispatch = self
                .dispatcher
                .dispatch(chain, &address, &outcome.inserted)
                .await;
        }

        if report.inserted > 0 {
            info!(
                chain = %chain,
                address = %address,
                trigger = %trigger,
                "Stored {} new transactions ({} duplicates, {} failed)",
                report.inserted,
                report.duplicates,
                report.failed
            );
        } else {
            debug!(
                chain = %chain,
                address = %address,
                trigger = %trigger,
                "No new transactions ({} fetched)",
                report.fetched
            );
        }

        Ok(report)
    }
}
