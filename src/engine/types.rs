use crate::adapters::AdapterError;
use crate::models::Chain;
use crate::notify::DispatchSummary;
use crate::store::StoreError;

use std::collections::HashSet;
use std::fmt;

/// Errors surfaced by the engine facade and by a single ingestion cycle
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	#[error("Adapter error: {0}")]
	Adapter(#[from] AdapterError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("No adapter registered for chain {0}")]
	NoAdapter(Chain),

	#[error("Invalid address {address} on {chain}: {reason}")]
	InvalidAddress {
		chain: Chain,
		address: String,
		reason: String,
	},
}

/// What started an ingestion cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
	Poll,
	Resync,
	Manual,
	Subscription,
}

impl fmt::Display for CycleTrigger {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			CycleTrigger::Poll => "poll",
			CycleTrigger::Resync => "resync",
			CycleTrigger::Manual => "manual",
			CycleTrigger::Subscription => "subscription",
		};
		f.write_str(name)
	}
}

/// Input of one fetch, dedup, persist, checkpoint and notify pass
#[derive(Debug, Clone)]
pub struct CycleRequest {
	pub chain: Chain,
	pub address: String,
	pub trigger: CycleTrigger,
	/// Persist without alerting (subscription priming)
	pub suppress_alerts: bool,
	/// Hashes already handled by the caller; matching records are skipped before persistence
	pub already_seen: HashSet<String>,
}

impl CycleRequest {
	pub fn new(chain: Chain, address: &str, trigger: CycleTrigger) -> Self {
		Self {
			chain,
			address: chain.normalize_address(address),
			trigger,
			suppress_alerts: false,
			already_seen: HashSet::new(),
		}
	}
}

/// Outcome of one ingestion cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
	pub fetched: usize,
	pub inserted: usize,
	pub duplicates: usize,
	pub failed: usize,
	/// Records dropped for sitting at or before the supplied checkpoint
	pub stale: usize,
	pub checkpoint: Option<u64>,
	pub dispatch: DispatchSummary,
	/// Hashes handled by this cycle (stored now or already stored)
	pub observed_hashes: Vec<String>,
}
