//! Monitor registry.
//!
//! The registry is the only record of which wallets are actively monitored. It decides whether
//! new transactions produce alerts and which wallets the poll scheduler visits. Registrations are
//! counted per (chain, address) so independent requesters can share one wallet.

use crate::models::{ActiveMonitor, Chain};

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct MonitorEntry {
	requesters: usize,
	alert_target: Option<String>,
}

/// Process-local registry of active monitors
#[derive(Debug, Default)]
pub struct MonitorRegistry {
	entries: RwLock<HashMap<(Chain, String), MonitorEntry>>,
}

impl MonitorRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	fn read(&self) -> RwLockReadGuard<'_, HashMap<(Chain, String), MonitorEntry>> {
		self.entries.read().unwrap_or_else(|e| e.into_inner())
	}

	fn write(&self) -> RwLockWriteGuard<'_, HashMap<(Chain, String), MonitorEntry>> {
		self.entries.write().unwrap_or_else(|e| e.into_inner())
	}

	/// Register one requester and return the new requester count.
	///
	/// A supplied alert target replaces the current one; `None` keeps it.
	pub fn add(&self, chain: Chain, address: &str, alert_target: Option<String>) -> usize {
		let key = (chain, chain.normalize_address(address));
		let mut entries = self.write();
		let entry = entries.entry(key).or_insert(MonitorEntry {
			requesters: 0,
			alert_target: None,
		});
		entry.requesters += 1;
		if alert_target.is_some() {
			entry.alert_target = alert_target;
		}
		entry.requesters
	}

	/// Drop one requester and return the remaining count, or `None` if the wallet was not
	/// registered. The monitor disappears when the count reaches zero.
	pub fn remove(&self, chain: Chain, address: &str) -> Option<usize> {
		let key = (chain, chain.normalize_address(address));
		let mut entries = self.write();
		let entry = entries.get_mut(&key)?;
		entry.requesters = entry.requesters.saturating_sub(1);
		let remaining = entry.requesters;
		if remaining == 0 {
			entries.remove(&key);
		}
		Some(remaining)
	}

	pub fn lookup(&self, chain: Chain, address: &str) -> Option<ActiveMonitor> {
		let address = chain.normalize_address(address);
		self.read()
			.get(&(chain, address.clone()))
			.map(|entry| ActiveMonitor {
				address,
				chain,
				alert_target: entry.alert_target.clone(),
			})
	}

	pub fn is_active(&self, chain: Chain, address: &str) -> bool {
		self.read()
			.contains_key(&(chain, chain.normalize_address(address)))
	}

	/// Snapshot of all registrations, ordered by chain then address
	pub fn list(&self) -> Vec<ActiveMonitor> {
		let mut monitors: Vec<ActiveMonitor> = self
			.read()
			.iter()
			.map(|((chain, address), entry)| ActiveMonitor {
				address: address.clone(),
				chain: *chain,
				alert_target: entry.alert_target.clone(),
			})
			.collect();
		monitors.sort_by(|a, b| (a.chain, &a.address).cmp(&(b.chain, &b.address)));
		monitors
	}

	/// Active addresses on one chain, sorted
	pub fn addresses_for(&self, chain: Chain) -> Vec<String> {
		let mut addresses: Vec<String> = self
			.read()
			.keys()
			.filter(|(c, _)| *c == chain)
			.map(|(_, address)| address.clone())
			.collect();
		addresses.sort();
		addresses
	}
}
