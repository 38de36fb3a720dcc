//! Per-chain poll timers and the full resync sweep.
//!
//! Every chain gets its own timer task. A tick walks the chain's active wallets one at a time
//! with a fixed delay between them, running the ingestion cycle for each; a wallet failure is
//! logged and the tick moves on. Wallets whose push subscription is live or still being
//! established are left to it unless the chain opts into polling them too.
//!
//! The resync sweep runs on a coarser interval over every known wallet (stored state plus active
//! monitors) so missed events are eventually picked up. It uses the same cycle, so alerts stay
//! gated on the monitor registry.

use super::cycle::IngestionCycle;
use super::progress_tracker::{SweepProgress, SweepStats};
use super::registry::MonitorRegistry;
use super::subscriptions::SubscriptionManager;
use super::types::{CycleRequest, CycleTrigger};
use crate::models::Chain;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Poll cadence for one chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSchedule {
	pub chain: Chain,
	pub interval: Duration,
	/// Poll wallets that already have live push delivery
	pub poll_subscribed: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
	pub chains: Vec<ChainSchedule>,
	pub inter_wallet_delay: Duration,
	pub resync_interval: Duration,
}

impl Default for SchedulerSettings {
	fn default() -> Self {
		Self {
			chains: Chain::ALL
				.iter()
				.map(|chain| ChainSchedule {
					chain: *chain,
					interval: default_poll_interval(*chain),
					poll_subscribed: false,
				})
				.collect(),
			inter_wallet_delay: Duration::from_millis(400),
			resync_interval: Duration::from_secs(30 * 60),
		}
	}
}

/// Default poll interval per chain
pub fn default_poll_interval(chain: Chain) -> Duration {
	match chain {
		Chain::Ethereum => Duration::from_secs(6),
		Chain::Bnb => Duration::from_secs(2),
		Chain::Tron => Duration::from_secs(2),
		Chain::Bitcoin => Duration::from_secs(20),
		Chain::Litecoin => Duration::from_secs(10),
		Chain::Solana => Duration::from_secs(10),
	}
}

/// Handle to the running timer tasks
pub struct SchedulerHandle {
	shutdown: watch::Sender<bool>,
	tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
	/// Stop every timer and wait for the tasks to finish.
	pub async fn shutdown(self) {
		let _ = self.shutdown.send(true);
		for task in self.tasks {
			if let Err(e) = task.await {
				warn!("Scheduler task ended abnormally: {}", e);
			}
		}
		info!("Scheduler stopped");
	}
}

#[derive(Clone)]
pub struct PollScheduler {
	cycle: IngestionCycle,
	registry: Arc<MonitorRegistry>,
	subscriptions: SubscriptionManager,
	settings: SchedulerSettings,
}

impl PollScheduler {
	pub fn new(
		cycle: IngestionCycle,
		registry: Arc<MonitorRegistry>,
		subscriptions: SubscriptionManager,
		settings: SchedulerSettings,
	) -> Self {
		Self {
			cycle,
			registry,
			subscriptions,
			settings,
		}
	}

	pub fn settings(&self) -> &SchedulerSettings {
		&self.settings
	}

	/// Start one timer task per scheduled chain plus the resync sweep.
	pub fn spawn(&self) -> SchedulerHandle {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let mut tasks = Vec::new();

		for schedule in &self.settings.chains {
			if self.cycle.adapters().get(schedule.chain).is_none() {
				warn!("No adapter for {}, not scheduling it", schedule.chain);
				continue;
			}
			let scheduler = self.clone();
			let schedule = schedule.clone();
			let shutdown = shutdown_rx.clone();
			tasks.push(tokio::spawn(async move {
				scheduler.chain_loop(schedule, shutdown).await;
			}));
		}

		let scheduler = self.clone();
		tasks.push(tokio::spawn(async move {
			scheduler.resync_loop(shutdown_rx).await;
		}));

		SchedulerHandle {
			shutdown: shutdown_tx,
			tasks,
		}
	}

	async fn chain_loop(&self, schedule: ChainSchedule, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = tokio::time::interval(schedule.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		info!(
			"Polling {} every {:?}",
			schedule.chain, schedule.interval
		);

		loop {
			tokio::select! {
				_ = ticker.tick() => {}
				_ = shutdown.changed() => break,
			}
			// A cancelled cycle is safe: persistence is idempotent
			tokio::select! {
				_ = self.run_chain_tick(&schedule) => {}
				_ = shutdown.changed() => break,
			}
		}
	}

	async fn resync_loop(&self, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = tokio::time::interval(self.settings.resync_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		// First tick completes immediately; the regular pollers cover startup
		ticker.tick().await;

		loop {
			tokio::select! {
				_ = ticker.tick() => {}
				_ = shutdown.changed() => break,
			}
			info!("Starting full resync sweep");
			tokio::select! {
				_ = self.run_resync_sweep() => {}
				_ = shutdown.changed() => break,
			}
		}
	}

	/// Run one poll tick for a chain over its active wallets.
	pub async fn run_chain_tick(&self, schedule: &ChainSchedule) -> SweepStats {
		let chain = schedule.chain;
		let mut progress = SweepProgress::new(chain, CycleTrigger::Poll);
		let mut first = true;

		for address in self.registry.addresses_for(chain) {
			if !schedule.poll_subscribed && self.subscriptions.is_push_owned(chain, &address) {
				progress.record_skipped();
				continue;
			}

			if !first {
				tokio::time::sleep(self.settings.inter_wallet_delay).await;
			}
			first = false;

			// Stopped while waiting for its turn
			if !self.registry.is_active(chain, &address) {
				continue;
			}

			let request = CycleRequest::new(chain, &address, CycleTrigger::Poll);
			match self.cycle.run(request).await {
				Ok(report) => progress.record_success(&report),
				Err(e) => {
					progress.record_failure();
					warn!(chain = %chain, address = %address, "Poll failed: {}", e);
				}
			}
		}

		progress.log_summary();
		progress.get_stats()
	}

	/// Re-fetch every known wallet on every chain with an adapter, ignoring active gating.
	pub async fn run_resync_sweep(&self) -> Vec<SweepStats> {
		let mut all_stats = Vec::new();

		for chain in self.cycle.adapters().chains() {
			let mut known: BTreeSet<String> = match self.cycle.persistence().known_addresses(chain).await
			{
				Ok(addresses) => addresses.into_iter().collect(),
				Err(e) => {
					warn!(chain = %chain, "Failed to list stored wallets: {}", e);
					BTreeSet::new()
				}
			};
			known.extend(self.registry.addresses_for(chain));

			let mut progress = SweepProgress::new(chain, CycleTrigger::Resync);
			for (index, address) in known.iter().enumerate() {
				if index > 0 {
					tokio::time::sleep(self.settings.inter_wallet_delay).await;
				}
				let request = CycleRequest::new(chain, address, CycleTrigger::Resync);
				match self.cycle.run(request).await {
					Ok(report) => progress.record_success(&report),
					Err(e) => {
						progress.record_failure();
						warn!(chain = %chain, address = %address, "Resync failed: {}", e);
					}
				}
			}

			progress.log_summary();
			all_stats.push(progress.get_stats());
		}

		all_stats
	}
}
