//! Engine facade and integration point for all ingestion services.
//!
//! `ActivityEngine` wires the adapters, persistence, monitor registry, notification dispatcher,
//! subscription manager and poll scheduler together and exposes the operations the management
//! layer calls: start and stop monitoring, manual refresh, and read-only queries.
//!
//! Engines are assembled with `ActivityEngineBuilder`. Unset repositories default to the
//! in-memory backends and an unset alert sink defaults to logging.

use super::cycle::IngestionCycle;
use super::progress_tracker::SweepStats;
use super::registry::MonitorRegistry;
use super::retry::RetryPolicy;
use super::scheduler::{PollScheduler, SchedulerHandle, SchedulerSettings};
use super::subscriptions::{SubscriptionManager, SubscriptionSettings};
use super::types::{CycleReport, CycleRequest, CycleTrigger, EngineError};
use crate::adapters::{AdapterError, AdapterSet, ChainAdapter};
use crate::models::{ActiveMonitor, CanonicalTransaction, Chain, WalletChainState};
use crate::notify::{AlertSink, LogAlertSink, NotificationDispatcher};
use crate::store::{
    InMemoryTransactionRepository, InMemoryWalletStateRepository, PersistenceService,
    TransactionRepository, WalletStateRepository,
};

use std::sync::Arc;
use tracing::{debug, info};

/// The chain activity ingestion engine.
pub struct ActivityEngine {
    registry: Arc<MonitorRegistry>,
    cycle: IngestionCycle,
    subscriptions: SubscriptionManager,
    scheduler: PollScheduler,
}

impl ActivityEngine {
    pub fn builder() -> ActivityEngineBuilder {
        ActivityEngineBuilder::new()
    }

    /// Register `address` as actively monitored on `chain`.
    ///
    /// For push-capable chains the subscription is established (or its refcount raised) before
    /// returning. The first fetch is not awaited.
    pub async fn start_monitoring(
        &self,
        address: &str,
        chain: Chain,
        alert_target: Option<String>,
    ) -> Result<ActiveMonitor, EngineError> {
        let adapter = self
            .cycle
            .adapters()
            .get(chain)
            .ok_or(EngineError::NoAdapter(chain))?;
        let address = chain.normalize_address(address);

        adapter
            .validate_address(&address)
            .map_err(|e| match e {
                AdapterError::InvalidAddress(reason) => EngineError::InvalidAddress {
                    chain,
                    address: address.clone(),
                    reason,
                },
                other => EngineError::Adapter(other),
            })?;

        // Subscribe before registering so no poll tick sees the address ahead of priming
        if adapter.supports_push() {
            self.subscriptions.start(chain, &address).await?;
        }
        let requesters = self.registry.add(chain, &address, alert_target.clone());

        info!(
            chain = %chain,
            address = %address,
            "Monitoring started ({} requesters)",
            requesters
        );

        Ok(self
            .registry
            .lookup(chain, &address)
            .unwrap_or(ActiveMonitor {
                address,
                chain,
                alert_target,
            }))
    }

    /// Drop one monitoring request. Returns false if the wallet was not monitored.
    ///
    /// In-flight fetches are not cancelled; the wallet simply leaves future ticks.
    pub async fn stop_monitoring(&self, address: &str, chain: Chain) -> bool {
        let address = chain.normalize_address(address);
        let Some(remaining) = self.registry.remove(chain, &address) else {
            debug!(chain = %chain, address = %address, "Stop requested for unmonitored wallet");
            return false;
        };

        self.subscriptions.stop(chain, &address).await;

        info!(
            chain = %chain,
            address = %address,
            "Monitoring stopped ({} requesters left)",
            remaining
        );
        true
    }

    /// Run one ingestion cycle now, outside the timer cadence.
    pub async fn trigger_manual_refresh(
        &self,
        address: &str,
        chain: Chain,
    ) -> Result<CycleReport, EngineError> {
        self.cycle
            .run(CycleRequest::new(chain, address, CycleTrigger::Manual))
            .await
    }

    pub fn list_active_monitors(&self) -> Vec<ActiveMonitor> {
        self.registry.list()
    }

    pub async fn transactions_for(
        &self,
        address: &str,
        chain: Chain,
    ) -> Result<Vec<CanonicalTransaction>, EngineError> {
        Ok(self
            .cycle
            .persistence()
            .transactions_for(chain, address)
            .await?)
    }

    pub async fn wallet_state(
        &self,
        address: &str,
        chain: Chain,
    ) -> Result<Option<WalletChainState>, EngineError> {
        Ok(self.cycle.persistence().load_state(chain, address).await?)
    }

    /// Run the full resync sweep once, outside its timer.
    pub async fn run_resync_sweep(&self) -> Vec<SweepStats> {
        self.scheduler.run_resync_sweep().await
    }

    /// Start the poll timers and the resync sweep.
    pub fn spawn(&self) -> EngineHandle {
        info!(
            "Starting engine for chains: {}",
            self.cycle
                .adapters()
                .chains()
                .iter()
                .map(|c| c.code())
                .collect::<Vec<_>>()
                .join(", ")
        );
        EngineHandle {
            scheduler: self.scheduler.spawn(),
            subscriptions: self.subscriptions.clone(),
        }
    }
}

/// Running engine; dropping it leaves the tasks running, call `shutdown` to stop them.
pub struct EngineHandle {
    scheduler: SchedulerHandle,
    subscriptions: SubscriptionManager,
}

impl EngineHandle {
    /// Stop all timers and close push subscriptions.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.subscriptions.close_all().await;
        info!("Engine stopped");
    }
}

/// Builder for `ActivityEngine`
pub struct ActivityEngineBuilder {
    adapters: AdapterSet,
    transactions: Option<Arc<dyn TransactionRepository>>,
    wallets: Option<Arc<dyn WalletStateRepository>>,
    sink: Option<Arc<dyn AlertSink>>,
    registry: Option<Arc<MonitorRegistry>>,
    retry: RetryPolicy,
    scheduler: SchedulerSettings,
    subscriptions: SubscriptionSettings,
}

impl Default for ActivityEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityEngineBuilder {
    pub fn new() -> Self {
        Self {
            adapters: AdapterSet::new(),
            transactions: None,
            wallets: None,
            sink: None,
            registry: None,
            retry: RetryPolicy::default(),
            scheduler: SchedulerSettings::default(),
            subscriptions: SubscriptionSettings::default(),
        }
    }

    /// Adds an adapter, replacing any previous one for the same chain
    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapters.insert(adapter);
        self
    }

    pub fn with_transaction_repository(mut self, repo: Arc<dyn TransactionRepository>) -> Self {
        self.transactions = Some(repo);
        self
    }

    pub fn with_wallet_state_repository(mut self, repo: Arc<dyn WalletStateRepository>) -> Self {
        self.wallets = Some(repo);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shares an existing registry instead of creating one
    pub fn with_registry(mut self, registry: Arc<MonitorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_scheduler_settings(mut self, settings: SchedulerSettings) -> Self {
        self.scheduler = settings;
        self
    }

    pub fn with_subscription_settings(mut self, settings: SubscriptionSettings) -> Self {
        self.subscriptions = settings;
        self
    }

    pub fn build(self) -> ActivityEngine {
        let transactions = self
            .transactions
            .unwrap_or_else(|| Arc::new(InMemoryTransactionRepository::new()));
        let wallets = self
            .wallets
            .unwrap_or_else(|| Arc::new(InMemoryWalletStateRepository::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogAlertSink));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MonitorRegistry::new()));

        let persistence = PersistenceService::new(transactions, wallets);
        let dispatcher = NotificationDispatcher::new(registry.clone(), sink);
        let cycle = IngestionCycle::new(self.adapters, persistence, dispatcher, self.retry);
        let subscriptions = SubscriptionManager::new(cycle.clone(), self.subscriptions);
        let scheduler = PollScheduler::new(
            cycle.clone(),
            registry.clone(),
            subscriptions.clone(),
            self.scheduler,
        );

        ActivityEngine {
            registry,
            cycle,
            subscriptions,
            scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, StubAdapter, fast_retry, native_tx};
    use std::time::Duration;

    fn engine(adapter: Arc<StubAdapter>, sink: Arc<RecordingSink>) -> ActivityEngine {
        ActivityEngine::builder()
            .with_adapter(adapter)
            .with_alert_sink(sink)
            .with_retry_policy(fast_retry())
            .build()
    }

    #[tokio::test]
    async fn test_end_to_end_cycle_is_idempotent() {
        let adapter = Arc::new(StubAdapter::new(Chain::Ethereum));
        let sink = Arc::new(RecordingSink::new(10));
        let engine = engine(adapter.clone(), sink.clone());

        let mut record = native_tx(Chain::Ethereum, "W", "0xA", 1_700_000_000);
        record.token = "ETH".to_string();
        record.amount = "1.5".to_string();
        adapter.set_records(vec![record]);

        engine
            .start_monitoring("W", Chain::Ethereum, Some("hook".to_string()))
            .await
            .unwrap();

        let first = engine
            .trigger_manual_refresh("W", Chain::Ethereum)
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(first.dispatch.batches_delivered, 1);
        assert_eq!(first.dispatch.items_delivered, 1);
        assert_eq!(first.checkpoint, Some(1_700_000_000));

        let state = engine.wallet_state("W", Chain::Ethereum).await.unwrap().unwrap();
        assert_eq!(state.checkpoint, Some(1_700_000_000));

        // Replaying the same adapter output stores and alerts nothing
        adapter.ignore_checkpoint();
        let second = engine
            .trigger_manual_refresh("W", Chain::Ethereum)
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert!(second.dispatch.is_empty());

        assert_eq!(sink.batches().len(), 1);
        let stored = engine.transactions_for("w", Chain::Ethereum).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].amount, "1.5");
    }

    #[tokio::test]
    async fn test_stopped_wallet_is_not_alerted() {
        let adapter = Arc::new(StubAdapter::new(Chain::Tron));
        let sink = Arc::new(RecordingSink::new(10));
        let engine = engine(adapter.clone(), sink.clone());

        engine
            .start_monitoring("TW", Chain::Tron, Some("hook".to_string()))
            .await
            .unwrap();
        assert!(engine.stop_monitoring("TW", Chain::Tron).await);
        assert!(!engine.stop_monitoring("TW", Chain::Tron).await);
        assert!(engine.list_active_monitors().is_empty());

        adapter.set_records(vec![native_tx(Chain::Tron, "TW", "h", 10)]);
        let report = engine
            .trigger_manual_refresh("TW", Chain::Tron)
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected_at_registration() {
        let adapter = Arc::new(StubAdapter::new(Chain::Bitcoin));
        let engine = engine(adapter, Arc::new(RecordingSink::new(10)));

        let result = engine
            .start_monitoring("   ", Chain::Bitcoin, Some("hook".to_string()))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidAddress { .. })));
        assert!(engine.list_active_monitors().is_empty());

        let result = engine.start_monitoring("addr", Chain::Litecoin, None).await;
        assert!(matches!(result, Err(EngineError::NoAdapter(Chain::Litecoin))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_monitor_lifecycle_through_engine() {
        let adapter = Arc::new(StubAdapter::new(Chain::Solana).with_push());
        let sink = Arc::new(RecordingSink::new(10));
        let engine = engine(adapter.clone(), sink.clone());

        engine
            .start_monitoring("SolWallet", Chain::Solana, Some("hook".to_string()))
            .await
            .unwrap();
        engine
            .start_monitoring("SolWallet", Chain::Solana, None)
            .await
            .unwrap();
        assert_eq!(adapter.subscribe_count(), 1);
        assert_eq!(engine.list_active_monitors().len(), 1);

        engine.stop_monitoring("SolWallet", Chain::Solana).await;
        assert_eq!(adapter.unsubscribe_count(), 0);
        assert_eq!(
            engine.list_active_monitors()[0].alert_target.as_deref(),
            Some("hook")
        );

        engine.stop_monitoring("SolWallet", Chain::Solana).await;
        assert_eq!(adapter.unsubscribe_count(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_subscriptions() {
        let adapter = Arc::new(StubAdapter::new(Chain::Solana).with_push());
        let engine = engine(adapter.clone(), Arc::new(RecordingSink::new(10)));

        engine
            .start_monitoring("SolWallet", Chain::Solana, None)
            .await
            .unwrap();
        let handle = engine.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.shutdown().await;
        assert_eq!(adapter.unsubscribe_count(), 1);
    }
}
