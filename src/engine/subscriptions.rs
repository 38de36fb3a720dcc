//! Subscription lifecycle for push-capable chains.
//!
//! Subscriptions are keyed by (chain, address) and reference counted: the adapter subscription is
//! opened on the first start and closed on the last stop. Raw activity callbacks only re-arm a
//! per-address debounce timer; when it fires, the standard ingestion cycle reconciles the wallet,
//! seeded with a bounded set of hashes already handled for that address.
//!
//! The first reconciliation after subscribing primes the address: it persists what is there and
//! fills the seen set, but sends no alerts. Reconciliations of one address run one at a time, so
//! activity arriving while priming is still running is reconciled afterwards, with alerts. From the
//! first start until the subscription either goes live or falls back, the address belongs to the
//! push path and poll ticks leave it alone.
//!
//! Every entry carries an epoch so that late work from a
//! previous incarnation of the same address (a subscribe that returns after the last stop, a
//! reconciliation that finishes after it) never touches the current one.

use super::cycle::IngestionCycle;
use super::debounce::DebounceTimers;
use super::seen_set::{BoundedSeenSet, DEFAULT_SEEN_CAPACITY};
use super::types::{CycleRequest, CycleTrigger, EngineError};
use crate::adapters::{ActivityCallback, AdapterError, SubscriptionHandle};
use crate::models::Chain;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

type SubscriptionKey = (Chain, String);

#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub debounce: Duration,
    pub seen_capacity: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }
}

struct SubscriptionEntry {
    refcount: usize,
    handle: Option<SubscriptionHandle>,
    /// Adapter subscribe call in flight
    subscribing: bool,
    seen: BoundedSeenSet,
    primed: bool,
    epoch: u64,
    /// Held for the duration of one reconciliation
    reconcile_turn: Arc<tokio::sync::Mutex<()>>,
}

struct Inner {
    cycle: IngestionCycle,
    settings: SubscriptionSettings,
    entries: Mutex<HashMap<SubscriptionKey, SubscriptionEntry>>,
    timers: DebounceTimers<SubscriptionKey>,
    next_epoch: AtomicU64,
}

/// Refcounted push subscriptions with debounced reconciliation
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(cycle: IngestionCycle, settings: SubscriptionSettings) -> Self {
        let timers = DebounceTimers::new(settings.debounce);
        Self {
            inner: Arc::new(Inner {
                cycle,
                settings,
                entries: Mutex::new(HashMap::new()),
                timers,
                next_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Add a requester for `address`. Subscribes on the first one.
    ///
    /// Subscription failures other than an invalid address fall back to polling and still
    /// return `Ok`. Priming runs in the background.
    pub async fn start(&self, chain: Chain, address: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        let key = (chain, chain.normalize_address(address));
        let adapter = inner
            .cycle
            .adapters()
            .get(chain)
            .ok_or(EngineError::NoAdapter(chain))?;

        let epoch = {
            let mut entries = inner.lock_entries();
            if let Some(entry) = entries.get_mut(&key) {
                entry.refcount += 1;
                debug!(
                    chain = %chain,
                    address = %key.1,
                    "Subscription refcount now {}",
                    entry.refcount
                );
                return Ok(());
            }
            let epoch = inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            entries.insert(
                key.clone(),
                SubscriptionEntry {
                    refcount: 1,
                    handle: None,
                    subscribing: adapter.supports_push(),
                    seen: BoundedSeenSet::new(inner.settings.seen_capacity),
                    primed: false,
                    epoch,
                    reconcile_turn: Arc::new(tokio::sync::Mutex::new(())),
                },
            );
            epoch
        };

        if !adapter.supports_push() {
            debug!(chain = %chain, address = %key.1, "Adapter has no push support, polling only");
            return Ok(());
        }

        let callback = activity_callback(Arc::downgrade(inner), key.clone(), epoch);
        match adapter.subscribe(&key.1, callback).await {
            Ok(handle) => {
                if !inner.finish_subscribing(&key, epoch, Some(handle)) {
                    info!(
                        chain = %chain,
                        address = %key.1,
                        "Monitoring stopped while subscribing, closing subscription"
                    );
                    if let Err(e) = adapter.unsubscribe(handle).await {
                        warn!("Failed to close subscription for {}: {}", key.1, e);
                    }
                    return Ok(());
                }

                info!(chain = %chain, address = %key.1, "Push subscription established");
                inner.spawn_reconcile(key, epoch);
            }
            Err(AdapterError::InvalidAddress(reason)) => {
                inner.release(&key, epoch);
                return Err(EngineError::InvalidAddress {
                    chain,
                    address: key.1,
                    reason,
                });
            }
            Err(AdapterError::Unsupported(what)) => {
                inner.finish_subscribing(&key, epoch, None);
                debug!(
                    chain = %chain,
                    address = %key.1,
                    "Adapter does not support {}, polling only",
                    what
                );
            }
            Err(e) => {
                inner.finish_subscribing(&key, epoch, None);
                warn!(
                    chain = %chain,
                    address = %key.1,
                    "Subscribe failed, falling back to polling: {}",
                    e
                );
            }
        }

        Ok(())
    }

    /// Remove a requester. Tears down on the last one; unknown addresses are a no-op.
    ///
    /// Returns whether the subscription entry was removed.
    pub async fn stop(&self, chain: Chain, address: &str) -> bool {
        let inner = &self.inner;
        let key = (chain, chain.normalize_address(address));

        let removed = {
            let mut entries = inner.lock_entries();
            let Some(entry) = entries.get_mut(&key) else {
                return false;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                debug!(
                    chain = %chain,
                    address = %key.1,
                    "Subscription refcount now {}",
                    entry.refcount
                );
                return false;
            }
            entries.remove(&key)
        };

        inner.timers.cancel(&key);

        if let Some(handle) = removed.and_then(|entry| entry.handle) {
            if let Some(adapter) = inner.cycle.adapters().get(chain) {
                match adapter.unsubscribe(handle).await {
                    Ok(()) => info!(chain = %chain, address = %key.1, "Push subscription closed"),
                    Err(e) => warn!("Failed to close subscription for {}: {}", key.1, e),
                }
            }
        }
        true
    }

    /// Whether push delivery is live for the address
    pub fn is_push_active(&self, chain: Chain, address: &str) -> bool {
        let key = (chain, chain.normalize_address(address));
        self.inner
            .lock_entries()
            .get(&key)
            .is_some_and(|entry| entry.handle.is_some())
    }

    /// Whether poll ticks should leave the address to the push path: the subscription is live
    /// or still being established.
    pub fn is_push_owned(&self, chain: Chain, address: &str) -> bool {
        let key = (chain, chain.normalize_address(address));
        self.inner
            .lock_entries()
            .get(&key)
            .is_some_and(|entry| entry.handle.is_some() || entry.subscribing)
    }

    /// Close every subscription regardless of refcount. Used on engine shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<(SubscriptionKey, SubscriptionEntry)> =
            self.inner.lock_entries().drain().collect();

        for (key, entry) in drained {
            self.inner.timers.cancel(&key);
            let (Some(handle), Some(adapter)) =
                (entry.handle, self.inner.cycle.adapters().get(key.0))
            else {
                continue;
            };
            if let Err(e) = adapter.unsubscribe(handle).await {
                warn!("Failed to close subscription for {}: {}", key.1, e);
            }
        }
    }

    pub fn refcount(&self, chain: Chain, address: &str) -> usize {
        let key = (chain, chain.normalize_address(address));
        self.inner
            .lock_entries()
            .get(&key)
            .map(|entry| entry.refcount)
            .unwrap_or(0)
    }
}

fn activity_callback(inner: Weak<Inner>, key: SubscriptionKey, epoch: u64) -> ActivityCallback {
    Arc::new(move || {
        if let Some(inner) = inner.upgrade() {
            inner.on_activity(key.clone(), epoch);
        }
    })
}

impl Inner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, SubscriptionEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, key: &SubscriptionKey, epoch: u64) -> bool {
        self.lock_entries()
            .get(key)
            .is_some_and(|entry| entry.epoch == epoch)
    }

    /// Record the result of a subscribe call. Returns false if the entry was stopped meanwhile.
    fn finish_subscribing(
        &self,
        key: &SubscriptionKey,
        epoch: u64,
        handle: Option<SubscriptionHandle>,
    ) -> bool {
        let mut entries = self.lock_entries();
        match entries.get_mut(key) {
            Some(entry) if entry.epoch == epoch => {
                entry.subscribing = false;
                entry.handle = handle;
                true
            }
            _ => false,
        }
    }

    /// Undo a start that could not subscribe
    fn release(&self, key: &SubscriptionKey, epoch: u64) {
        let mut entries = self.lock_entries();
        if let Some(entry) = entries.get_mut(key) {
            if entry.epoch == epoch {
                entry.refcount = entry.refcount.saturating_sub(1);
                if entry.refcount == 0 {
                    entries.remove(key);
                }
            }
        }
    }

    /// Raw activity only re-arms the debounce timer
    fn on_activity(self: &Arc<Self>, key: SubscriptionKey, epoch: u64) {
        if !self.is_current(&key, epoch) {
            return;
        }
        let weak = Arc::downgrade(self);
        let timer_key = key.clone();
        self.timers.arm(timer_key, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile(key, epoch).await;
            }
        });
    }

    fn spawn_reconcile(self: &Arc<Self>, key: SubscriptionKey, epoch: u64) {
        let inner = self.clone();
        tokio::spawn(async move {
            inner.reconcile(key, epoch).await;
        });
    }

    async fn reconcile(&self, key: SubscriptionKey, epoch: u64) {
        let turn = {
            let entries = self.lock_entries();
            match entries.get(&key) {
                Some(entry) if entry.epoch == epoch => entry.reconcile_turn.clone(),
                _ => {
                    debug!("Skipping reconciliation for {}, no longer subscribed", key.1);
                    return;
                }
            }
        };
        let _turn = turn.lock().await;

        // Priming state is read only once the previous reconciliation has finished
        let (already_seen, priming) = {
            let entries = self.lock_entries();
            match entries.get(&key) {
                Some(entry) if entry.epoch == epoch => (entry.seen.snapshot(), !entry.primed),
                _ => {
                    debug!("Skipping reconciliation for {}, no longer subscribed", key.1);
                    return;
                }
            }
        };

        let (chain, address) = (key.0, key.1.clone());
        let mut request = CycleRequest::new(chain, &address, CycleTrigger::Subscription);
        request.suppress_alerts = priming;
        request.already_seen = already_seen;

        match self.cycle.run(request).await {
            Ok(report) => {
                let mut entries = self.lock_entries();
                if let Some(entry) = entries.get_mut(&key).filter(|entry| entry.epoch == epoch) {
                    for hash in &report.observed_hashes {
                        entry.seen.insert(hash);
                    }
                    if priming && !entry.primed {
                        entry.primed = true;
                        info!(
                            chain = %chain,
                            address = %address,
                            "Primed subscription with {} existing transactions",
                            report.observed_hashes.len()
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    chain = %chain,
                    address = %address,
                    "Reconciliation failed{}: {}",
                    if priming { " during priming" } else { "" },
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestRig, native_tx};

    const ADDR: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

    fn manager(rig: &TestRig) -> SubscriptionManager {
        SubscriptionManager::new(rig.cycle.clone(), SubscriptionSettings::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_is_refcounted() {
        let rig = TestRig::new(Chain::Solana, true);
        let subs = manager(&rig);

        subs.start(Chain::Solana, ADDR).await.unwrap();
        subs.start(Chain::Solana, ADDR).await.unwrap();
        assert_eq!(rig.adapter.subscribe_count(), 1);
        assert_eq!(subs.refcount(Chain::Solana, ADDR), 2);

        assert!(!subs.stop(Chain::Solana, ADDR).await);
        assert!(subs.is_push_active(Chain::Solana, ADDR));
        assert_eq!(rig.adapter.unsubscribe_count(), 0);

        assert!(subs.stop(Chain::Solana, ADDR).await);
        assert_eq!(rig.adapter.unsubscribe_count(), 1);

        assert!(!subs.stop(Chain::Solana, ADDR).await);
        assert_eq!(rig.adapter.unsubscribe_count(), 1);
        assert!(!subs.is_push_active(Chain::Solana, ADDR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_burst_triggers_one_reconciliation() {
        let rig = TestRig::new(Chain::Solana, true);
        let subs = manager(&rig);
        subs.start(Chain::Solana, ADDR).await.unwrap();
        settle().await;
        let baseline = rig.adapter.fetch_calls();
        assert_eq!(baseline, 1);

        for _ in 0..5 {
            rig.adapter.fire_activity();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        settle().await;

        assert_eq!(rig.adapter.fetch_calls(), baseline + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priming_persists_without_alerts() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.registry
            .add(Chain::Solana, ADDR, Some("hook".to_string()));
        rig.adapter.set_records(vec![
            native_tx(Chain::Solana, ADDR, "old1", 10),
            native_tx(Chain::Solana, ADDR, "old2", 11),
        ]);

        let subs = manager(&rig);
        subs.start(Chain::Solana, ADDR).await.unwrap();
        settle().await;

        assert!(rig.sink.batches().is_empty());
        assert_eq!(rig.stored(Chain::Solana, ADDR).await.len(), 2);

        rig.adapter.push_record(native_tx(Chain::Solana, ADDR, "new", 12));
        rig.adapter.fire_activity();
        settle().await;

        let batches = rig.sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 1);
        assert_eq!(batches[0].1[0].hash, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_priming_is_retried_on_next_reconciliation() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.registry
            .add(Chain::Solana, ADDR, Some("hook".to_string()));
        rig.adapter
            .set_records(vec![native_tx(Chain::Solana, ADDR, "old", 10)]);
        rig.adapter
            .fail_next(AdapterError::Unavailable("down".to_string()));

        let subs = manager(&rig);
        subs.start(Chain::Solana, ADDR).await.unwrap();
        settle().await;
        assert!(rig.stored(Chain::Solana, ADDR).await.is_empty());

        rig.adapter.fire_activity();
        settle().await;

        // Still priming: stored but not alerted
        assert_eq!(rig.stored(Chain::Solana, ADDR).await.len(), 1);
        assert!(rig.sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_subscribe_tears_down() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.adapter.set_subscribe_delay(Duration::from_secs(1));
        let subs = manager(&rig);

        let starter = subs.clone();
        let pending = tokio::spawn(async move { starter.start(Chain::Solana, ADDR).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(subs.stop(Chain::Solana, ADDR).await);
        pending.await.unwrap().unwrap();

        assert_eq!(rig.adapter.subscribe_count(), 1);
        assert_eq!(rig.adapter.unsubscribe_count(), 1);
        assert!(!subs.is_push_active(Chain::Solana, ADDR));
        settle().await;
        assert_eq!(rig.adapter.fetch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_push_falls_back_to_polling() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.adapter
            .fail_subscribe(AdapterError::Unsupported("push subscription"));
        let subs = manager(&rig);

        subs.start(Chain::Solana, ADDR).await.unwrap();
        assert!(!subs.is_push_active(Chain::Solana, ADDR));
        assert!(!subs.is_push_owned(Chain::Solana, ADDR));
        assert_eq!(subs.refcount(Chain::Solana, ADDR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_address_on_subscribe_rolls_back() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.adapter
            .fail_subscribe(AdapterError::InvalidAddress("bad".to_string()));
        let subs = manager(&rig);

        let result = subs.start(Chain::Solana, ADDR).await;
        assert!(matches!(result, Err(EngineError::InvalidAddress { .. })));
        assert_eq!(subs.refcount(Chain::Solana, ADDR), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_during_priming_is_alerted() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.registry
            .add(Chain::Solana, ADDR, Some("hook".to_string()));
        rig.adapter
            .set_records(vec![native_tx(Chain::Solana, ADDR, "old", 10)]);
        rig.adapter.set_fetch_delay(Duration::from_secs(1));

        let subs = manager(&rig);
        subs.start(Chain::Solana, ADDR).await.unwrap();

        // Priming is still waiting on its fetch when new activity lands
        tokio::time::sleep(Duration::from_millis(200)).await;
        rig.adapter
            .push_record(native_tx(Chain::Solana, ADDR, "new", 12));
        rig.adapter.fire_activity();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(rig.adapter.fetch_calls(), 2);
        assert_eq!(rig.stored(Chain::Solana, ADDR).await.len(), 2);
        let batches = rig.sink.batches();
        assert_eq!(batches.len(), 1);
        let alerted: Vec<&str> = batches[0].1.iter().map(|tx| tx.hash.as_str()).collect();
        assert_eq!(alerted, vec!["new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconciliation_lets_it_finish_without_rearming() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.adapter.set_fetch_delay(Duration::from_secs(1));
        let subs = manager(&rig);
        let key = (Chain::Solana, ADDR.to_string());

        subs.start(Chain::Solana, ADDR).await.unwrap();
        settle().await;
        assert_eq!(rig.adapter.fetch_calls(), 1);

        rig.adapter
            .push_record(native_tx(Chain::Solana, ADDR, "late", 20));
        rig.adapter.fire_activity();
        // Debounce has fired and the reconciliation is inside its fetch
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(rig.adapter.fetch_calls(), 2);

        assert!(subs.stop(Chain::Solana, ADDR).await);
        assert_eq!(rig.adapter.unsubscribe_count(), 1);
        settle().await;

        // The in-flight cycle completed
        assert_eq!(rig.stored(Chain::Solana, ADDR).await.len(), 1);
        assert_eq!(rig.adapter.subscribe_count(), 1);
        assert!(!subs.inner.timers.is_pending(&key));
        assert_eq!(subs.refcount(Chain::Solana, ADDR), 0);

        // A callback from the closed subscription is ignored
        let stale = activity_callback(Arc::downgrade(&subs.inner), key.clone(), 1);
        stale();
        rig.adapter.fire_activity();
        assert!(!subs.inner.timers.is_pending(&key));
        settle().await;
        assert_eq!(rig.adapter.fetch_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_is_push_owned_while_subscribing() {
        let rig = TestRig::new(Chain::Solana, true);
        rig.adapter.set_subscribe_delay(Duration::from_secs(1));
        let subs = manager(&rig);

        let starter = subs.clone();
        let pending = tokio::spawn(async move { starter.start(Chain::Solana, ADDR).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!subs.is_push_active(Chain::Solana, ADDR));
        assert!(subs.is_push_owned(Chain::Solana, ADDR));

        pending.await.unwrap().unwrap();
        assert!(subs.is_push_active(Chain::Solana, ADDR));
        assert!(subs.is_push_owned(Chain::Solana, ADDR));
    }
}
