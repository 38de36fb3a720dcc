//! Fakes shared by the unit tests: a scriptable chain adapter, a recording alert sink and a
//! transaction repository that fails selected inserts.

use crate::adapters::{
	ActivityCallback, AdapterError, AdapterSet, BalanceSnapshot, ChainAdapter, FetchBatch,
	SubscriptionHandle,
};
use crate::engine::{
	CycleReport, CycleRequest, CycleTrigger, IngestionCycle, MonitorRegistry, RetryPolicy,
};
use crate::models::{CanonicalTransaction, Chain, DedupKey, Direction, TxCategory, TxStatus};
use crate::notify::{AlertError, AlertSink, NotificationDispatcher};
use crate::store::{
	InMemoryTransactionRepository, InMemoryWalletStateRepository, InsertOutcome,
	PersistenceService, StoreError, TransactionRepository,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Confirmed native transfer into `wallet`, with the block number mirroring the timestamp.
pub fn native_tx(chain: Chain, wallet: &str, hash: &str, timestamp: u64) -> CanonicalTransaction {
	CanonicalTransaction {
		chain,
		wallet_address: wallet.to_string(),
		hash: hash.to_string(),
		token: chain.native_symbol().to_string(),
		category: TxCategory::Native,
		method: "transfer".to_string(),
		block: timestamp.to_string(),
		timestamp,
		from: "sender".to_string(),
		to: wallet.to_string(),
		direction: Direction::In,
		amount: "1".to_string(),
		amount_quote: None,
		fee: None,
		status: TxStatus::Confirmed,
	}
}

/// Fresh directory under the system temp dir, unique per call
pub fn temp_data_dir(label: &str) -> PathBuf {
	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos())
		.unwrap_or_default();
	let dir = std::env::temp_dir().join(format!(
		"chain-activity-sync-{}-{}-{}",
		label,
		std::process::id(),
		nanos
	));
	std::fs::create_dir_all(&dir).unwrap();
	dir
}

/// Retry policy with millisecond delays
pub fn fast_retry() -> RetryPolicy {
	RetryPolicy {
		max_attempts: 3,
		base_delay: Duration::from_millis(10),
		max_delay: Duration::from_millis(100),
		jitter: 0.0,
	}
}

#[derive(Default)]
struct StubState {
	records: Vec<CanonicalTransaction>,
	ignore_checkpoint: bool,
	checkpoints_seen: Vec<Option<u64>>,
	fail_next: VecDeque<AdapterError>,
	failing_addresses: HashMap<String, AdapterError>,
	subscribe_error: Option<AdapterError>,
	subscribe_delay: Duration,
	fetch_delay: Duration,
	callbacks: HashMap<u64, ActivityCallback>,
	next_handle: u64,
}

/// Scriptable adapter serving an in-memory record list
pub struct StubAdapter {
	chain: Chain,
	push: bool,
	state: Mutex<StubState>,
	fetch_calls: AtomicUsize,
	subscribe_calls: AtomicUsize,
	unsubscribe_calls: AtomicUsize,
}

impl StubAdapter {
	pub fn new(chain: Chain) -> Self {
		Self {
			chain,
			push: false,
			state: Mutex::new(StubState::default()),
			fetch_calls: AtomicUsize::new(0),
			subscribe_calls: AtomicUsize::new(0),
			unsubscribe_calls: AtomicUsize::new(0),
		}
	}

	pub fn with_push(mut self) -> Self {
		self.push = true;
		self
	}

	pub fn set_records(&self, records: Vec<CanonicalTransaction>) {
		lock(&self.state).records = records;
	}

	pub fn push_record(&self, record: CanonicalTransaction) {
		lock(&self.state).records.push(record);
	}

	/// Fail the next fetch with `error`. Queued errors are consumed in order.
	pub fn fail_next(&self, error: AdapterError) {
		lock(&self.state).fail_next.push_back(error);
	}

	/// Fail every fetch for `address`.
	pub fn fail_address(&self, address: &str, error: AdapterError) {
		let key = self.chain.normalize_address(address);
		lock(&self.state).failing_addresses.insert(key, error);
	}

	/// Return every record on each fetch, as a misbehaving API would.
	pub fn ignore_checkpoint(&self) {
		lock(&self.state).ignore_checkpoint = true;
	}

	pub fn fail_subscribe(&self, error: AdapterError) {
		lock(&self.state).subscribe_error = Some(error);
	}

	pub fn set_subscribe_delay(&self, delay: Duration) {
		lock(&self.state).subscribe_delay = delay;
	}

	/// Delay every fetch. Records are read when the fetch starts, as a slow RPC would.
	pub fn set_fetch_delay(&self, delay: Duration) {
		lock(&self.state).fetch_delay = delay;
	}

	pub fn fetch_calls(&self) -> usize {
		self.fetch_calls.load(Ordering::SeqCst)
	}

	/// Checkpoint argument of every fetch so far
	pub fn checkpoints_seen(&self) -> Vec<Option<u64>> {
		lock(&self.state).checkpoints_seen.clone()
	}

	pub fn subscribe_count(&self) -> usize {
		self.subscribe_calls.load(Ordering::SeqCst)
	}

	pub fn unsubscribe_count(&self) -> usize {
		self.unsubscribe_calls.load(Ordering::SeqCst)
	}

	/// Invoke every live subscription callback once.
	pub fn fire_activity(&self) {
		let callbacks: Vec<ActivityCallback> =
			lock(&self.state).callbacks.values().cloned().collect();
		for callback in callbacks {
			callback();
		}
	}

	fn serve_fetch(
		&self,
		state: &mut StubState,
		wallet: &str,
		checkpoint: Option<u64>,
	) -> Result<FetchBatch, AdapterError> {
		if let Some(error) = state.fail_next.pop_front() {
			return Err(error);
		}
		if let Some(error) = state.failing_addresses.get(wallet) {
			return Err(error.clone());
		}

		let records: Vec<CanonicalTransaction> = state
			.records
			.iter()
			.filter(|tx| self.chain.normalize_address(&tx.wallet_address) == wallet)
			.filter(|tx| state.ignore_checkpoint || checkpoint.is_none_or(|c| tx.timestamp > c))
			.cloned()
			.collect();
		let new_checkpoint = records.iter().map(|tx| tx.timestamp).max();

		Ok(FetchBatch {
			records,
			new_checkpoint,
		})
	}
}

#[async_trait::async_trait]
impl ChainAdapter for StubAdapter {
	fn chain(&self) -> Chain {
		self.chain
	}

	async fn fetch_balance(&self, _address: &str) -> Result<BalanceSnapshot, AdapterError> {
		Ok(BalanceSnapshot {
			balance: "0".to_string(),
			value_in_quote: None,
		})
	}

	async fn fetch_transactions_since(
		&self,
		address: &str,
		checkpoint: Option<u64>,
	) -> Result<FetchBatch, AdapterError> {
		self.fetch_calls.fetch_add(1, Ordering::SeqCst);
		let wallet = self.chain.normalize_address(address);
		let (result, delay) = {
			let mut state = lock(&self.state);
			state.checkpoints_seen.push(checkpoint);
			(self.serve_fetch(&mut state, &wallet, checkpoint), state.fetch_delay)
		};
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		result
	}

	fn supports_push(&self) -> bool {
		self.push
	}

	async fn subscribe(
		&self,
		_address: &str,
		on_activity: ActivityCallback,
	) -> Result<SubscriptionHandle, AdapterError> {
		self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
		if !self.push {
			return Err(AdapterError::Unsupported("push subscription"));
		}

		let (delay, error) = {
			let state = lock(&self.state);
			(state.subscribe_delay, state.subscribe_error.clone())
		};
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		if let Some(error) = error {
			return Err(error);
		}

		let mut state = lock(&self.state);
		state.next_handle += 1;
		let id = state.next_handle;
		state.callbacks.insert(id, on_activity);
		Ok(SubscriptionHandle(id))
	}

	async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), AdapterError> {
		self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
		lock(&self.state).callbacks.remove(&handle.0);
		Ok(())
	}
}

/// Alert sink that records successful deliveries
pub struct RecordingSink {
	max_items: usize,
	calls: AtomicUsize,
	failing_calls: Mutex<HashSet<usize>>,
	batches: Mutex<Vec<(String, Vec<CanonicalTransaction>)>>,
}

impl RecordingSink {
	pub fn new(max_items: usize) -> Self {
		Self {
			max_items,
			calls: AtomicUsize::new(0),
			failing_calls: Mutex::new(HashSet::new()),
			batches: Mutex::new(Vec::new()),
		}
	}

	/// Reject the `n`th delivery, counting from zero.
	pub fn fail_call(&self, n: usize) {
		lock(&self.failing_calls).insert(n);
	}

	/// Delivered (target, batch) pairs in order
	pub fn batches(&self) -> Vec<(String, Vec<CanonicalTransaction>)> {
		lock(&self.batches).clone()
	}
}

#[async_trait::async_trait]
impl AlertSink for RecordingSink {
	fn max_items_per_message(&self) -> usize {
		self.max_items
	}

	async fn deliver(
		&self,
		target: &str,
		batch: &[CanonicalTransaction],
	) -> Result<(), AlertError> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);
		if lock(&self.failing_calls).contains(&call) {
			return Err(AlertError::Rejected {
				status: 500,
				body: "injected failure".to_string(),
			});
		}
		lock(&self.batches).push((target.to_string(), batch.to_vec()));
		Ok(())
	}

	fn name(&self) -> &'static str {
		"recording"
	}
}

/// In-memory transaction repository that reports selected hashes as failed inserts
#[derive(Default)]
pub struct FlakyTransactionRepository {
	inner: InMemoryTransactionRepository,
	failing: Mutex<HashSet<String>>,
}

impl FlakyTransactionRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_hash(&self, hash: &str) {
		lock(&self.failing).insert(hash.to_string());
	}

	pub fn clear_failures(&self) {
		lock(&self.failing).clear();
	}
}

#[async_trait::async_trait]
impl TransactionRepository for FlakyTransactionRepository {
	async fn find_existing(
		&self,
		chain: Chain,
		keys: &[DedupKey],
	) -> Result<HashSet<DedupKey>, StoreError> {
		self.inner.find_existing(chain, keys).await
	}

	async fn insert_unordered(
		&self,
		records: &[CanonicalTransaction],
	) -> Result<Vec<InsertOutcome>, StoreError> {
		let failing = lock(&self.failing).clone();
		let mut outcomes = Vec::with_capacity(records.len());
		for record in records {
			if failing.contains(record.hash.trim()) {
				outcomes.push(InsertOutcome::Failed("injected failure".to_string()));
				continue;
			}
			let mut single = self.inner.insert_unordered(std::slice::from_ref(record)).await?;
			outcomes.push(
				single
					.pop()
					.unwrap_or_else(|| InsertOutcome::Failed("no outcome".to_string())),
			);
		}
		Ok(outcomes)
	}

	async fn list_for_wallet(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Vec<CanonicalTransaction>, StoreError> {
		self.inner.list_for_wallet(chain, address).await
	}
}

/// One adapter wired to in-memory stores, a registry and a recording sink
pub struct TestRig {
	pub chain: Chain,
	pub adapter: Arc<StubAdapter>,
	pub registry: Arc<MonitorRegistry>,
	pub sink: Arc<RecordingSink>,
	pub persistence: PersistenceService,
	pub cycle: IngestionCycle,
}

impl TestRig {
	pub fn new(chain: Chain, push: bool) -> Self {
		let adapter = StubAdapter::new(chain);
		let adapter = Arc::new(if push { adapter.with_push() } else { adapter });
		let mut adapters = AdapterSet::new();
		adapters.insert(adapter.clone());

		let registry = Arc::new(MonitorRegistry::new());
		let sink = Arc::new(RecordingSink::new(10));
		let persistence = PersistenceService::new(
			Arc::new(InMemoryTransactionRepository::new()),
			Arc::new(InMemoryWalletStateRepository::new()),
		);
		let dispatcher = NotificationDispatcher::new(registry.clone(), sink.clone());
		let cycle = IngestionCycle::new(adapters, persistence.clone(), dispatcher, fast_retry());

		Self {
			chain,
			adapter,
			registry,
			sink,
			persistence,
			cycle,
		}
	}

	pub async fn stored(&self, chain: Chain, address: &str) -> Vec<CanonicalTransaction> {
		self.persistence.transactions_for(chain, address).await.unwrap()
	}

	pub async fn run_cycle(&self, chain: Chain, address: &str) -> CycleReport {
		self.cycle
			.run(CycleRequest::new(chain, address, CycleTrigger::Manual))
			.await
			.unwrap()
	}
}
