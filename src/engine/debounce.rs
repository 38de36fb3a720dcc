//! Single-slot rearmable timers keyed by address.
//!
//! Arming a key cancels any pending timer for it and starts a new one, so a burst of events
//! within the window fires the action once, after the last event.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

type Slots<K> = HashMap<K, (u64, JoinHandle<()>)>;

pub struct DebounceTimers<K> {
	window: Duration,
	slots: Arc<Mutex<Slots<K>>>,
	next_generation: Arc<AtomicU64>,
}

impl<K> Clone for DebounceTimers<K> {
	fn clone(&self) -> Self {
		Self {
			window: self.window,
			slots: self.slots.clone(),
			next_generation: self.next_generation.clone(),
		}
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K> DebounceTimers<K>
where
	K: Eq + Hash + Clone + Send + 'static,
{
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			slots: Arc::new(Mutex::new(HashMap::new())),
			next_generation: Arc::new(AtomicU64::new(0)),
		}
	}

	/// (Re)start the timer for `key`. `action` runs once the window elapses without another arm.
	///
	/// Must be called from within a tokio runtime.
	pub fn arm<F, Fut>(&self, key: K, action: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

		let slots = self.slots.clone();
		let window = self.window;
		let slot_key = key.clone();

		// Hold the slot lock across spawn so the task cannot observe a stale slot.
		let mut guard = lock(&self.slots);
		let task = tokio::spawn(async move {
			tokio::time::sleep(window).await;
			let still_current = {
				let mut slots = lock(&slots);
				match slots.get(&slot_key) {
					Some((current, _)) if *current == generation => {
						slots.remove(&slot_key);
						true
					}
					_ => false,
				}
			};
			if still_current {
				action().await;
			}
		});

		if let Some((_, previous)) = guard.insert(key, (generation, task)) {
			previous.abort();
		}
	}

	/// Cancel the pending timer for `key`, if any. Returns whether one was pending.
	pub fn cancel(&self, key: &K) -> bool {
		match lock(&self.slots).remove(key) {
			Some((_, task)) => {
				task.abort();
				true
			}
			None => false,
		}
	}

	pub fn is_pending(&self, key: &K) -> bool {
		lock(&self.slots).contains_key(key)
	}
}
