use std::collections::{HashSet, VecDeque};

/// Default number of identifiers remembered per address
pub const DEFAULT_SEEN_CAPACITY: usize = 1000;

/// Bounded set of already-handled transaction identifiers; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct BoundedSeenSet {
	order: VecDeque<String>,
	members: HashSet<String>,
	capacity: usize,
}

impl BoundedSeenSet {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			order: VecDeque::with_capacity(capacity),
			members: HashSet::with_capacity(capacity),
			capacity,
		}
	}

	pub fn contains(&self, id: &str) -> bool {
		self.members.contains(id)
	}

	/// Record `id`. Returns false if it was already present.
	pub fn insert(&mut self, id: &str) -> bool {
		if self.members.contains(id) {
			return false;
		}
		if self.order.len() >= self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.members.remove(&oldest);
			}
		}
		self.order.push_back(id.to_string());
		self.members.insert(id.to_string());
		true
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	/// Snapshot of the current members
	pub fn snapshot(&self) -> HashSet<String> {
		self.members.clone()
	}
}

impl Default for BoundedSeenSet {
	fn default() -> Self {
		Self::new(DEFAULT_SEEN_CAPACITY)
	}
}
