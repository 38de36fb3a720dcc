use crate::models::CanonicalTransaction;

/// Errors raised by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(String),

	#[error("Storage backend error: {0}")]
	Backend(String),
}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Serialization(e.to_string())
	}
}

/// Result of inserting one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
	Inserted,
	/// Key already present, usually a lost race with another writer
	Duplicate,
	Failed(String),
}

/// Outcome of persisting one candidate batch
#[derive(Debug, Clone, Default)]
pub struct PersistOutcome {
	/// Records stored by this call, in input order. Only these may be notified.
	pub inserted: Vec<CanonicalTransaction>,
	pub duplicates: usize,
	/// Records that were not stored
	pub failed: Vec<CanonicalTransaction>,
}

impl PersistOutcome {
	pub fn is_complete(&self) -> bool {
		self.failed.is_empty()
	}
}
