//! Dedup and persistence layer
//!
//! Canonical transactions are stored exactly once per (hash, wallet, token) key and wallet state
//! carries the per-(wallet, chain) resume checkpoint. Storage backends sit behind the repository
//! traits; the `PersistenceService` on top of them is the only writer the engine uses.
//!
//! - `repositories`: repository traits and the JSON-file backend.
//! - `memory`: in-process backend.
//! - `persistence`: lookup-then-insert dedup service returning the newly inserted subset.

/// In-memory repository implementations
pub mod memory;
/// Dedup-aware persistence service
pub mod persistence;
/// Repository traits and file-based implementations
pub mod repositories;
/// Store errors and insert outcomes
mod types;

pub use memory::{InMemoryTransactionRepository, InMemoryWalletStateRepository};
pub use persistence::PersistenceService;
pub use repositories::{
	FileTransactionRepository, FileWalletStateRepository, TransactionRepository,
	WalletStateRepository,
};
pub use types::*;
