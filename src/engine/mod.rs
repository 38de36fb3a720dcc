//! Chain Activity Ingestion Engine
//!
//! This module contains the scheduling, gap-recovery and subscription logic that turns adapter
//! output into persisted, deduplicated and alerted transactions:
//!
//! - `orchestrator`: The `ActivityEngine` facade and its builder. Entry point for callers.
//! - `cycle`: The single fetch, dedup, persist, checkpoint and notify pass every trigger shares.
//! - `scheduler`: Per-chain poll timers and the coarse full resync sweep.
//! - `subscriptions`: Refcounted push subscriptions with debounced, primed reconciliation.
//! - `registry`: The monitor registry gating alerts and poll membership.
//! - `checkpoint`: The checkpoint advancement rule.
//! - `retry`: Retry policy applied to every adapter call.
//! - `debounce`: Single-slot rearmable timers keyed by address.
//! - `seen_set`: Bounded FIFO set of already-handled transaction hashes.
//! - `progress_tracker`: Per-tick statistics for logging.
//!
//! Poll ticks and subscription reconciliations may run concurrently for the same wallet. Both end
//! in the same idempotent persistence step, so neither needs to coordinate with the other.

/// Checkpoint advancement rule
pub mod checkpoint;
/// Shared ingestion pass
pub mod cycle;
/// Single-slot rearmable timers
pub mod debounce;
/// Engine facade and builder
pub mod orchestrator;
/// Tracks tick and sweep statistics
pub mod progress_tracker;
/// Active monitor registry
pub mod registry;
/// Retry policy for adapter calls
pub mod retry;
/// Per-chain poll timers and resync sweep
pub mod scheduler;
/// Bounded seen-hash set
pub mod seen_set;
/// Push subscription lifecycle
pub mod subscriptions;
/// Engine errors and cycle types
mod types;

pub use cycle::IngestionCycle;
pub use orchestrator::{ActivityEngine, ActivityEngineBuilder, EngineHandle};
pub use progress_tracker::SweepStats;
pub use registry::MonitorRegistry;
pub use retry::RetryPolicy;
pub use scheduler::{ChainSchedule, PollScheduler, SchedulerSettings};
pub use subscriptions::{SubscriptionManager, SubscriptionSettings};
pub use types::*;
