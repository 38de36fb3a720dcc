//! Progress tracking for poll ticks and resync sweeps.
//!
//! A `SweepProgress` is created per tick. The scheduler records each wallet's outcome into it and
//! logs the summary once the tick completes.

use super::types::{CycleReport, CycleTrigger};
use crate::models::Chain;

use std::time::Instant;
use tracing::info;

/// Tracks the wallets visited during one tick or sweep
#[derive(Debug, Clone)]
pub struct SweepProgress {
    chain: Chain,
    trigger: CycleTrigger,
    started_at: Instant,
    /// Wallets a cycle was attempted for
    attempted: usize,
    succeeded: usize,
    failed: usize,
    /// Wallets left to push delivery
    skipped: usize,
    new_transactions: usize,
    alerts_delivered: usize,
    /// Highest checkpoint committed during the sweep
    highest_checkpoint: Option<u64>,
}

impl SweepProgress {
    pub fn new(chain: Chain, trigger: CycleTrigger) -> Self {
        Self {
            chain,
            trigger,
            started_at: Instant::now(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            new_transactions: 0,
            alerts_delivered: 0,
            highest_checkpoint: None,
        }
    }

    /// Record a successful cycle
    pub fn record_success(&mut self, report: &CycleReport) {
        self.attempted += 1;
        self.succeeded += 1;
        self.new_transactions += report.inserted;
        self.alerts_delivered += report.dispatch.items_delivered;
        self.highest_checkpoint = self.highest_checkpoint.max(report.checkpoint);
    }

    pub fn record_failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Log the summary if anything happened during the sweep
    pub fn log_summary(&self) {
        if self.attempted == 0 && self.skipped == 0 {
            return;
        }
        info!("{}", self.get_stats().summary());
    }

    pub fn get_stats(&self) -> SweepStats {
        SweepStats {
            chain: self.chain,
            trigger: self.trigger,
            attempted: self.attempted,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            new_transactions: self.new_transactions,
            alerts_delivered: self.alerts_delivered,
            highest_checkpoint: self.highest_checkpoint,
            elapsed_ms: self.started_at.elapsed().as_millis(),
        }
    }
}

/// Statistics about one tick or sweep
#[derive(Debug, Clone)]
pub struct SweepStats {
    pub chain: Chain,
    pub trigger: CycleTrigger,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub new_transactions: usize,
    pub alerts_delivered: usize,
    pub highest_checkpoint: Option<u64>,
    pub elapsed_ms: u128,
}

impl SweepStats {
    /// Get a human-readable summary of the sweep statistics
    pub fn summary(&self) -> String {
        format!(
            "{} {} sweep: {}/{} wallets ok, {} new transactions, {} alerts in {}ms{}{}",
            self.chain,
            self.trigger,
            self.succeeded,
            self.attempted,
            self.new_transactions,
            self.alerts_delivered,
            self.elapsed_ms,
            if self.failed == 0 {
                String::new()
            } else {
                format!(" ({} failed)", self.failed)
            },
            if self.skipped == 0 {
                String::new()
            } else {
                format!(" ({} on push)", self.skipped)
            }
        )
    }
}
