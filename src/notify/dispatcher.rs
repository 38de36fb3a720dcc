//! Notification dispatcher.
//!
//! Looks up the wallet in the monitor registry, splits the newly inserted records into
//! sink-sized batches and delivers them in order. A failing batch is logged and the remaining
//! batches are still attempted. Nothing is retried or queued.

use super::AlertSink;
use crate::engine::MonitorRegistry;
use crate::models::{CanonicalTransaction, Chain};

use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of one dispatch call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches_delivered: usize,
    pub batches_failed: usize,
    pub items_delivered: usize,
}

impl DispatchSummary {
    pub fn is_empty(&self) -> bool {
        self.batches_delivered == 0 && self.batches_failed == 0
    }
}

/// Fans newly persisted transactions out to the configured alert sink.
#[derive(Clone)]
pub struct NotificationDispatcher {
    registry: Arc<MonitorRegistry>,
    sink: Arc<dyn AlertSink>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<MonitorRegistry>, sink: Arc<dyn AlertSink>) -> Self {
        Self { registry, sink }
    }

    /// Deliver `inserted` for the wallet, if it is actively monitored with an alert target.
    pub async fn dispatch(
        &self,
        chain: Chain,
        address: &str,
        inserted: &[CanonicalTransaction],
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if inserted.is_empty() {
            return summary;
        }

        let Some(monitor) = self.registry.lookup(chain, address) else {
            debug!(
                chain = %chain,
                address = %address,
                "Wallet not actively monitored, skipping {} alerts",
                inserted.len()
            );
            return summary;
        };
        let Some(target) = monitor.alert_target else {
            debug!(chain = %chain, address = %address, "No alert target registered");
            return summary;
        };

        let batch_size = self.sink.max_items_per_message().max(1);
        for batch in inserted.chunks(batch_size) {
            match self.sink.deliver(&target, batch).await {
                Ok(()) => {
                    summary.batches_delivered += 1;
                    summary.items_delivered += batch.len();
                }
                Err(e) => {
                    summary.batches_failed += 1;
                    error!(
                        chain = %chain,
                        address = %address,
                        "Sink {} failed to deliver batch of {}: {}",
                        self.sink.name(),
                        batch.len(),
                        e
                    );
                    // Best-effort: drop the batch and continue with the rest
                }
            }
        }

        info!(
            chain = %chain,
            address = %address,
            "Dispatched {} alerts in {} batches ({} failed)",
            summary.items_delivered,
            summary.batches_delivered,
            summary.batches_failed
        );
        summary
    }
}
