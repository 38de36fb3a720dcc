//! Alert delivery for newly persisted transactions
//!
//! The dispatcher receives only the records the persistence layer reports as newly inserted and
//! forwards them to an `AlertSink`, gated on the wallet being an active monitor with a target.
//! Delivery is best-effort: failed batches are logged and dropped.

/// Gated, batched dispatch to an alert sink
pub mod dispatcher;
/// Webhook and log sinks
pub mod sinks;

pub use dispatcher::{DispatchSummary, NotificationDispatcher};
pub use sinks::{LogAlertSink, WebhookAlertSink};

use crate::models::CanonicalTransaction;

/// Default batch size, matching common chat webhook embed limits
pub const DEFAULT_ITEMS_PER_MESSAGE: usize = 10;

/// Errors raised while delivering an alert batch
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("Alert target rejected the batch with status {status}: {body}")]
	Rejected { status: u16, body: String },

	#[error("Invalid alert target: {0}")]
	InvalidTarget(String),
}

/// Destination for alert batches.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
	/// Largest batch a single message may carry
	fn max_items_per_message(&self) -> usize {
		DEFAULT_ITEMS_PER_MESSAGE
	}

	/// Deliver one batch to `target`. Called once per batch, in order.
	async fn deliver(
		&self,
		target: &str,
		batch: &[CanonicalTransaction],
	) -> Result<(), AlertError>;

	/// Get the name of this sink for logging and diagnostics.
	fn name(&self) -> &'static str;
}
