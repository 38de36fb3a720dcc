//! Retry policy for adapter calls.
//!
//! Every adapter invocation goes through `RetryPolicy::run`. Only `RateLimited` is retried; any
//! other error is returned on the first attempt. Delays come from `backoff::ExponentialBackoff`,
//! and an adapter's `retry_after` hint replaces the computed delay for that attempt.

use crate::adapters::AdapterError;

use backoff::{ExponentialBackoff, future::retry};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
	/// Total attempts including the first call
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	/// Randomization factor applied to each delay (0.0 to 1.0)
	pub jitter: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_secs(5),
			max_delay: Duration::from_secs(60),
			jitter: 0.2,
		}
	}
}

impl RetryPolicy {
	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			initial_interval: self.base_delay,
			current_interval: self.base_delay,
			randomization_factor: self.jitter.clamp(0.0, 1.0),
			multiplier: 2.0,
			max_interval: self.max_delay.max(self.base_delay),
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		}
	}

	/// Run `op`, retrying rate-limited failures up to `max_attempts` in total.
	pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AdapterError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, AdapterError>>,
	{
		let attempts = AtomicU32::new(0);
		let max_attempts = self.max_attempts.max(1);

		retry(self.backoff(), || {
			let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
			let call = op();
			async move {
				match call.await {
					Ok(value) => Ok(value),
					Err(AdapterError::RateLimited { retry_after }) if attempt < max_attempts => {
						warn!(
							"{} rate limited (attempt {}/{}), backing off",
							label, attempt, max_attempts
						);
						let err = AdapterError::RateLimited { retry_after };
						Err(match retry_after {
							Some(hint) => backoff::Error::retry_after(err, hint),
							None => backoff::Error::transient(err),
						})
					}
					Err(e) => Err(backoff::Error::permanent(e)),
				}
			}
		})
		.await
	}
}
