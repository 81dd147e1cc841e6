//! Bounded retries with exponential backoff.

use crate::ApiFailure;
use backoff::{backoff::Backoff, ExponentialBackoff};
use readybot_config::UpstreamConfig;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retries transient failures after `base`, `2 * base`, `4 * base`, ...
/// up to `max_retries` times. Unauthorized answers are returned at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	backoff: ExponentialBackoff,
	max_retries: u32,
}

impl RetryPolicy {
	pub fn new(base_delay: Duration, max_retries: u32) -> Self {
		let backoff = ExponentialBackoff {
			current_interval: base_delay,
			initial_interval: base_delay,
			randomization_factor: 0.0,
			multiplier: 2.0,
			max_interval: Duration::from_secs(300),
			max_elapsed_time: None,
			..Default::default()
		};

		Self {
			backoff,
			max_retries,
		}
	}

	pub fn from_config(config: &UpstreamConfig) -> Self {
		Self::new(
			Duration::from_millis(config.retry_base_delay_ms),
			config.retry_attempts,
		)
	}

	pub fn max_retries(&self) -> u32 {
		self.max_retries
	}

	pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiFailure>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, ApiFailure>>,
	{
		let mut backoff = self.backoff.clone();
		backoff.reset();
		let mut attempts = 0;

		loop {
			match call().await {
				Ok(result) => return Ok(result),
				Err(e) if !e.is_retryable() => return Err(e),
				Err(e) => {
					attempts += 1;

					if attempts > self.max_retries {
						warn!(
							"{} failed after {} retries, giving up: {}",
							operation, self.max_retries, e
						);
						return Err(e);
					}

					match backoff.next_backoff() {
						Some(delay) => {
							warn!(
								"{} failed, attempt {}/{}, retrying in {:?}: {}",
								operation, attempts, self.max_retries, delay, e
							);
							tokio::time::sleep(delay).await;
						}
						None => return Err(e),
					}
				}
			}
		}
	}
}
