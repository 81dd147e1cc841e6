//! Submission of READY orders: queue draining and the bulk sweep.

use crate::drain::DrainGate;
use crate::CoreError;
use chrono::Utc;
use readybot_state::PollingContext;
use readybot_types::{
	CycleSummary, DrainSummary, OrderId, OrderOutcome, OutcomeStatus, QueueCleanup, QueueConfig,
};
use readybot_upstream::UpstreamClient;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// An order to transition and the store it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
	id: OrderId,
	store: String,
}

pub struct BatchProcessor {
	context: Arc<PollingContext>,
	client: Arc<UpstreamClient>,
	gate: DrainGate,
}

impl BatchProcessor {
	pub fn new(context: Arc<PollingContext>, client: Arc<UpstreamClient>) -> Self {
		Self {
			context,
			client,
			gate: DrainGate::new(),
		}
	}

	pub fn is_draining(&self) -> bool {
		self.gate.is_draining()
	}

	/// Submits every queued order in FIFO batches.
	///
	/// Returns `None` without doing anything when another drain is running.
	/// Every entry present when the drain started is gone from the queue
	/// afterwards, whatever its outcome.
	#[instrument(skip(self))]
	pub async fn drain_queue(&self) -> Option<DrainSummary> {
		let Some(_guard) = self.gate.try_begin() else {
			info!("Queue drain already in progress, skipping");
			return None;
		};

		let snapshot = self.context.pending();
		if snapshot.is_empty() {
			return Some(DrainSummary::default());
		}

		let started = Instant::now();
		let config = self.context.queue_config();
		let targets: Vec<Target> = snapshot
			.into_iter()
			.map(|entry| Target {
				id: entry.id,
				store: entry.store,
			})
			.collect();

		info!(
			orders = targets.len(),
			batch_size = config.batch_size,
			batch_delay_ms = config.batch_delay_ms,
			"Draining queue"
		);
		let (batches, results) = self.submit_in_batches(&targets, &config).await;
		let (attempted, failed) = partition(&targets, &results);
		let cleanup = self.context.settle(&attempted, &failed);

		let success_count = results.len() - failed.len();
		self.context.queue.record_processed(success_count);

		let summary = DrainSummary {
			batches,
			attempted: attempted.len(),
			success_count,
			error_count: failed.len(),
			duration_ms: started.elapsed().as_millis() as u64,
			results,
		};
		info!(
			batches = summary.batches,
			success = summary.success_count,
			errors = summary.error_count,
			remaining = cleanup.remaining,
			"Queue drained"
		);
		Some(summary)
	}

	/// Fetches every active store at the current checkpoint, submits every
	/// READY order found and drops those orders from the queue.
	#[instrument(skip(self))]
	pub async fn process_orders(&self) -> CycleSummary {
		let started_at = Utc::now();
		let started = Instant::now();
		let checkpoint = self.context.checkpoint.initialize();

		if let Err(e) = self.client.credentials().get_or_refresh_token().await {
			error!(error = %e, "Bulk sweep aborted, no usable credential");
			return self.finish(failed_summary(started_at, started, format!("Credential unavailable: {e}")));
		}

		let sweep = match self.client.fetch_all_stores(&checkpoint).await {
			Ok(sweep) => sweep,
			Err(e) => {
				error!(error = %e, "Bulk sweep aborted");
				return self.finish(failed_summary(started_at, started, e.to_string()));
			}
		};

		if let Some(reported) = &sweep.checkpoint {
			self.context.checkpoint.advance(reported);
		}

		let mut seen = HashSet::new();
		let targets: Vec<Target> = sweep
			.fetches
			.iter()
			.flat_map(|fetch| {
				fetch.classification.valid.iter().map(|order| Target {
					id: order.id.clone(),
					store: fetch.store.clone(),
				})
			})
			.filter(|target| seen.insert(target.id.clone()))
			.collect();

		let config = self.context.queue_config();
		let (_, results) = self.submit_in_batches(&targets, &config).await;
		let (attempted, failed) = partition(&targets, &results);
		let queue_cleanup: QueueCleanup = self.context.settle(&attempted, &failed);
		let success_count = results.len() - failed.len();
		self.context.queue.record_processed(success_count);

		let mut store_results = sweep.store_results;
		for result in &mut store_results {
			for outcome in results.iter().filter(|o| o.store == result.store) {
				if outcome.is_success() {
					result.processed_successes += 1;
				} else {
					result.processed_errors += 1;
				}
			}
		}

		let successful_stores = store_results.iter().filter(|r| r.success).count();
		let summary = CycleSummary {
			success: true,
			message: format!(
				"Processed {} orders from {} of {} stores",
				results.len(),
				successful_stores,
				store_results.len()
			),
			processed: results.len(),
			success_count,
			error_count: failed.len(),
			duration_ms: started.elapsed().as_millis() as u64,
			started_at,
			finished_at: Utc::now(),
			checkpoint: self.context.checkpoint.current(),
			total_stores: store_results.len(),
			successful_stores,
			failed_stores: store_results.len() - successful_stores,
			store_results,
			results,
			queue_cleanup,
		};
		info!(
			processed = summary.processed,
			success = summary.success_count,
			errors = summary.error_count,
			failed_stores = summary.failed_stores,
			"Bulk sweep finished"
		);
		self.finish(summary)
	}

	/// Marks one order ready and drops it from the queue.
	#[instrument(skip(self))]
	pub async fn process_single_order(&self, order_id: &str, store: &str) -> Result<OrderOutcome, CoreError> {
		let credential = self.client.credentials().get_or_refresh_token().await?;
		let outcome = self.submit(&credential, order_id, store).await;

		let id = order_id.to_string();
		let failed = if outcome.is_success() { vec![] } else { vec![id.clone()] };
		self.context.settle(&[id], &failed);
		if outcome.is_success() {
			self.context.queue.record_processed(1);
		}
		Ok(outcome)
	}

	fn finish(&self, summary: CycleSummary) -> CycleSummary {
		self.context.set_last_summary(summary.clone());
		summary
	}

	/// Sequential submission in batches of `batch_size`, pausing
	/// `batch_delay_ms` between two batches. Returns the batch count and one
	/// outcome per target.
	async fn submit_in_batches(&self, targets: &[Target], config: &QueueConfig) -> (usize, Vec<OrderOutcome>) {
		let delay = Duration::from_millis(config.batch_delay_ms);
		let mut results = Vec::with_capacity(targets.len());
		let mut batches = 0;

		for (index, batch) in targets.chunks(config.batch_size.max(1)).enumerate() {
			if index > 0 {
				tokio::time::sleep(delay).await;
			}
			batches += 1;

			let credential = match self.client.credentials().get_or_refresh_token().await {
				Ok(credential) => credential,
				Err(e) => {
					warn!(batch = batches, error = %e, "No credential for batch");
					results.extend(batch.iter().map(|t| error_outcome(t, format!("Credential unavailable: {e}"))));
					continue;
				}
			};

			for target in batch {
				results.push(self.submit(&credential, &target.id, &target.store).await);
			}
		}

		(batches, results)
	}

	async fn submit(&self, credential: &readybot_types::Credential, order_id: &str, store: &str) -> OrderOutcome {
		match self.client.mark_order_ready(credential, order_id).await {
			Ok(_) => {
				info!(order_id, store, "Order marked FULL_READY");
				OrderOutcome {
					id: order_id.to_string(),
					store: store.to_string(),
					status: OutcomeStatus::Success,
					error: None,
				}
			}
			Err(e) => {
				warn!(order_id, store, error = %e, "Order transition failed");
				OrderOutcome {
					id: order_id.to_string(),
					store: store.to_string(),
					status: OutcomeStatus::Error,
					error: Some(e.to_string()),
				}
			}
		}
	}
}

fn error_outcome(target: &Target, error: String) -> OrderOutcome {
	OrderOutcome {
		id: target.id.clone(),
		store: target.store.clone(),
		status: OutcomeStatus::Error,
		error: Some(error),
	}
}

/// Attempted ids and the subset that failed.
fn partition(targets: &[Target], results: &[OrderOutcome]) -> (Vec<OrderId>, Vec<OrderId>) {
	let attempted = targets.iter().map(|t| t.id.clone()).collect();
	let failed = results
		.iter()
		.filter(|o| !o.is_success())
		.map(|o| o.id.clone())
		.collect();
	(attempted, failed)
}

fn failed_summary(started_at: chrono::DateTime<Utc>, started: Instant, message: String) -> CycleSummary {
	CycleSummary {
		success: false,
		message,
		processed: 0,
		success_count: 0,
		error_count: 0,
		duration_ms: started.elapsed().as_millis() as u64,
		started_at,
		finished_at: Utc::now(),
		checkpoint: None,
		total_stores: 0,
		successful_stores: 0,
		failed_stores: 0,
		store_results: Vec::new(),
		results: Vec::new(),
		queue_cleanup: QueueCleanup::default(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{ready, Harness};
	use readybot_types::{Checkpoint, OrderState};
	use readybot_upstream::ApiFailure;

	#[tokio::test(start_paused = true)]
	async fn test_drain_runs_batches_with_delay() {
		let h = Harness::new(vec!["tok"]).await;
		h.context
			.set_queue_config(QueueConfig {
				batch_size: 2,
				batch_delay_ms: 100,
				..Default::default()
			})
			.unwrap();
		for id in ["A1", "A2", "A3", "A4", "A5"] {
			h.context.enqueue_order(&ready(id, "S1")).unwrap();
		}

		let summary = h.processor.drain_queue().await.unwrap();

		assert_eq!(summary.batches, 3);
		assert_eq!(summary.success_count, 5);
		let calls = h.api.transition_times();
		assert_eq!(calls.len(), 5);
		// Batches start with the 1st, 3rd and 5th call.
		assert!(calls[2] - calls[0] >= Duration::from_millis(100));
		assert!(calls[4] - calls[2] >= Duration::from_millis(100));
		assert!(calls[1] - calls[0] < Duration::from_millis(100));
	}

	#[tokio::test]
	async fn test_drain_empties_queue_whatever_the_outcome() {
		let h = Harness::new(vec!["tok"]).await;
		h.context
			.set_queue_config(QueueConfig {
				batch_delay_ms: 1,
				..Default::default()
			})
			.unwrap();
		for id in ["A1", "A2", "A3"] {
			h.context.enqueue_order(&ready(id, "S1")).unwrap();
		}
		h.api.fail_transition("A2", ApiFailure::Status {
			code: 409,
			body: "conflict".to_string(),
		});

		let summary = h.processor.drain_queue().await.unwrap();

		assert_eq!(summary.attempted, 3);
		assert_eq!(summary.success_count, 2);
		assert_eq!(summary.error_count, 1);
		assert!(h.context.queue.is_empty());
		assert_eq!(h.context.stats().total_processed, 2);
		let failed = summary.results.iter().find(|o| o.id == "A2").unwrap();
		assert_eq!(failed.status, OutcomeStatus::Error);
	}

	#[tokio::test]
	async fn test_concurrent_drain_is_skipped() {
		let h = Harness::new(vec!["tok"]).await;
		h.context.enqueue_order(&ready("A1", "S1")).unwrap();

		let _held = h.processor.gate.try_begin().unwrap();
		assert!(h.processor.is_draining());
		assert!(h.processor.drain_queue().await.is_none());
		assert_eq!(h.context.queue.len(), 1);
	}

	#[tokio::test]
	async fn test_bulk_sweep_submits_and_reconciles_queue() {
		let h = Harness::new(vec!["tok"]).await;
		h.add_store("S1").await;
		h.add_store("S2").await;
		h.context.checkpoint.advance(&Checkpoint::from(5u64));
		h.context.enqueue_order(&ready("A1", "S1")).unwrap();
		h.context.enqueue_order(&ready("Z9", "S2")).unwrap();
		h.api.page("S1", &[("A1", OrderState::Ready), ("A2", OrderState::FullReady)], 40);
		h.api.page("S2", &[("B1", OrderState::Ready), ("B2", OrderState::Cancelled)], 30);

		let summary = h.processor.process_orders().await;

		assert!(summary.success);
		assert_eq!(summary.processed, 2);
		assert_eq!(summary.success_count, 2);
		assert_eq!(summary.total_stores, 2);
		assert_eq!(summary.store_results[0].processed_successes, 1);
		assert_eq!(summary.store_results[1].cancelled_orders, 1);
		assert_eq!(summary.queue_cleanup, QueueCleanup { removed: 1, remaining: 1 });
		assert_eq!(summary.checkpoint, Some(Checkpoint::from(40u64)));
		assert_eq!(h.context.checkpoint.current(), Some(Checkpoint::from(40u64)));
		assert_eq!(h.context.last_summary(), Some(summary));
	}

	#[tokio::test]
	async fn test_bulk_sweep_without_credential_fails_cleanly() {
		let h = Harness::new(vec![]).await;
		h.add_store("S1").await;

		let summary = h.processor.process_orders().await;

		assert!(!summary.success);
		assert!(summary.message.starts_with("Credential unavailable"));
		assert!(h.api.transition_times().is_empty());
	}

	#[tokio::test]
	async fn test_single_order_is_dropped_from_queue() {
		let h = Harness::new(vec!["tok"]).await;
		h.context.enqueue_order(&ready("A1", "S1")).unwrap();

		let outcome = h.processor.process_single_order("A1", "S1").await.unwrap();

		assert!(outcome.is_success());
		assert!(h.context.queue.is_empty());
		assert_eq!(h.context.stats().total_processed, 1);
	}
}
