//! Shared state of one polling process.

use crate::{CheckpointTracker, OrderQueue, StateCache, StateError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use readybot_types::{
	CycleSummary, Order, OrderId, QueueCleanup, QueueConfig, QueueConfigPatch, QueueEntry,
	QueueStats,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// What one monitor pass did with the fetched orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
	/// Orders whose state changed, first sightings included.
	pub changes: usize,
	pub enqueued: Vec<OrderId>,
	/// READY orders dropped because the queue was full.
	pub rejected: Vec<OrderId>,
	/// Cache entries evicted at the end of the pass.
	pub evicted: usize,
}

/// Checkpoint, queue, state cache and queue configuration shared by the
/// monitor and the batch processor.
///
/// An order cached as READY is either queued or was handled successfully;
/// every other path out of the queue forgets the cached state so that the
/// order is picked up again when it is next seen READY.
pub struct PollingContext {
	pub checkpoint: CheckpointTracker,
	pub queue: OrderQueue,
	pub states: StateCache,
	config: RwLock<QueueConfig>,
	max_idle_cycles: u64,
	cycle: AtomicU64,
	last_check: RwLock<Option<DateTime<Utc>>>,
	last_summary: RwLock<Option<CycleSummary>>,
}

impl PollingContext {
	pub fn new(config: QueueConfig) -> Self {
		Self {
			checkpoint: CheckpointTracker::new(),
			queue: OrderQueue::new(),
			states: StateCache::new(),
			config: RwLock::new(config),
			max_idle_cycles: 0,
			cycle: AtomicU64::new(0),
			last_check: RwLock::new(None),
			last_summary: RwLock::new(None),
		}
	}

	/// Evict cached states untouched for this many monitor passes.
	pub fn with_state_cache_max_idle(mut self, cycles: u64) -> Self {
		self.max_idle_cycles = cycles;
		self
	}

	pub fn queue_config(&self) -> QueueConfig {
		*self.config.read()
	}

	pub fn update_queue_config(&self, patch: &QueueConfigPatch) -> Result<QueueConfig, StateError> {
		let mut config = self.config.write();
		let updated = config.patched(patch)?;
		*config = updated;
		info!(?updated, "Queue configuration updated");
		Ok(updated)
	}

	pub fn set_queue_config(&self, config: QueueConfig) -> Result<(), StateError> {
		config.validate()?;
		*self.config.write() = config;
		Ok(())
	}

	/// Diffs fetched orders against the state cache and queues every order
	/// that turned READY.
	pub fn observe_orders(&self, orders: &[Order]) -> Observation {
		let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
		let capacity = self.config.read().max_orders;
		let mut observation = Observation::default();

		for order in orders {
			let Some(change) = self.states.observe(&order.id, &order.current_state, cycle) else {
				continue;
			};
			observation.changes += 1;
			debug!(
				order_id = %order.id,
				from = ?change.from.as_ref().map(|s| s.as_str()),
				to = %change.to,
				"Order state changed"
			);

			if !order.current_state.is_ready() || self.queue.contains(&order.id) {
				continue;
			}

			match self.queue.enqueue(QueueEntry::new(order, change), capacity) {
				Ok(()) => observation.enqueued.push(order.id.clone()),
				Err(StateError::QueueFull { .. }) => {
					self.states.forget(std::slice::from_ref(&order.id));
					observation.rejected.push(order.id.clone());
				}
				Err(_) => {}
			}
		}

		observation.evicted = self.states.evict_idle(cycle, self.max_idle_cycles);
		*self.last_check.write() = Some(Utc::now());
		observation
	}

	/// Manually queues an order, bypassing the state diff.
	pub fn enqueue_order(&self, order: &Order) -> Result<(), StateError> {
		let from = self.states.get(&order.id);
		let change = readybot_types::StatusChange::new(from, order.current_state.clone());
		let capacity = self.config.read().max_orders;
		self.queue.enqueue(QueueEntry::new(order, change), capacity)
	}

	/// Removes handled orders from the queue. Failed ones are forgotten by
	/// the state cache so that a later READY sighting queues them again.
	pub fn settle(&self, attempted: &[OrderId], failed: &[OrderId]) -> QueueCleanup {
		self.states.forget(failed);
		self.queue.remove_ids(attempted)
	}

	/// Empties the queue, its counters and the state cache.
	pub fn clear_queue(&self) -> usize {
		self.states.clear();
		let dropped = self.queue.clear();
		info!(dropped, "Queue cleared");
		dropped
	}

	pub fn pending(&self) -> Vec<QueueEntry> {
		self.queue.snapshot()
	}

	pub fn stats(&self) -> QueueStats {
		self.queue.stats()
	}

	pub fn last_check(&self) -> Option<DateTime<Utc>> {
		*self.last_check.read()
	}

	pub fn last_summary(&self) -> Option<CycleSummary> {
		self.last_summary.read().clone()
	}

	pub fn set_last_summary(&self, summary: CycleSummary) {
		*self.last_summary.write() = Some(summary);
	}

	pub fn reset_last_summary(&self) {
		*self.last_summary.write() = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use readybot_types::OrderState;

	fn context(max_orders: usize) -> PollingContext {
		PollingContext::new(QueueConfig {
			max_orders,
			..Default::default()
		})
	}

	fn ready(id: &str) -> Order {
		Order::new(id, "S1", OrderState::Ready)
	}

	#[test]
	fn test_ready_order_is_queued_exactly_once() {
		let ctx = context(10);

		let first = ctx.observe_orders(&[ready("A1"), ready("A1")]);
		let second = ctx.observe_orders(&[ready("A1")]);

		assert_eq!(first.enqueued, vec!["A1"]);
		assert!(second.enqueued.is_empty());
		assert_eq!(ctx.queue.len(), 1);
		assert_eq!(ctx.stats().total_added, 1);
	}

	#[test]
	fn test_only_ready_transitions_are_queued() {
		let ctx = context(10);
		ctx.observe_orders(&[Order::new("A1", "S1", OrderState::from("PREPARING"))]);
		assert!(ctx.queue.is_empty());

		let observation = ctx.observe_orders(&[ready("A1"), Order::new("A2", "S1", OrderState::FullReady)]);
		assert_eq!(observation.changes, 2);
		assert_eq!(observation.enqueued, vec!["A1"]);
		let entry = &ctx.pending()[0];
		assert_eq!(entry.status_change.from, Some(OrderState::from("PREPARING")));
		assert_eq!(entry.status_change.to, OrderState::Ready);
	}

	#[test]
	fn test_full_queue_rejects_and_order_is_retried_later() {
		let ctx = context(1);
		let observation = ctx.observe_orders(&[ready("A1"), ready("A2")]);

		assert_eq!(observation.enqueued, vec!["A1"]);
		assert_eq!(observation.rejected, vec!["A2"]);
		let stats = ctx.stats();
		assert_eq!(stats.total_rejected, 1);
		assert_eq!(stats.max_reached_count, 1);

		// Room again: the rejected order is picked up on its next sighting.
		ctx.settle(&["A1".to_string()], &[]);
		let observation = ctx.observe_orders(&[ready("A1"), ready("A2")]);
		assert_eq!(observation.enqueued, vec!["A2"]);
	}

	#[test]
	fn test_failed_orders_are_requeued_when_seen_again() {
		let ctx = context(10);
		ctx.observe_orders(&[ready("OK"), ready("BAD")]);

		let cleanup = ctx.settle(&["OK".to_string(), "BAD".to_string()], &["BAD".to_string()]);
		assert_eq!(cleanup, QueueCleanup { removed: 2, remaining: 0 });

		let observation = ctx.observe_orders(&[ready("OK"), ready("BAD")]);
		assert_eq!(observation.enqueued, vec!["BAD"]);
	}

	#[test]
	fn test_manual_enqueue_and_clear() {
		let ctx = context(10);
		ctx.enqueue_order(&ready("M1")).unwrap();
		assert_eq!(
			ctx.enqueue_order(&ready("M1")),
			Err(StateError::AlreadyQueued("M1".to_string()))
		);

		assert_eq!(ctx.clear_queue(), 1);
		assert!(ctx.states.is_empty());
		assert_eq!(ctx.stats(), QueueStats::default());
	}

	#[test]
	fn test_config_update_validates() {
		let ctx = context(10);
		let updated = ctx
			.update_queue_config(&QueueConfigPatch {
				batch_size: Some(3),
				..Default::default()
			})
			.unwrap();
		assert_eq!(updated.batch_size, 3);
		assert_eq!(ctx.queue_config().batch_size, 3);

		assert!(ctx
			.update_queue_config(&QueueConfigPatch {
				batch_delay_ms: Some(0),
				..Default::default()
			})
			.is_err());
		assert_eq!(ctx.queue_config().batch_delay_ms, 2000);
	}
}
