//! Bounded FIFO queue of orders awaiting the "mark ready" transition.

use crate::StateError;
use chrono::Utc;
use parking_lot::Mutex;
use readybot_types::{OrderId, QueueCleanup, QueueEntry, QueueStats};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Inner {
	entries: VecDeque<QueueEntry>,
	ids: HashSet<OrderId>,
	stats: QueueStats,
}

/// Thread-safe FIFO queue, unique by order id.
///
/// The capacity is passed on every enqueue so that a configuration change
/// applies from the next attempt on without touching queued entries.
#[derive(Debug, Default)]
pub struct OrderQueue {
	inner: Mutex<Inner>,
}

impl OrderQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends an entry. An id already queued is rejected without touching
	/// the counters; a full queue counts a rejection.
	pub fn enqueue(&self, entry: QueueEntry, capacity: usize) -> Result<(), StateError> {
		let mut inner = self.inner.lock();

		if inner.ids.contains(&entry.id) {
			return Err(StateError::AlreadyQueued(entry.id));
		}

		if inner.entries.len() >= capacity {
			inner.stats.total_rejected += 1;
			inner.stats.max_reached_count += 1;
			warn!(order_id = %entry.id, capacity, "Queue full, order rejected");
			return Err(StateError::QueueFull { capacity });
		}

		debug!(order_id = %entry.id, store = %entry.store, "Order queued");
		inner.ids.insert(entry.id.clone());
		inner.entries.push_back(entry);
		inner.stats.total_added += 1;
		Ok(())
	}

	pub fn contains(&self, order_id: &str) -> bool {
		self.inner.lock().ids.contains(order_id)
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().entries.is_empty()
	}

	/// Entries in FIFO order.
	pub fn snapshot(&self) -> Vec<QueueEntry> {
		self.inner.lock().entries.iter().cloned().collect()
	}

	/// Removes the given ids wherever they are in the queue.
	pub fn remove_ids(&self, ids: &[OrderId]) -> QueueCleanup {
		let mut inner = self.inner.lock();
		let targets: HashSet<&OrderId> = ids.iter().collect();
		let before = inner.entries.len();

		inner.entries.retain(|entry| !targets.contains(&entry.id));
		for id in ids {
			inner.ids.remove(id);
		}

		QueueCleanup {
			removed: before - inner.entries.len(),
			remaining: inner.entries.len(),
		}
	}

	/// Empties the queue and resets the counters. Returns how many entries
	/// were dropped.
	pub fn clear(&self) -> usize {
		let mut inner = self.inner.lock();
		let dropped = inner.entries.len();
		*inner = Inner::default();
		dropped
	}

	pub fn record_processed(&self, successes: usize) {
		let mut inner = self.inner.lock();
		inner.stats.total_processed += successes as u64;
		inner.stats.last_processed = Some(Utc::now());
	}

	pub fn stats(&self) -> QueueStats {
		self.inner.lock().stats.clone()
	}
}
