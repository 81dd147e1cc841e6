//! Queue entries, runtime queue configuration and queue counters.

use crate::order::{Order, OrderId, OrderState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Observed state transition that caused an order to be queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
	/// Previous known state, `None` when the order was never seen before.
	pub from: Option<OrderState>,
	pub to: OrderState,
	pub timestamp: DateTime<Utc>,
}

impl StatusChange {
	pub fn new(from: Option<OrderState>, to: OrderState) -> Self {
		Self {
			from,
			to,
			timestamp: Utc::now(),
		}
	}
}

/// An order waiting for the "mark ready" transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
	pub id: OrderId,
	pub store: String,
	pub current_state: OrderState,
	pub status_change: StatusChange,
	pub added_to_queue: DateTime<Utc>,
}

impl QueueEntry {
	pub fn new(order: &Order, status_change: StatusChange) -> Self {
		Self {
			id: order.id.clone(),
			store: order.store.clone(),
			current_state: order.current_state.clone(),
			status_change,
			added_to_queue: Utc::now(),
		}
	}
}

/// Rejected queue configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueConfigError {
	#[error("{0} must be greater than zero")]
	NotPositive(&'static str),
}

/// Runtime-tunable queue and batch parameters.
///
/// Changes apply from the next processing cycle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
	/// Queue capacity.
	#[serde(rename = "MAX_ORDERS")]
	pub max_orders: usize,
	/// Orders submitted per batch.
	#[serde(rename = "BATCH_SIZE")]
	pub batch_size: usize,
	/// Pause between two batches, in milliseconds.
	#[serde(rename = "BATCH_DELAY")]
	pub batch_delay_ms: u64,
	/// Leave queue draining to the scheduler instead of draining right after
	/// the monitor enqueued something.
	#[serde(rename = "CRON_SYNC")]
	pub cron_sync: bool,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			max_orders: 500,
			batch_size: 50,
			batch_delay_ms: 2000,
			cron_sync: false,
		}
	}
}

impl QueueConfig {
	pub fn validate(&self) -> Result<(), QueueConfigError> {
		if self.max_orders == 0 {
			return Err(QueueConfigError::NotPositive("MAX_ORDERS"));
		}
		if self.batch_size == 0 {
			return Err(QueueConfigError::NotPositive("BATCH_SIZE"));
		}
		if self.batch_delay_ms == 0 {
			return Err(QueueConfigError::NotPositive("BATCH_DELAY"));
		}
		Ok(())
	}

	/// Returns a copy with the patch applied, validated.
	pub fn patched(&self, patch: &QueueConfigPatch) -> Result<Self, QueueConfigError> {
		let updated = Self {
			max_orders: patch.max_orders.unwrap_or(self.max_orders),
			batch_size: patch.batch_size.unwrap_or(self.batch_size),
			batch_delay_ms: patch.batch_delay_ms.unwrap_or(self.batch_delay_ms),
			cron_sync: patch.cron_sync.unwrap_or(self.cron_sync),
		};
		updated.validate()?;
		Ok(updated)
	}
}

/// Partial update of [`QueueConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfigPatch {
	#[serde(rename = "MAX_ORDERS", default)]
	pub max_orders: Option<usize>,
	#[serde(rename = "BATCH_SIZE", default)]
	pub batch_size: Option<usize>,
	#[serde(rename = "BATCH_DELAY", default)]
	pub batch_delay_ms: Option<u64>,
	#[serde(rename = "CRON_SYNC", default)]
	pub cron_sync: Option<bool>,
}

/// Process-wide queue counters. Reset only by an explicit queue clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
	pub total_added: u64,
	pub total_processed: u64,
	pub total_rejected: u64,
	pub max_reached_count: u64,
	pub last_processed: Option<DateTime<Utc>>,
}
