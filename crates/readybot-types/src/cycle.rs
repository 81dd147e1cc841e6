//! Classification records and processing cycle summaries.

use crate::checkpoint::Checkpoint;
use crate::order::{OrderId, OrderState};
use crate::queue::{QueueConfig, QueueStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a fetched order was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	AlreadyProcessed,
	InDelivery,
	UnknownState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedOrder {
	pub id: OrderId,
	pub state: OrderState,
	pub reason: SkipReason,
}

/// Cancelled order as written to the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledOrder {
	pub id: OrderId,
	pub store: String,
	pub state: OrderState,
	pub reason: String,
	pub timestamp: DateTime<Utc>,
}

/// Outcome of one store's fetch within a cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResult {
	pub store: String,
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub checkpoint: Option<Checkpoint>,
	pub total_orders: usize,
	pub valid_orders: usize,
	pub skipped_orders: usize,
	pub cancelled_orders: usize,
	pub processed_successes: usize,
	pub processed_errors: usize,
}

impl StoreResult {
	pub fn failed(store: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			store: store.into(),
			success: false,
			error: Some(error.into()),
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
	Success,
	Error,
}

/// Result of a single "mark ready" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
	pub id: OrderId,
	pub store: String,
	pub status: OutcomeStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl OrderOutcome {
	pub fn is_success(&self) -> bool {
		self.status == OutcomeStatus::Success
	}
}

/// Orders dropped from the queue after a bulk sweep handled them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCleanup {
	pub removed: usize,
	pub remaining: usize,
}

/// Summary of one bulk sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
	pub success: bool,
	pub message: String,
	pub processed: usize,
	pub success_count: usize,
	pub error_count: usize,
	pub duration_ms: u64,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub checkpoint: Option<Checkpoint>,
	pub total_stores: usize,
	pub successful_stores: usize,
	pub failed_stores: usize,
	pub store_results: Vec<StoreResult>,
	pub results: Vec<OrderOutcome>,
	pub queue_cleanup: QueueCleanup,
}

/// Summary of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
	pub batches: usize,
	pub attempted: usize,
	pub success_count: usize,
	pub error_count: usize,
	pub duration_ms: u64,
	pub results: Vec<OrderOutcome>,
}

/// Introspection view of the change monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
	pub is_active: bool,
	pub interval_ms: u64,
	pub is_draining: bool,
	pub queue_length: usize,
	pub tracked_orders: usize,
	pub checkpoint: Option<Checkpoint>,
	pub last_check: Option<DateTime<Utc>>,
	pub queue_config: QueueConfig,
	pub stats: QueueStats,
}
