//! Process-wide polling state.
//!
//! Everything the change monitor and the batch processor share lives in one
//! [`PollingContext`]: the checkpoint cursor, the bounded FIFO queue with its
//! counters, the last-known state of every observed order and the runtime
//! queue configuration.

pub mod cache;
pub mod checkpoint;
pub mod context;
pub mod queue;

pub use cache::StateCache;
pub use checkpoint::CheckpointTracker;
pub use context::{Observation, PollingContext};
pub use queue::OrderQueue;

use readybot_types::{OrderId, QueueConfigError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
	#[error("Queue is full ({capacity} orders)")]
	QueueFull { capacity: usize },
	#[error("Order {0} is already queued")]
	AlreadyQueued(OrderId),
	#[error("Invalid queue configuration: {0}")]
	InvalidConfig(#[from] QueueConfigError),
}
