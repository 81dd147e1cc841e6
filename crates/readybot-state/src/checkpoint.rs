//! Monotonic checkpoint cursor.

use parking_lot::RwLock;
use readybot_types::Checkpoint;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct CheckpointTracker {
	current: RwLock<Option<Checkpoint>>,
}

impl CheckpointTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the cursor to "now" unless it is already set. Returns the
	/// effective checkpoint.
	pub fn initialize(&self) -> Checkpoint {
		let mut current = self.current.write();
		match current.as_ref() {
			Some(checkpoint) => checkpoint.clone(),
			None => {
				let checkpoint = Checkpoint::now();
				info!(checkpoint = %checkpoint, "Checkpoint initialized");
				*current = Some(checkpoint.clone());
				checkpoint
			}
		}
	}

	pub fn current(&self) -> Option<Checkpoint> {
		self.current.read().clone()
	}

	/// Moves the cursor forward to `candidate` if it is newer. Returns
	/// whether the cursor moved.
	pub fn advance(&self, candidate: &Checkpoint) -> bool {
		let mut current = self.current.write();
		match current.as_ref() {
			Some(existing) if candidate <= existing => {
				debug!(current = %existing, candidate = %candidate, "Ignoring stale checkpoint");
				false
			}
			_ => {
				debug!(checkpoint = %candidate, "Checkpoint advanced");
				*current = Some(candidate.clone());
				true
			}
		}
	}
}
