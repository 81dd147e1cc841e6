// readybot-core/src/drain.rs

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Single-flight state of queue draining: `Idle -> Draining -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
	Idle,
	Draining,
}

impl std::fmt::Display for DrainState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Idle => write!(f, "Idle"),
			Self::Draining => write!(f, "Draining"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct DrainGate {
	state: Arc<Mutex<DrainState>>,
}

impl DrainGate {
	pub fn new() -> Self {
		Self {
			state: Arc::new(Mutex::new(DrainState::Idle)),
		}
	}

	/// Moves to `Draining` if idle. The returned guard moves back to `Idle`
	/// when dropped, including when the drain future is cancelled.
	pub fn try_begin(&self) -> Option<DrainGuard> {
		let mut state = self.state.lock();
		if *state == DrainState::Draining {
			return None;
		}
		*state = DrainState::Draining;
		debug!("Drain state changed: {} -> {}", DrainState::Idle, DrainState::Draining);
		Some(DrainGuard {
			state: self.state.clone(),
		})
	}

	pub fn state(&self) -> DrainState {
		*self.state.lock()
	}

	pub fn is_draining(&self) -> bool {
		self.state() == DrainState::Draining
	}
}

impl Default for DrainGate {
	fn default() -> Self {
		Self::new()
	}
}

pub struct DrainGuard {
	state: Arc<Mutex<DrainState>>,
}

impl Drop for DrainGuard {
	fn drop(&mut self) {
		*self.state.lock() = DrainState::Idle;
		debug!("Drain state changed: {} -> {}", DrainState::Draining, DrainState::Idle);
	}
}
