//! Last-known state of every observed order.

use parking_lot::Mutex;
use readybot_types::{OrderId, OrderState, StatusChange};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Known {
	state: OrderState,
	last_seen_cycle: u64,
}

#[derive(Debug, Default)]
pub struct StateCache {
	entries: Mutex<HashMap<OrderId, Known>>,
}

impl StateCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `state` for `order_id`. Returns the transition when the state
	/// differs from the cached one, including the first sighting.
	pub fn observe(&self, order_id: &str, state: &OrderState, cycle: u64) -> Option<StatusChange> {
		let mut entries = self.entries.lock();
		match entries.get_mut(order_id) {
			Some(known) => {
				known.last_seen_cycle = cycle;
				if &known.state == state {
					return None;
				}
				let previous = std::mem::replace(&mut known.state, state.clone());
				Some(StatusChange::new(Some(previous), state.clone()))
			}
			None => {
				entries.insert(
					order_id.to_string(),
					Known {
						state: state.clone(),
						last_seen_cycle: cycle,
					},
				);
				Some(StatusChange::new(None, state.clone()))
			}
		}
	}

	pub fn get(&self, order_id: &str) -> Option<OrderState> {
		self.entries.lock().get(order_id).map(|k| k.state.clone())
	}

	/// Drops the given orders so that their next sighting counts as new.
	pub fn forget(&self, order_ids: &[OrderId]) {
		let mut entries = self.entries.lock();
		for id in order_ids {
			entries.remove(id);
		}
	}

	/// Drops entries not seen for more than `max_idle_cycles` cycles.
	/// Zero disables eviction.
	pub fn evict_idle(&self, current_cycle: u64, max_idle_cycles: u64) -> usize {
		if max_idle_cycles == 0 {
			return 0;
		}
		let mut entries = self.entries.lock();
		let before = entries.len();
		entries.retain(|_, known| current_cycle.saturating_sub(known.last_seen_cycle) <= max_idle_cycles);
		before - entries.len()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}
}
