//! Sorting fetched orders by what the bot should do with them.

use chrono::Utc;
use readybot_types::{CancelledOrder, Order, OrderState, SkipReason, SkippedOrder};

/// Fetched orders split by lifecycle state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
	/// READY orders, candidates for the transition.
	pub valid: Vec<Order>,
	pub skipped: Vec<SkippedOrder>,
	/// CANCELLED orders, to be audited.
	pub cancelled: Vec<CancelledOrder>,
}

impl Classification {
	pub fn total(&self) -> usize {
		self.valid.len() + self.skipped.len() + self.cancelled.len()
	}
}

pub fn classify(orders: &[Order]) -> Classification {
	let mut classification = Classification::default();

	for order in orders {
		let skip = |reason| SkippedOrder {
			id: order.id.clone(),
			state: order.current_state.clone(),
			reason,
		};

		match &order.current_state {
			OrderState::Ready => classification.valid.push(order.clone()),
			OrderState::FullReady => classification
				.skipped
				.push(skip(SkipReason::AlreadyProcessed)),
			OrderState::Delivering | OrderState::Delivered => {
				classification.skipped.push(skip(SkipReason::InDelivery))
			}
			OrderState::Cancelled => classification.cancelled.push(CancelledOrder {
				id: order.id.clone(),
				store: order.store.clone(),
				state: OrderState::Cancelled,
				reason: "Order cancelled upstream".to_string(),
				timestamp: Utc::now(),
			}),
			OrderState::Unknown(_) => classification
				.skipped
				.push(skip(SkipReason::UnknownState)),
		}
	}

	classification
}
