//! Orders as reported by the upstream order API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque upstream order identifier.
pub type OrderId = String;

/// Lifecycle state of an upstream order.
///
/// States this system does not recognise are preserved verbatim in
/// `Unknown` so that transitions between two unknown states are still
/// observable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderState {
	Ready,
	FullReady,
	Delivering,
	Delivered,
	Cancelled,
	Unknown(String),
}

impl OrderState {
	pub fn as_str(&self) -> &str {
		match self {
			Self::Ready => "READY",
			Self::FullReady => "FULL_READY",
			Self::Delivering => "DELIVERING",
			Self::Delivered => "DELIVERED",
			Self::Cancelled => "CANCELLED",
			Self::Unknown(raw) => raw,
		}
	}

	/// Whether the order is a candidate for the "mark ready" transition.
	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready)
	}

	/// States the bot never acts on again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::FullReady | Self::Delivering | Self::Delivered)
	}
}

impl From<&str> for OrderState {
	fn from(raw: &str) -> Self {
		match raw {
			"READY" => Self::Ready,
			"FULL_READY" => Self::FullReady,
			"DELIVERING" => Self::Delivering,
			"DELIVERED" => Self::Delivered,
			"CANCELLED" => Self::Cancelled,
			other => Self::Unknown(other.to_string()),
		}
	}
}

impl From<String> for OrderState {
	fn from(raw: String) -> Self {
		Self::from(raw.as_str())
	}
}

impl From<OrderState> for String {
	fn from(state: OrderState) -> Self {
		state.as_str().to_string()
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An order observed upstream.
///
/// The upstream payload does not carry the store code; it is filled in by
/// the client from the store the order was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	pub id: OrderId,
	#[serde(default)]
	pub store: String,
	pub current_state: OrderState,
}

impl Order {
	pub fn new(id: impl Into<OrderId>, store: impl Into<String>, state: OrderState) -> Self {
		Self {
			id: id.into(),
			store: store.into(),
			current_state: state,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_parsing() {
		assert_eq!(OrderState::from("READY"), OrderState::Ready);
		assert_eq!(OrderState::from("FULL_READY"), OrderState::FullReady);
		assert_eq!(OrderState::from("CANCELLED"), OrderState::Cancelled);
		assert_eq!(
			OrderState::from("PREPARING"),
			OrderState::Unknown("PREPARING".to_string())
		);
		assert_eq!(OrderState::from("PREPARING").to_string(), "PREPARING");
	}

	#[test]
	fn test_terminal_states() {
		assert!(OrderState::Delivered.is_terminal());
		assert!(OrderState::FullReady.is_terminal());
		assert!(!OrderState::Ready.is_terminal());
		assert!(!OrderState::Cancelled.is_terminal());
	}

	#[test]
	fn test_order_deserializes_upstream_shape() {
		let order: Order = serde_json::from_value(serde_json::json!({
			"id": "A1",
			"currentState": "READY",
			"customer": "ignored"
		}))
		.unwrap();

		assert_eq!(order.id, "A1");
		assert_eq!(order.store, "");
		assert!(order.current_state.is_ready());
	}
}
