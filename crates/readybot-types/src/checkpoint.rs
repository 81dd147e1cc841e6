//! Cursor into the upstream order stream.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque position in the upstream order stream.
///
/// The upstream reports millisecond timestamps, sometimes as JSON numbers and
/// sometimes as strings. Two purely numeric checkpoints compare numerically;
/// anything else compares lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(String);

impl Checkpoint {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Checkpoint for the current wall-clock time in milliseconds.
	pub fn now() -> Self {
		Self(chrono::Utc::now().timestamp_millis().to_string())
	}

	/// Converts the `checkpoint` field of an upstream response.
	pub fn from_json(value: &serde_json::Value) -> Option<Self> {
		match value {
			serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
			serde_json::Value::Number(n) => Some(Self(n.to_string())),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	fn numeric(&self) -> Option<u128> {
		if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
			return None;
		}
		self.0.parse().ok()
	}
}

impl Ord for Checkpoint {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self.numeric(), other.numeric()) {
			(Some(a), Some(b)) => a.cmp(&b),
			_ => self.0.cmp(&other.0),
		}
	}
}

impl PartialOrd for Checkpoint {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl fmt::Display for Checkpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Checkpoint {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<u64> for Checkpoint {
	fn from(value: u64) -> Self {
		Self(value.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_numeric_comparison() {
		// Lexicographically "9" > "10"; numerically it is not.
		assert!(Checkpoint::from("10") > Checkpoint::from("9"));
		assert!(Checkpoint::from(1_700_000_000_001u64) > Checkpoint::from(1_700_000_000_000u64));
	}

	#[test]
	fn test_lexicographic_fallback() {
		assert!(Checkpoint::from("b") > Checkpoint::from("a"));
		assert!(Checkpoint::from("2024-01-02") > Checkpoint::from("2024-01-01"));
	}

	#[test]
	fn test_from_json() {
		assert_eq!(
			Checkpoint::from_json(&json!(1700000000000u64)),
			Some(Checkpoint::from("1700000000000"))
		);
		assert_eq!(
			Checkpoint::from_json(&json!("1700000000000")),
			Some(Checkpoint::from("1700000000000"))
		);
		assert_eq!(Checkpoint::from_json(&json!(null)), None);
		assert_eq!(Checkpoint::from_json(&json!("")), None);
	}
}
