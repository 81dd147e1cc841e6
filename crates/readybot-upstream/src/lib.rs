//! Client for the upstream order API.
//!
//! The [`OrderApi`] trait is the raw HTTP contract: one orders page per
//! store and one "mark ready" transition per order. [`UpstreamClient`] layers
//! the operational policy on top of it: bounded retries with exponential
//! backoff, a single token refresh on 401, classification of the fetched
//! orders, audit recording of cancelled orders and multi-store sweeps.

use async_trait::async_trait;
use readybot_auth::CredentialError;
use readybot_storage::StorageError;
use readybot_types::{Checkpoint, Credential, Order};
use thiserror::Error;

pub mod classification;
pub mod client;
pub mod retry;

pub mod implementations {
	pub mod http;
}

pub use classification::{classify, Classification};
pub use client::{StoreFetch, SweepFetch, UpstreamClient};
pub use implementations::http::HttpOrderApi;
pub use retry::RetryPolicy;

/// Failure of a single raw API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiFailure {
	#[error("Unauthorized")]
	Unauthorized,
	#[error("HTTP {code}: {body}")]
	Status { code: u16, body: String },
	#[error("Network error: {0}")]
	Network(String),
	#[error("Invalid response: {0}")]
	Decode(String),
}

impl ApiFailure {
	/// Authentication failures are handled by refreshing the token, never by
	/// backing off. An unparseable body will not parse on a second attempt.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Unauthorized | Self::Decode(_))
	}
}

#[derive(Debug, Error)]
pub enum UpstreamError {
	#[error("Credential unavailable: {0}")]
	CredentialUnavailable(#[source] CredentialError),
	#[error("Upstream still rejects the token after a refresh")]
	AuthExpired,
	#[error("Upstream request failed: {0}")]
	Transient(String),
	#[error("Transition failed for order {order_id}: {cause}")]
	TransitionFailed { order_id: String, cause: String },
	#[error("Site registry error: {0}")]
	Sites(#[from] StorageError),
}

impl UpstreamError {
	/// Errors that make every further call of the current cycle pointless.
	pub fn is_credential_failure(&self) -> bool {
		matches!(self, Self::CredentialUnavailable(_) | Self::AuthExpired)
	}
}

/// Parameters of one orders fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdersQuery {
	pub checkpoint: Checkpoint,
	pub store: String,
	pub areas: Vec<String>,
}

/// One page of orders and the cursor reported with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrdersPage {
	pub orders: Vec<Order>,
	pub checkpoint: Option<Checkpoint>,
}

/// Raw upstream order API.
#[async_trait]
pub trait OrderApi: Send + Sync {
	async fn get_orders(
		&self,
		credential: &Credential,
		query: &OrdersQuery,
	) -> Result<OrdersPage, ApiFailure>;

	/// Requests the FULL_READY transition for one order.
	async fn post_transition(
		&self,
		credential: &Credential,
		order_id: &str,
	) -> Result<serde_json::Value, ApiFailure>;
}
