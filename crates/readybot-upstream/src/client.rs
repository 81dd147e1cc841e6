//! Operational client over the raw order API.

use crate::classification::{classify, Classification};
use crate::retry::RetryPolicy;
use crate::{ApiFailure, OrderApi, OrdersQuery, UpstreamError};
use readybot_auth::CredentialManager;
use readybot_config::DEFAULT_AREA_CODES;
use readybot_storage::{CancelledOrderLog, SiteRegistry};
use readybot_types::{Checkpoint, Credential, Order, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Result of fetching one store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreFetch {
	pub store: String,
	pub orders: Vec<Order>,
	pub classification: Classification,
	/// Cursor reported by the upstream for this store.
	pub checkpoint: Option<Checkpoint>,
	/// Cancelled orders newly written to the audit log.
	pub cancelled_recorded: usize,
}

impl StoreFetch {
	fn store_result(&self) -> StoreResult {
		StoreResult {
			store: self.store.clone(),
			success: true,
			error: None,
			checkpoint: self.checkpoint.clone(),
			total_orders: self.orders.len(),
			valid_orders: self.classification.valid.len(),
			skipped_orders: self.classification.skipped.len(),
			cancelled_orders: self.classification.cancelled.len(),
			processed_successes: 0,
			processed_errors: 0,
		}
	}
}

/// Result of fetching every active store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepFetch {
	pub fetches: Vec<StoreFetch>,
	/// One entry per store, failed ones included.
	pub store_results: Vec<StoreResult>,
	/// Highest cursor reported by any store.
	pub checkpoint: Option<Checkpoint>,
}

impl SweepFetch {
	/// Every fetched order, in store order.
	pub fn orders(&self) -> impl Iterator<Item = &Order> {
		self.fetches.iter().flat_map(|fetch| fetch.orders.iter())
	}

	/// READY orders of every store.
	pub fn valid_orders(&self) -> impl Iterator<Item = &Order> {
		self.fetches
			.iter()
			.flat_map(|fetch| fetch.classification.valid.iter())
	}
}

pub struct UpstreamClient {
	api: Arc<dyn OrderApi>,
	credentials: Arc<CredentialManager>,
	audit: Arc<CancelledOrderLog>,
	restaurants: Arc<SiteRegistry>,
	areas: Arc<SiteRegistry>,
	retry: RetryPolicy,
	store_delay: Duration,
}

impl UpstreamClient {
	pub fn new(
		api: Arc<dyn OrderApi>,
		credentials: Arc<CredentialManager>,
		audit: Arc<CancelledOrderLog>,
		restaurants: Arc<SiteRegistry>,
		areas: Arc<SiteRegistry>,
	) -> Self {
		Self {
			api,
			credentials,
			audit,
			restaurants,
			areas,
			retry: RetryPolicy::new(Duration::from_secs(2), 3),
			store_delay: Duration::from_millis(100),
		}
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_store_delay(mut self, store_delay: Duration) -> Self {
		self.store_delay = store_delay;
		self
	}

	pub fn credentials(&self) -> &Arc<CredentialManager> {
		&self.credentials
	}

	/// Fetches and classifies the orders of one store.
	///
	/// Transient failures are retried with backoff. A 401 triggers one token
	/// refresh and one more attempt; a second 401 is [`UpstreamError::AuthExpired`].
	/// Cancelled orders are written to the audit log.
	#[instrument(skip(self, credential, areas), fields(checkpoint = %checkpoint))]
	pub async fn fetch_orders(
		&self,
		credential: &Credential,
		store: &str,
		checkpoint: &Checkpoint,
		areas: &[String],
	) -> Result<StoreFetch, UpstreamError> {
		let query = OrdersQuery {
			checkpoint: checkpoint.clone(),
			store: store.to_string(),
			areas: areas.to_vec(),
		};

		let mut credential = credential.clone();
		let mut refreshed = false;
		let page = loop {
			let attempt = self
				.retry
				.run("Order fetch", || self.api.get_orders(&credential, &query))
				.await;

			match attempt {
				Ok(page) => break page,
				Err(ApiFailure::Unauthorized) if !refreshed => {
					credential = self
						.credentials
						.handle_token_expiration(&credential)
						.await
						.map_err(UpstreamError::CredentialUnavailable)?;
					refreshed = true;
				}
				Err(ApiFailure::Unauthorized) => {
					error!("Token rejected again after refresh");
					return Err(UpstreamError::AuthExpired);
				}
				Err(e) => return Err(UpstreamError::Transient(e.to_string())),
			}
		};

		let classification = classify(&page.orders);
		let cancelled_recorded = if classification.cancelled.is_empty() {
			0
		} else {
			match self.audit.record_all(&classification.cancelled).await {
				Ok(inserted) => inserted,
				Err(e) => {
					warn!(error = %e, "Failed to record cancelled orders");
					0
				}
			}
		};

		info!(
			total = page.orders.len(),
			valid = classification.valid.len(),
			skipped = classification.skipped.len(),
			cancelled = classification.cancelled.len(),
			"Orders fetched"
		);

		Ok(StoreFetch {
			store: store.to_string(),
			orders: page.orders,
			classification,
			checkpoint: page.checkpoint,
			cancelled_recorded,
		})
	}

	/// Marks one order FULL_READY, with a single refresh-and-retry on 401.
	#[instrument(skip(self, credential))]
	pub async fn mark_order_ready(
		&self,
		credential: &Credential,
		order_id: &str,
	) -> Result<serde_json::Value, UpstreamError> {
		let failed = |cause: String| UpstreamError::TransitionFailed {
			order_id: order_id.to_string(),
			cause,
		};

		match self.api.post_transition(credential, order_id).await {
			Ok(response) => Ok(response),
			Err(ApiFailure::Unauthorized) => {
				let renewed = self
					.credentials
					.handle_token_expiration(credential)
					.await
					.map_err(|e| failed(e.to_string()))?;
				self.api
					.post_transition(&renewed, order_id)
					.await
					.map_err(|e| failed(e.to_string()))
			}
			Err(e) => Err(failed(e.to_string())),
		}
	}

	/// Active store codes and the area codes to fetch them with.
	pub async fn fetch_targets(&self) -> Result<(Vec<String>, Vec<String>), UpstreamError> {
		let stores = self.restaurants.active_codes().await?;
		let mut areas = self.areas.active_codes().await?;
		if areas.is_empty() {
			areas = DEFAULT_AREA_CODES.iter().map(|c| c.to_string()).collect();
		}
		Ok((stores, areas))
	}

	/// Fetches every active store at `checkpoint`, one after the other.
	///
	/// A failing store is recorded and skipped; only credential failures
	/// abort the sweep.
	#[instrument(skip(self), fields(checkpoint = %checkpoint))]
	pub async fn fetch_all_stores(&self, checkpoint: &Checkpoint) -> Result<SweepFetch, UpstreamError> {
		let (stores, areas) = self.fetch_targets().await?;
		if stores.is_empty() {
			warn!("No active restaurants configured");
			return Ok(SweepFetch::default());
		}

		let mut sweep = SweepFetch::default();
		for (index, store) in stores.iter().enumerate() {
			if index > 0 && !self.store_delay.is_zero() {
				tokio::time::sleep(self.store_delay).await;
			}

			let credential = self
				.credentials
				.get_or_refresh_token()
				.await
				.map_err(UpstreamError::CredentialUnavailable)?;

			match self.fetch_orders(&credential, store, checkpoint, &areas).await {
				Ok(fetch) => {
					if let Some(reported) = &fetch.checkpoint {
						if sweep.checkpoint.as_ref().map_or(true, |max| reported > max) {
							sweep.checkpoint = Some(reported.clone());
						}
					}
					sweep.store_results.push(fetch.store_result());
					sweep.fetches.push(fetch);
				}
				Err(e) if e.is_credential_failure() => {
					error!(store = %store, error = %e, "Aborting fetch, no usable credential");
					return Err(e);
				}
				Err(e) => {
					warn!(store = %store, error = %e, "Store fetch failed");
					sweep.store_results.push(StoreResult::failed(store.clone(), e.to_string()));
				}
			}
		}

		debug!(
			stores = stores.len(),
			failed = sweep.store_results.iter().filter(|r| !r.success).count(),
			"Store sweep finished"
		);
		Ok(sweep)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::OrdersPage;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use readybot_auth::{CredentialError, TokenIssuer};
	use readybot_storage::{Site, SiteKind, SettingsStore, StorageService};
	use readybot_types::OrderState;
	use std::collections::{HashMap, VecDeque};

	/// Order API answering from per-store scripts.
	#[derive(Default)]
	struct ScriptedApi {
		pages: Mutex<HashMap<String, VecDeque<Result<OrdersPage, ApiFailure>>>>,
		transitions: Mutex<VecDeque<Result<serde_json::Value, ApiFailure>>>,
		tokens_seen: Mutex<Vec<String>>,
	}

	impl ScriptedApi {
		fn page(&self, store: &str, result: Result<OrdersPage, ApiFailure>) {
			self.pages
				.lock()
				.entry(store.to_string())
				.or_default()
				.push_back(result);
		}

		fn transition(&self, result: Result<serde_json::Value, ApiFailure>) {
			self.transitions.lock().push_back(result);
		}
	}

	#[async_trait]
	impl OrderApi for ScriptedApi {
		async fn get_orders(
			&self,
			credential: &Credential,
			query: &OrdersQuery,
		) -> Result<OrdersPage, ApiFailure> {
			self.tokens_seen.lock().push(credential.token.clone());
			self.pages
				.lock()
				.get_mut(&query.store)
				.and_then(|script| script.pop_front())
				.unwrap_or_else(|| Err(ApiFailure::Network("unscripted".to_string())))
		}

		async fn post_transition(
			&self,
			credential: &Credential,
			_order_id: &str,
		) -> Result<serde_json::Value, ApiFailure> {
			self.tokens_seen.lock().push(credential.token.clone());
			self.transitions
				.lock()
				.pop_front()
				.unwrap_or(Ok(serde_json::Value::Null))
		}
	}

	struct SequenceIssuer(Mutex<VecDeque<&'static str>>);

	#[async_trait]
	impl TokenIssuer for SequenceIssuer {
		async fn issue_token(&self) -> Result<String, CredentialError> {
			self.0
				.lock()
				.pop_front()
				.map(str::to_string)
				.ok_or_else(|| CredentialError::Issuer("down".to_string()))
		}
	}

	struct Fixture {
		api: Arc<ScriptedApi>,
		client: UpstreamClient,
		audit: Arc<CancelledOrderLog>,
		restaurants: Arc<SiteRegistry>,
	}

	async fn fixture(tokens: Vec<&'static str>) -> Fixture {
		let storage = Arc::new(StorageService::in_memory());
		let settings = Arc::new(SettingsStore::new(storage.clone()));
		let credentials = Arc::new(CredentialManager::new(
			Arc::new(SequenceIssuer(Mutex::new(tokens.into()))),
			settings,
			None,
		));
		let audit = Arc::new(CancelledOrderLog::new(storage.clone()));
		let restaurants = Arc::new(SiteRegistry::new(storage.clone(), SiteKind::Restaurant));
		let areas = Arc::new(SiteRegistry::new(storage, SiteKind::Area));
		let api = Arc::new(ScriptedApi::default());

		let client = UpstreamClient::new(
			api.clone(),
			credentials,
			audit.clone(),
			restaurants.clone(),
			areas,
		)
		.with_retry_policy(RetryPolicy::new(Duration::from_millis(10), 3))
		.with_store_delay(Duration::ZERO);

		Fixture {
			api,
			client,
			audit,
			restaurants,
		}
	}

	fn page(orders: &[(&str, OrderState)], checkpoint: u64) -> OrdersPage {
		OrdersPage {
			orders: orders
				.iter()
				.map(|(id, state)| Order::new(*id, "", state.clone()))
				.collect(),
			checkpoint: Some(Checkpoint::from(checkpoint)),
		}
	}

	fn areas() -> Vec<String> {
		vec!["MCC".to_string()]
	}

	#[tokio::test]
	async fn test_refresh_on_401_returns_retry_data() {
		let f = fixture(vec!["first", "second"]).await;
		f.api.page("S1", Err(ApiFailure::Unauthorized));
		f.api.page("S1", Ok(page(&[("A1", OrderState::Ready)], 10)));

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		let fetch = f
			.client
			.fetch_orders(&credential, "S1", &Checkpoint::from(1u64), &areas())
			.await
			.unwrap();

		assert_eq!(fetch.classification.valid.len(), 1);
		assert_eq!(fetch.checkpoint, Some(Checkpoint::from(10u64)));
		assert_eq!(*f.api.tokens_seen.lock(), vec!["first", "second"]);
	}

	#[tokio::test]
	async fn test_second_401_is_auth_expired() {
		let f = fixture(vec!["first", "second"]).await;
		f.api.page("S1", Err(ApiFailure::Unauthorized));
		f.api.page("S1", Err(ApiFailure::Unauthorized));

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		let err = f
			.client
			.fetch_orders(&credential, "S1", &Checkpoint::from(1u64), &areas())
			.await
			.unwrap_err();

		assert!(matches!(err, UpstreamError::AuthExpired));
	}

	#[tokio::test]
	async fn test_refresh_failure_is_credential_unavailable() {
		let f = fixture(vec!["only"]).await;
		f.api.page("S1", Err(ApiFailure::Unauthorized));

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		let err = f
			.client
			.fetch_orders(&credential, "S1", &Checkpoint::from(1u64), &areas())
			.await
			.unwrap_err();

		assert!(matches!(err, UpstreamError::CredentialUnavailable(_)));
	}

	#[tokio::test]
	async fn test_transient_errors_exhaust_retries() {
		let f = fixture(vec!["tok"]).await;
		for _ in 0..4 {
			f.api.page("S1", Err(ApiFailure::Network("reset".to_string())));
		}

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		let err = f
			.client
			.fetch_orders(&credential, "S1", &Checkpoint::from(1u64), &areas())
			.await
			.unwrap_err();

		assert!(matches!(err, UpstreamError::Transient(_)));
		assert_eq!(f.api.tokens_seen.lock().len(), 4);
	}

	#[tokio::test]
	async fn test_classification_records_cancelled_once() {
		let f = fixture(vec!["tok"]).await;
		let orders = [
			("A1", OrderState::Ready),
			("A2", OrderState::FullReady),
			("A3", OrderState::Cancelled),
		];
		f.api.page("S1", Ok(page(&orders, 10)));
		f.api.page("S1", Ok(page(&orders, 11)));

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		let first = f
			.client
			.fetch_orders(&credential, "S1", &Checkpoint::from(1u64), &areas())
			.await
			.unwrap();
		let second = f
			.client
			.fetch_orders(&credential, "S1", &Checkpoint::from(10u64), &areas())
			.await
			.unwrap();

		let valid: Vec<_> = first.classification.valid.iter().map(|o| &o.id).collect();
		assert_eq!(valid, vec!["A1"]);
		assert_eq!(first.classification.skipped[0].id, "A2");
		assert_eq!(first.classification.cancelled[0].id, "A3");
		assert_eq!(first.cancelled_recorded, 1);
		assert_eq!(second.cancelled_recorded, 0);

		let audited = f.audit.list(100).await.unwrap();
		assert_eq!(audited.len(), 1);
		assert_eq!(audited[0].id, "A3");
	}

	#[tokio::test]
	async fn test_mark_order_ready_refreshes_once() {
		let f = fixture(vec!["first", "second"]).await;
		f.api.transition(Err(ApiFailure::Unauthorized));
		f.api.transition(Ok(serde_json::json!({ "ok": true })));

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		f.client.mark_order_ready(&credential, "A1").await.unwrap();
		assert_eq!(*f.api.tokens_seen.lock(), vec!["first", "second"]);
	}

	#[tokio::test]
	async fn test_mark_order_ready_failure_names_the_order() {
		let f = fixture(vec!["tok"]).await;
		f.api.transition(Err(ApiFailure::Status {
			code: 409,
			body: "already FULL_READY".to_string(),
		}));

		let credential = f.client.credentials().get_or_refresh_token().await.unwrap();
		let err = f.client.mark_order_ready(&credential, "A1").await.unwrap_err();
		assert!(matches!(
			err,
			UpstreamError::TransitionFailed { ref order_id, .. } if order_id == "A1"
		));
	}

	#[tokio::test]
	async fn test_sweep_isolates_store_failures_and_keeps_max_checkpoint() {
		let f = fixture(vec!["tok"]).await;
		for code in ["S1", "S2", "S3"] {
			f.restaurants.add(Site::new(code, code)).await.unwrap();
		}
		f.api.page("S1", Ok(page(&[("A1", OrderState::Ready)], 30)));
		for _ in 0..4 {
			f.api.page("S2", Err(ApiFailure::Status {
				code: 503,
				body: String::new(),
			}));
		}
		f.api.page("S3", Ok(page(&[("B1", OrderState::Ready)], 20)));

		let sweep = f
			.client
			.fetch_all_stores(&Checkpoint::from(1u64))
			.await
			.unwrap();

		assert_eq!(sweep.store_results.len(), 3);
		assert!(sweep.store_results[0].success);
		assert!(!sweep.store_results[1].success);
		assert!(sweep.store_results[2].success);
		assert_eq!(sweep.checkpoint, Some(Checkpoint::from(30u64)));
		let valid: Vec<_> = sweep.valid_orders().map(|o| o.id.as_str()).collect();
		assert_eq!(valid, vec!["A1", "B1"]);
	}

	#[tokio::test]
	async fn test_sweep_aborts_on_credential_failure() {
		let f = fixture(vec!["tok"]).await;
		for code in ["S1", "S2"] {
			f.restaurants.add(Site::new(code, code)).await.unwrap();
		}
		f.api.page("S1", Err(ApiFailure::Unauthorized));
		f.api.page("S2", Ok(page(&[("B1", OrderState::Ready)], 20)));

		let err = f
			.client
			.fetch_all_stores(&Checkpoint::from(1u64))
			.await
			.unwrap_err();
		assert!(err.is_credential_failure());
		// S2 was never asked.
		assert_eq!(f.api.tokens_seen.lock().len(), 1);
	}

	#[tokio::test]
	async fn test_default_areas_when_none_active() {
		let f = fixture(vec!["tok"]).await;
		let (_, areas) = f.client.fetch_targets().await.unwrap();
		assert_eq!(areas, vec!["MCC", "CDP", "CHK", "BKF", "DLV"]);
	}
}
