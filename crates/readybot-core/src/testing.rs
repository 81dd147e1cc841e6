//! In-process fakes shared by the unit tests of this crate.

use crate::processor::BatchProcessor;
use async_trait::async_trait;
use parking_lot::Mutex;
use readybot_auth::{CredentialError, CredentialManager, TokenIssuer};
use readybot_state::PollingContext;
use readybot_storage::{CancelledOrderLog, SettingsStore, Site, SiteKind, SiteRegistry, StorageService};
use readybot_types::{Checkpoint, Credential, Order, OrderState, QueueConfig};
use readybot_upstream::{ApiFailure, OrderApi, OrdersPage, OrdersQuery, RetryPolicy, UpstreamClient};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub fn ready(id: &str, store: &str) -> Order {
	Order::new(id, store, OrderState::Ready)
}

/// Order API serving a fixed page per store and recording transitions.
#[derive(Default)]
pub struct FakeApi {
	pages: Mutex<HashMap<String, OrdersPage>>,
	failing: Mutex<HashMap<String, ApiFailure>>,
	transitions: Mutex<Vec<(String, Instant)>>,
	fetches: Mutex<Vec<OrdersQuery>>,
	fetch_delay: Mutex<Duration>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl FakeApi {
	pub fn page(&self, store: &str, orders: &[(&str, OrderState)], checkpoint: u64) {
		let page = OrdersPage {
			orders: orders
				.iter()
				.map(|(id, state)| Order::new(*id, store, state.clone()))
				.collect(),
			checkpoint: Some(Checkpoint::from(checkpoint)),
		};
		self.pages.lock().insert(store.to_string(), page);
	}

	pub fn set_fetch_delay(&self, delay: Duration) {
		*self.fetch_delay.lock() = delay;
	}

	pub fn max_concurrent_fetches(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	pub fn fail_transition(&self, order_id: &str, failure: ApiFailure) {
		self.failing.lock().insert(order_id.to_string(), failure);
	}

	pub fn transition_times(&self) -> Vec<Instant> {
		self.transitions.lock().iter().map(|(_, at)| *at).collect()
	}

	pub fn transitioned(&self) -> Vec<String> {
		self.transitions.lock().iter().map(|(id, _)| id.clone()).collect()
	}

	pub fn fetched_checkpoints(&self) -> Vec<Checkpoint> {
		self.fetches.lock().iter().map(|q| q.checkpoint.clone()).collect()
	}
}

#[async_trait]
impl OrderApi for FakeApi {
	async fn get_orders(&self, _credential: &Credential, query: &OrdersQuery) -> Result<OrdersPage, ApiFailure> {
		self.fetches.lock().push(query.clone());
		let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(running, Ordering::SeqCst);

		let delay = *self.fetch_delay.lock();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		Ok(self.pages.lock().get(&query.store).cloned().unwrap_or_default())
	}

	async fn post_transition(&self, _credential: &Credential, order_id: &str) -> Result<serde_json::Value, ApiFailure> {
		self.transitions.lock().push((order_id.to_string(), Instant::now()));
		match self.failing.lock().get(order_id) {
			Some(failure) => Err(failure.clone()),
			None => Ok(serde_json::json!({ "id": order_id, "currentState": "FULL_READY" })),
		}
	}
}

pub struct SequenceIssuer(pub Mutex<VecDeque<&'static str>>);

#[async_trait]
impl TokenIssuer for SequenceIssuer {
	async fn issue_token(&self) -> Result<String, CredentialError> {
		self.0
			.lock()
			.pop_front()
			.map(str::to_string)
			.ok_or_else(|| CredentialError::Issuer("token endpoint down".to_string()))
	}
}

pub struct Harness {
	pub api: Arc<FakeApi>,
	pub context: Arc<PollingContext>,
	pub client: Arc<UpstreamClient>,
	pub processor: Arc<BatchProcessor>,
	pub restaurants: Arc<SiteRegistry>,
}

impl Harness {
	pub async fn new(tokens: Vec<&'static str>) -> Self {
		let storage = Arc::new(StorageService::in_memory());
		let settings = Arc::new(SettingsStore::new(storage.clone()));
		let credentials = Arc::new(CredentialManager::new(
			Arc::new(SequenceIssuer(Mutex::new(tokens.into()))),
			settings,
			None,
		));
		let restaurants = Arc::new(SiteRegistry::new(storage.clone(), SiteKind::Restaurant));
		let areas = Arc::new(SiteRegistry::new(storage.clone(), SiteKind::Area));
		let api = Arc::new(FakeApi::default());

		let client = Arc::new(
			UpstreamClient::new(
				api.clone(),
				credentials,
				Arc::new(CancelledOrderLog::new(storage)),
				restaurants.clone(),
				areas,
			)
			.with_retry_policy(RetryPolicy::new(Duration::from_millis(1), 0))
			.with_store_delay(Duration::ZERO),
		);
		let context = Arc::new(PollingContext::new(QueueConfig::default()));
		let processor = Arc::new(BatchProcessor::new(context.clone(), client.clone()));

		Self {
			api,
			context,
			client,
			processor,
			restaurants,
		}
	}

	pub async fn add_store(&self, code: &str) {
		self.restaurants
			.add(Site::new(code, code))
			.await
			.expect("store added");
	}
}
