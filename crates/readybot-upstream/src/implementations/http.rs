//! reqwest implementation of the order API.

use crate::{ApiFailure, OrderApi, OrdersPage, OrdersQuery};
use async_trait::async_trait;
use readybot_config::UpstreamConfig;
use readybot_types::{Checkpoint, Credential, Order, OrderState};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// `{ data: { orders, checkpoint } }`. Missing or null parts read as empty.
#[derive(Debug, Default, Deserialize)]
struct OrdersEnvelope {
	#[serde(default)]
	data: Option<OrdersData>,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersData {
	#[serde(default)]
	orders: Option<Vec<Value>>,
	#[serde(default)]
	checkpoint: Value,
}

/// Reads one order entry. A string or numeric `id` is accepted; a missing or
/// non-string `currentState` becomes an unknown state, which is skipped
/// downstream. Entries without an id are dropped.
fn parse_order(entry: &Value, store: &str) -> Option<Order> {
	let id = match entry.get("id") {
		Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
		Some(Value::Number(id)) => id.to_string(),
		_ => {
			warn!(store = %store, entry = %entry, "Dropping order without a usable id");
			return None;
		}
	};

	let state = match entry.get("currentState") {
		Some(Value::String(state)) => OrderState::from(state.as_str()),
		_ => OrderState::Unknown(String::new()),
	};

	Some(Order::new(id, store, state))
}

pub struct HttpOrderApi {
	client: reqwest::Client,
	orders_url: String,
	brand: String,
	country: String,
	fetch_timeout: Duration,
	transition_timeout: Duration,
}

impl HttpOrderApi {
	pub fn new(config: &UpstreamConfig) -> Result<Self, ApiFailure> {
		let client = reqwest::Client::builder()
			.build()
			.map_err(|e| ApiFailure::Network(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			client,
			orders_url: format!("{}/orders", config.base_url.trim_end_matches('/')),
			brand: config.brand.clone(),
			country: config.country.clone(),
			fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
			transition_timeout: Duration::from_millis(config.transition_timeout_ms),
		})
	}

	fn request(&self, builder: reqwest::RequestBuilder, credential: &Credential) -> reqwest::RequestBuilder {
		builder
			.header(header::AUTHORIZATION, credential.authorization())
			.header(header::ACCEPT, "application/json")
			.header(header::CONTENT_TYPE, "application/json")
	}
}

async fn read_body(response: reqwest::Response) -> Result<String, ApiFailure> {
	let status = response.status();
	if status == StatusCode::UNAUTHORIZED {
		return Err(ApiFailure::Unauthorized);
	}

	let body = response
		.text()
		.await
		.map_err(|e| ApiFailure::Network(e.to_string()))?;

	if !status.is_success() {
		return Err(ApiFailure::Status {
			code: status.as_u16(),
			body: body.chars().take(200).collect(),
		});
	}
	Ok(body)
}

#[async_trait]
impl OrderApi for HttpOrderApi {
	async fn get_orders(
		&self,
		credential: &Credential,
		query: &OrdersQuery,
	) -> Result<OrdersPage, ApiFailure> {
		let areas = query.areas.join("|");
		debug!(store = %query.store, checkpoint = %query.checkpoint, "Fetching orders");

		let response = self
			.request(self.client.get(&self.orders_url), credential)
			.timeout(self.fetch_timeout)
			.query(&[
				("checkpoint", query.checkpoint.as_str()),
				("brand", self.brand.as_str()),
				("country", self.country.as_str()),
				("store", query.store.as_str()),
				("area", areas.as_str()),
			])
			.send()
			.await
			.map_err(|e| ApiFailure::Network(e.to_string()))?;

		let body = read_body(response).await?;
		let envelope: OrdersEnvelope =
			serde_json::from_str(&body).map_err(|e| ApiFailure::Decode(e.to_string()))?;
		let data = envelope.data.unwrap_or_default();

		let orders = data
			.orders
			.unwrap_or_default()
			.iter()
			.filter_map(|entry| parse_order(entry, &query.store))
			.collect();

		Ok(OrdersPage {
			orders,
			checkpoint: Checkpoint::from_json(&data.checkpoint),
		})
	}

	async fn post_transition(
		&self,
		credential: &Credential,
		order_id: &str,
	) -> Result<Value, ApiFailure> {
		let response = self
			.request(self.client.post(&self.orders_url), credential)
			.timeout(self.transition_timeout)
			.json(&json!({ "id": order_id, "action": "FULL_READY" }))
			.send()
			.await
			.map_err(|e| ApiFailure::Network(e.to_string()))?;

		let body = read_body(response).await?;
		if body.trim().is_empty() {
			return Ok(Value::Null);
		}
		Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
	}
}
