//! HTTP API over the bot facade.
//!
//! Every endpoint answers `{ success, data | message | error }` JSON.

use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post, put},
	Router,
};
use readybot_core::{CoreError, ReadyBot};
use readybot_storage::{keys, Site, SiteKind, SitePatch, StorageError};
use readybot_types::{Order, OrderState, QueueConfigPatch};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument, warn};

const REDACTED: &str = "********";
const DASHBOARD_CANCELLED_LIMIT: usize = 10;

/// API server for the bot
pub struct ApiServer {
	host: String,
	port: u16,
	bot: Arc<ReadyBot>,
}

impl ApiServer {
	pub fn new(host: impl Into<String>, port: u16, bot: Arc<ReadyBot>) -> Self {
		Self {
			host: host.into(),
			port,
			bot,
		}
	}

	#[instrument(skip(self))]
	pub async fn run(self) -> anyhow::Result<()> {
		let app = router(self.bot);
		let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.host, self.port)).await?;

		info!("API server listening on {}:{}", self.host, self.port);

		axum::serve(listener, app).await?;

		Ok(())
	}
}

#[derive(Clone)]
struct AppState {
	bot: Arc<ReadyBot>,
}

pub fn router(bot: Arc<ReadyBot>) -> Router {
	Router::new()
		// Service endpoints
		.route("/health", get(health_check))
		.route("/status", get(get_status))
		.route("/checkpoint", get(get_checkpoint))
		.route("/dashboard-data", get(get_dashboard_data))
		.route("/reset-store-stats", post(reset_store_stats))
		.route("/process-orders", post(process_orders))
		// Change monitor and queue
		.route("/api/monitoring/start", post(start_monitoring))
		.route("/api/monitoring/stop", post(stop_monitoring))
		.route("/api/monitoring/status", get(monitoring_status))
		.route("/api/monitoring/pending-orders", get(pending_orders))
		.route("/api/monitoring/clear-queue", post(clear_queue))
		.route("/api/monitoring/add-order", post(add_order))
		.route("/api/monitoring/process-queue", post(process_queue))
		.route(
			"/api/monitoring/queue-config",
			get(get_queue_config).put(update_queue_config),
		)
		.route("/api/cron/reconfigure", post(reconfigure_cron))
		.route("/api/orders/process-full-ready", post(process_full_ready))
		.route("/api/cancelled-orders", get(cancelled_orders))
		// Settings and sites
		.route("/api/settings", get(list_settings))
		.route("/api/settings/{key}", put(update_setting))
		.merge(site_routes("/api/restaurants", SiteKind::Restaurant))
		.merge(site_routes("/api/areas", SiteKind::Area))
		.with_state(AppState { bot })
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

fn site_routes(base: &str, kind: SiteKind) -> Router<AppState> {
	Router::new()
		.route(
			base,
			get(move |state: State<AppState>| list_sites(state, kind))
				.post(move |state: State<AppState>, body: Json<NewSite>| add_site(state, kind, body)),
		)
		.route(
			&format!("{base}/{{code}}"),
			get(move |state: State<AppState>, code: Path<String>| get_site(state, kind, code))
				.put(move |state: State<AppState>, code: Path<String>, body: Json<SitePatch>| {
					update_site(state, kind, code, body)
				})
				.delete(move |state: State<AppState>, code: Path<String>| remove_site(state, kind, code)),
		)
}

type ApiResult = Result<Json<Value>, ApiError>;

fn data<T: Serialize>(data: T) -> ApiResult {
	Ok(Json(json!({ "success": true, "data": data })))
}

fn message(message: impl Into<String>) -> ApiResult {
	Ok(Json(json!({ "success": true, "message": message.into() })))
}

#[derive(Debug)]
struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, message: impl Into<String>) -> Self {
		Self {
			status,
			message: message.into(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(json!({ "success": false, "error": self.message }))).into_response()
	}
}

impl From<StorageError> for ApiError {
	fn from(e: StorageError) -> Self {
		let status = match &e {
			StorageError::NotFound => StatusCode::NOT_FOUND,
			StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
			StorageError::Invalid(_) => StatusCode::BAD_REQUEST,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};
		Self::new(status, e.to_string())
	}
}

impl From<CoreError> for ApiError {
	fn from(e: CoreError) -> Self {
		match e {
			CoreError::Storage(e) => e.into(),
			CoreError::Configuration(_) | CoreError::State(_) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
			CoreError::Credential(_) => Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
			_ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
		}
	}
}

async fn health_check() -> ApiResult {
	data(json!({
		"status": "ok",
		"timestamp": chrono::Utc::now(),
	}))
}

async fn get_status(State(state): State<AppState>) -> ApiResult {
	let bot = &state.bot;
	data(json!({
		"service": bot.config().service.name,
		"monitoring": bot.monitoring_status(),
		"schedule": bot.schedule_info(),
		"lastSummary": bot.last_summary(),
	}))
}

async fn get_checkpoint(State(state): State<AppState>) -> ApiResult {
	data(json!({ "checkpoint": state.bot.current_checkpoint() }))
}

async fn get_dashboard_data(State(state): State<AppState>) -> ApiResult {
	let bot = &state.bot;
	let cancelled = bot.cancelled_orders(None, DASHBOARD_CANCELLED_LIMIT).await?;
	let restaurants = bot.restaurants().list().await?;
	data(json!({
		"lastSummary": bot.last_summary(),
		"monitoring": bot.monitoring_status(),
		"schedule": bot.schedule_info(),
		"restaurants": restaurants,
		"recentCancelled": cancelled,
	}))
}

async fn reset_store_stats(State(state): State<AppState>) -> ApiResult {
	state.bot.reset_store_stats();
	message("Store statistics reset")
}

async fn process_orders(State(state): State<AppState>) -> ApiResult {
	let summary = state.bot.process_orders().await;
	if !summary.success {
		warn!(message = %summary.message, "Manual bulk sweep failed");
	}
	data(summary)
}

async fn start_monitoring(State(state): State<AppState>) -> ApiResult {
	let started = state.bot.start_monitoring();
	let text = if started { "Monitoring started" } else { "Monitoring already active" };
	Ok(Json(json!({
		"success": true,
		"message": text,
		"data": { "started": started },
	})))
}

async fn stop_monitoring(State(state): State<AppState>) -> ApiResult {
	let stopped = state.bot.stop_monitoring();
	let text = if stopped { "Monitoring stopped" } else { "Monitoring was not active" };
	Ok(Json(json!({
		"success": true,
		"message": text,
		"data": { "stopped": stopped },
	})))
}

async fn monitoring_status(State(state): State<AppState>) -> ApiResult {
	data(state.bot.monitoring_status())
}

async fn pending_orders(State(state): State<AppState>) -> ApiResult {
	let orders = state.bot.pending_orders();
	data(json!({ "count": orders.len(), "orders": orders }))
}

async fn clear_queue(State(state): State<AppState>) -> ApiResult {
	let cleared = state.bot.clear_pending_orders();
	data(json!({ "cleared": cleared }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddOrderRequest {
	#[serde(alias = "orderId")]
	id: String,
	store: String,
	#[serde(default)]
	current_state: Option<OrderState>,
}

async fn add_order(State(state): State<AppState>, Json(request): Json<AddOrderRequest>) -> ApiResult {
	let order = Order::new(
		request.id,
		request.store,
		request.current_state.unwrap_or(OrderState::Ready),
	);
	state.bot.add_order_to_queue(&order)?;
	message(format!("Order {} queued", order.id))
}

async fn process_queue(State(state): State<AppState>) -> ApiResult {
	match state.bot.process_queue().await {
		Some(summary) => data(summary),
		None => Err(ApiError::new(StatusCode::CONFLICT, "Queue processing already in progress")),
	}
}

async fn get_queue_config(State(state): State<AppState>) -> ApiResult {
	data(state.bot.queue_config())
}

async fn update_queue_config(State(state): State<AppState>, Json(patch): Json<QueueConfigPatch>) -> ApiResult {
	data(state.bot.update_queue_config(&patch).await?)
}

async fn reconfigure_cron(State(state): State<AppState>) -> ApiResult {
	data(state.bot.reconfigure_schedule().await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessOrderRequest {
	order_id: String,
	store: String,
}

async fn process_full_ready(State(state): State<AppState>, Json(request): Json<ProcessOrderRequest>) -> ApiResult {
	let outcome = state
		.bot
		.process_single_order(&request.order_id, &request.store)
		.await?;
	if outcome.is_success() {
		data(outcome)
	} else {
		Err(ApiError::new(
			StatusCode::BAD_GATEWAY,
			outcome.error.unwrap_or_else(|| "Transition failed".to_string()),
		))
	}
}

#[derive(Debug, Deserialize)]
struct CancelledQuery {
	store: Option<String>,
	limit: Option<usize>,
}

async fn cancelled_orders(State(state): State<AppState>, Query(query): Query<CancelledQuery>) -> ApiResult {
	let limit = query.limit.unwrap_or(readybot_storage::audit::DEFAULT_LIST_LIMIT);
	data(state.bot.cancelled_orders(query.store.as_deref(), limit).await?)
}

async fn list_settings(State(state): State<AppState>) -> ApiResult {
	let mut settings = state.bot.settings().await?;
	for setting in settings.iter_mut().filter(|s| s.key == keys::JWT_TOKEN) {
		setting.value = Value::from(REDACTED);
	}
	data(settings)
}

#[derive(Debug, Deserialize)]
struct SettingUpdate {
	value: Value,
}

async fn update_setting(
	State(state): State<AppState>,
	Path(key): Path<String>,
	Json(update): Json<SettingUpdate>,
) -> ApiResult {
	let mut setting = state.bot.update_setting(&key, update.value).await?;
	if setting.key == keys::JWT_TOKEN {
		setting.value = Value::from(REDACTED);
	}
	data(setting)
}

#[derive(Debug, Deserialize)]
struct NewSite {
	code: String,
	name: String,
	#[serde(default)]
	description: String,
	#[serde(default)]
	active: Option<bool>,
}

async fn list_sites(State(state): State<AppState>, kind: SiteKind) -> ApiResult {
	data(state.bot.sites(kind).list().await?)
}

async fn add_site(State(state): State<AppState>, kind: SiteKind, Json(new): Json<NewSite>) -> ApiResult {
	let site = Site {
		description: new.description,
		active: new.active.unwrap_or(true),
		..Site::new(new.code, new.name)
	};
	data(state.bot.sites(kind).add(site).await?)
}

async fn get_site(State(state): State<AppState>, kind: SiteKind, Path(code): Path<String>) -> ApiResult {
	data(state.bot.sites(kind).get(&code).await?)
}

async fn update_site(
	State(state): State<AppState>,
	kind: SiteKind,
	Path(code): Path<String>,
	Json(patch): Json<SitePatch>,
) -> ApiResult {
	data(state.bot.sites(kind).update(&code, patch).await?)
}

async fn remove_site(State(state): State<AppState>, kind: SiteKind, Path(code): Path<String>) -> ApiResult {
	state.bot.sites(kind).remove(&code).await?;
	message(format!("{} {} removed", kind, code))
}
