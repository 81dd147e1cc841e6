//! The bot facade and its builder.

use crate::monitor::ChangeMonitor;
use crate::processor::BatchProcessor;
use crate::scheduler::{ScheduleInfo, Scheduler};
use crate::CoreError;
use readybot_auth::{CredentialManager, HttpTokenIssuer, TokenIssuer};
use readybot_config::{BotConfig, ConfigLoader};
use readybot_state::PollingContext;
use readybot_storage::{
	create_storage, keys, CancelledOrderLog, Setting, SettingsStore, SiteKind, SiteRegistry,
	StorageService,
};
use readybot_types::{
	CancelledOrder, Checkpoint, CycleSummary, DrainSummary, MonitoringStatus, Order, OrderOutcome,
	QueueConfig, QueueConfigPatch, QueueEntry,
};
use readybot_upstream::{HttpOrderApi, OrderApi, RetryPolicy, UpstreamClient};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Owns the polling context and every component working on it.
pub struct ReadyBot {
	config: BotConfig,
	settings: Arc<SettingsStore>,
	audit: Arc<CancelledOrderLog>,
	restaurants: Arc<SiteRegistry>,
	areas: Arc<SiteRegistry>,
	credentials: Arc<CredentialManager>,
	context: Arc<PollingContext>,
	processor: Arc<BatchProcessor>,
	monitor: Arc<ChangeMonitor>,
	scheduler: Arc<Scheduler>,
}

impl ReadyBot {
	pub fn config(&self) -> &BotConfig {
		&self.config
	}

	/// Starts the scheduler and, after the configured delay, the monitor.
	pub fn start(&self) {
		let checkpoint = self.context.checkpoint.initialize();
		info!(checkpoint = %checkpoint, "Starting ready-order bot");

		if self.config.schedule.enabled {
			self.scheduler.start();
		}

		if self.config.monitor.autostart {
			let monitor = self.monitor.clone();
			let delay = Duration::from_millis(self.config.monitor.autostart_delay_ms);
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				monitor.start_monitoring();
			});
		}
	}

	pub fn shutdown(&self) {
		self.monitor.stop_monitoring();
		self.scheduler.stop();
		info!("Ready-order bot stopped");
	}

	/// Runs one bulk sweep.
	pub async fn process_orders(&self) -> CycleSummary {
		self.processor.process_orders().await
	}

	pub async fn process_single_order(&self, order_id: &str, store: &str) -> Result<OrderOutcome, CoreError> {
		self.processor.process_single_order(order_id, store).await
	}

	pub fn start_monitoring(&self) -> bool {
		self.monitor.start_monitoring()
	}

	pub fn stop_monitoring(&self) -> bool {
		self.monitor.stop_monitoring()
	}

	pub fn monitoring_status(&self) -> MonitoringStatus {
		self.monitor.status()
	}

	pub fn pending_orders(&self) -> Vec<QueueEntry> {
		self.context.pending()
	}

	pub fn clear_pending_orders(&self) -> usize {
		self.context.clear_queue()
	}

	pub fn add_order_to_queue(&self, order: &Order) -> Result<(), CoreError> {
		self.context.enqueue_order(order)?;
		Ok(())
	}

	/// Drains the queue; `None` when a drain is already running.
	pub async fn process_queue(&self) -> Option<DrainSummary> {
		self.processor.drain_queue().await
	}

	pub fn queue_config(&self) -> QueueConfig {
		self.context.queue_config()
	}

	/// Applies and persists a queue configuration change.
	pub async fn update_queue_config(&self, patch: &QueueConfigPatch) -> Result<QueueConfig, CoreError> {
		let updated = self.context.update_queue_config(patch)?;
		self.settings.save_queue_config(&updated).await?;
		Ok(updated)
	}

	pub fn current_checkpoint(&self) -> Option<Checkpoint> {
		self.context.checkpoint.current()
	}

	pub fn last_summary(&self) -> Option<CycleSummary> {
		self.context.last_summary()
	}

	pub fn reset_store_stats(&self) {
		self.context.reset_last_summary();
	}

	pub async fn cancelled_orders(&self, store: Option<&str>, limit: usize) -> Result<Vec<CancelledOrder>, CoreError> {
		let orders = match store {
			Some(store) => self.audit.list_by_store(store, limit).await?,
			None => self.audit.list(limit).await?,
		};
		Ok(orders)
	}

	pub async fn settings(&self) -> Result<Vec<Setting>, CoreError> {
		Ok(self.settings.all().await?)
	}

	/// Writes a setting and applies it to the running components.
	pub async fn update_setting(&self, key: &str, value: Value) -> Result<Setting, CoreError> {
		match key {
			keys::JWT_TOKEN => {
				let token = value
					.as_str()
					.ok_or_else(|| invalid_setting(key, "a string"))?;
				self.credentials.replace_token(token).await?;
				self.stored_setting(key).await
			}
			keys::MAX_ORDERS | keys::BATCH_SIZE | keys::BATCH_DELAY | keys::CRON_SYNC => {
				let patch = queue_patch(key, &value)?;
				self.update_queue_config(&patch).await?;
				self.stored_setting(key).await
			}
			keys::MONITORING_INTERVAL => {
				let interval = as_u64(&value)
					.filter(|ms| *ms > 0)
					.ok_or_else(|| invalid_setting(key, "a positive number of milliseconds"))?;
				let setting = self.settings.set(key, Value::from(interval)).await?;
				self.monitor.set_interval(Duration::from_millis(interval)).await;
				Ok(setting)
			}
			keys::CRON_PATTERN | keys::CRON_TIMEZONE => {
				let text = value
					.as_str()
					.ok_or_else(|| invalid_setting(key, "a string"))?;
				let setting = self.settings.set(key, Value::from(text.trim())).await?;
				self.reconfigure_schedule().await?;
				Ok(setting)
			}
			_ => Ok(self.settings.set(key, value).await?),
		}
	}

	/// Re-reads the stored cron pattern and timezone.
	pub async fn reconfigure_schedule(&self) -> Result<ScheduleInfo, CoreError> {
		let pattern = self
			.settings
			.get_string(keys::CRON_PATTERN)
			.await?
			.unwrap_or_else(|| self.config.schedule.cron_pattern.clone());
		let timezone = self
			.settings
			.get_string(keys::CRON_TIMEZONE)
			.await?
			.unwrap_or_else(|| self.config.schedule.timezone.clone());
		self.scheduler.reconfigure(&pattern, &timezone)
	}

	pub fn schedule_info(&self) -> ScheduleInfo {
		self.scheduler.info()
	}

	pub fn sites(&self, kind: SiteKind) -> &SiteRegistry {
		match kind {
			SiteKind::Restaurant => &self.restaurants,
			SiteKind::Area => &self.areas,
		}
	}

	pub fn restaurants(&self) -> &SiteRegistry {
		&self.restaurants
	}

	pub fn areas(&self) -> &SiteRegistry {
		&self.areas
	}

	async fn stored_setting(&self, key: &str) -> Result<Setting, CoreError> {
		self.settings
			.get(key)
			.await?
			.ok_or_else(|| CoreError::Configuration(format!("{key} was not persisted")))
	}
}

fn invalid_setting(key: &str, expected: &str) -> CoreError {
	CoreError::Configuration(format!("{key} expects {expected}"))
}

fn as_u64(value: &Value) -> Option<u64> {
	match value {
		Value::Number(n) => n.as_u64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

fn as_bool(value: &Value) -> Option<bool> {
	match value {
		Value::Bool(b) => Some(*b),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

fn queue_patch(key: &str, value: &Value) -> Result<QueueConfigPatch, CoreError> {
	let number = || as_u64(value).ok_or_else(|| invalid_setting(key, "a number"));
	let mut patch = QueueConfigPatch::default();
	match key {
		keys::MAX_ORDERS => patch.max_orders = Some(number()? as usize),
		keys::BATCH_SIZE => patch.batch_size = Some(number()? as usize),
		keys::BATCH_DELAY => patch.batch_delay_ms = Some(number()?),
		_ => patch.cron_sync = Some(as_bool(value).ok_or_else(|| invalid_setting(key, "true or false"))?),
	}
	Ok(patch)
}

/// Builds a [`ReadyBot`] from configuration. Storage, the order API and the
/// token issuer can be injected; otherwise they are created from the
/// configuration.
pub struct ReadyBotBuilder {
	config: Option<BotConfig>,
	config_path: Option<String>,
	storage: Option<Arc<StorageService>>,
	order_api: Option<Arc<dyn OrderApi>>,
	token_issuer: Option<Arc<dyn TokenIssuer>>,
}

impl ReadyBotBuilder {
	pub fn new() -> Self {
		Self {
			config: None,
			config_path: None,
			storage: None,
			order_api: None,
			token_issuer: None,
		}
	}

	pub fn with_config(mut self, config: BotConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn with_config_file(mut self, path: impl Into<String>) -> Self {
		self.config_path = Some(path.into());
		self
	}

	pub fn with_storage(mut self, storage: Arc<StorageService>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_order_api(mut self, api: Arc<dyn OrderApi>) -> Self {
		self.order_api = Some(api);
		self
	}

	pub fn with_token_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
		self.token_issuer = Some(issuer);
		self
	}

	pub async fn build(self) -> Result<ReadyBot, CoreError> {
		let config = if let Some(config) = self.config {
			config
		} else if let Some(config_path) = self.config_path {
			ConfigLoader::new().with_file(&config_path).load().await?
		} else {
			return Err(CoreError::Configuration(
				"No configuration or config file path provided".to_string(),
			));
		};

		let storage = match self.storage {
			Some(storage) => storage,
			None => Arc::new(StorageService::new(create_storage(&config.storage))),
		};

		let settings = Arc::new(SettingsStore::new(storage.clone()));
		let seeded = settings
			.seed_defaults(&SettingsStore::defaults_from(&config))
			.await?;
		let restaurants = Arc::new(SiteRegistry::new(storage.clone(), SiteKind::Restaurant));
		let areas = Arc::new(SiteRegistry::new(storage.clone(), SiteKind::Area));
		let seeded_sites = restaurants.seed(&config.sites.restaurants).await? + areas.seed(&config.sites.areas).await?;
		info!(settings = seeded, sites = seeded_sites, "Seeded defaults");

		let audit = Arc::new(CancelledOrderLog::new(storage.clone()));

		let issuer: Arc<dyn TokenIssuer> = match self.token_issuer {
			Some(issuer) => issuer,
			None => Arc::new(HttpTokenIssuer::new(&config.credentials, &config.upstream.brand)?),
		};
		let credentials = Arc::new(CredentialManager::new(
			issuer,
			settings.clone(),
			config.credentials.fallback_token.clone(),
		));

		let api: Arc<dyn OrderApi> = match self.order_api {
			Some(api) => api,
			None => Arc::new(
				HttpOrderApi::new(&config.upstream).map_err(|e| CoreError::Configuration(e.to_string()))?,
			),
		};
		let client = Arc::new(
			UpstreamClient::new(api, credentials.clone(), audit.clone(), restaurants.clone(), areas.clone())
				.with_retry_policy(RetryPolicy::from_config(&config.upstream))
				.with_store_delay(Duration::from_millis(config.upstream.store_delay_ms)),
		);

		let queue_config = settings.queue_config(&QueueConfig::from(&config.queue)).await?;
		let context = Arc::new(
			PollingContext::new(queue_config).with_state_cache_max_idle(config.monitor.state_cache_max_idle_cycles),
		);
		let processor = Arc::new(BatchProcessor::new(context.clone(), client.clone()));

		let interval_ms = match settings.get_u64(keys::MONITORING_INTERVAL).await? {
			Some(ms) if ms > 0 => ms,
			Some(_) => {
				warn!("Stored monitoring interval is zero, using the configured one");
				config.monitor.interval_ms
			}
			None => config.monitor.interval_ms,
		};
		let monitor = Arc::new(ChangeMonitor::new(
			context.clone(),
			client,
			processor.clone(),
			Duration::from_millis(interval_ms),
		));

		let pattern = settings
			.get_string(keys::CRON_PATTERN)
			.await?
			.unwrap_or_else(|| config.schedule.cron_pattern.clone());
		let timezone = settings
			.get_string(keys::CRON_TIMEZONE)
			.await?
			.unwrap_or_else(|| config.schedule.timezone.clone());
		let scheduler = Arc::new(Scheduler::new(processor.clone(), context.clone(), &pattern, &timezone)?);

		credentials.warm_up().await;

		Ok(ReadyBot {
			config,
			settings,
			audit,
			restaurants,
			areas,
			credentials,
			context,
			processor,
			monitor,
			scheduler,
		})
	}
}

impl Default for ReadyBotBuilder {
	fn default() -> Self {
		Self::new()
	}
}
