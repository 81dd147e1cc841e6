//! Runtime settings persisted as key/value records.
//!
//! Values are JSON so that numbers and booleans keep their type, but values
//! written as strings (for example through the admin API) are still read
//! leniently by the typed accessors.

use crate::{StorageError, StorageService};
use chrono::{DateTime, Utc};
use readybot_config::BotConfig;
use readybot_types::{Credential, QueueConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const NAMESPACE: &str = "settings";

/// Setting keys shared with the admin surface.
pub mod keys {
	pub const JWT_TOKEN: &str = "JWT_TOKEN";
	pub const CRON_PATTERN: &str = "CRON_PATTERN";
	pub const CRON_TIMEZONE: &str = "CRON_TIMEZONE";
	pub const MONITORING_INTERVAL: &str = "MONITORING_INTERVAL";
	pub const MAX_ORDERS: &str = "MAX_ORDERS";
	pub const BATCH_SIZE: &str = "BATCH_SIZE";
	pub const BATCH_DELAY: &str = "BATCH_DELAY";
	pub const CRON_SYNC: &str = "CRON_SYNC";
}

/// Token stored until one is configured or issued.
const AWAITING_TOKEN: &str = "awaiting_automatic_retrieval";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
	pub key: String,
	pub value: Value,
	#[serde(default)]
	pub description: String,
	pub updated_at: DateTime<Utc>,
}

pub struct SettingsStore {
	storage: Arc<StorageService>,
}

impl SettingsStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn get(&self, key: &str) -> Result<Option<Setting>, StorageError> {
		self.storage.find(NAMESPACE, key).await
	}

	/// Writes a value, keeping the existing description.
	pub async fn set(&self, key: &str, value: Value) -> Result<Setting, StorageError> {
		let description = self
			.get(key)
			.await?
			.map(|existing| existing.description)
			.unwrap_or_default();

		let setting = Setting {
			key: key.to_string(),
			value,
			description,
			updated_at: Utc::now(),
		};
		self.storage.store(NAMESPACE, key, &setting).await?;
		debug!(key, "Setting updated");
		Ok(setting)
	}

	/// All settings ordered by key.
	pub async fn all(&self) -> Result<Vec<Setting>, StorageError> {
		Ok(self
			.storage
			.list::<Setting>(NAMESPACE)
			.await?
			.into_iter()
			.map(|(_, setting)| setting)
			.collect())
	}

	/// Inserts every seed whose key is not stored yet. Returns how many were
	/// inserted.
	pub async fn seed_defaults(
		&self,
		defaults: &[(&str, Value, &str)],
	) -> Result<usize, StorageError> {
		let mut inserted = 0;
		for (key, value, description) in defaults {
			if self.storage.exists(NAMESPACE, key).await? {
				continue;
			}
			let setting = Setting {
				key: key.to_string(),
				value: value.clone(),
				description: description.to_string(),
				updated_at: Utc::now(),
			};
			self.storage.store(NAMESPACE, key, &setting).await?;
			inserted += 1;
		}
		Ok(inserted)
	}

	/// Seeds built from the configuration file.
	pub fn defaults_from(config: &BotConfig) -> Vec<(&'static str, Value, &'static str)> {
		let token = config
			.credentials
			.fallback_token
			.clone()
			.unwrap_or_else(|| AWAITING_TOKEN.to_string());
		vec![
			(
				keys::JWT_TOKEN,
				json!(Credential::configured(token)),
				"Bearer token for the order API",
			),
			(
				keys::CRON_PATTERN,
				json!(config.schedule.cron_pattern),
				"Bulk sweep schedule (cron)",
			),
			(
				keys::CRON_TIMEZONE,
				json!(config.schedule.timezone),
				"Timezone of the bulk sweep schedule",
			),
			(
				keys::MONITORING_INTERVAL,
				json!(config.monitor.interval_ms),
				"Change monitor interval in milliseconds",
			),
			(
				keys::MAX_ORDERS,
				json!(config.queue.max_orders),
				"Queue capacity",
			),
			(
				keys::BATCH_SIZE,
				json!(config.queue.batch_size),
				"Orders submitted per batch",
			),
			(
				keys::BATCH_DELAY,
				json!(config.queue.batch_delay_ms),
				"Pause between batches in milliseconds",
			),
			(
				keys::CRON_SYNC,
				json!(config.queue.cron_sync),
				"Leave queue draining to the scheduler",
			),
		]
	}

	pub async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.get(key).await?.map(|s| match s.value {
			Value::String(s) => s,
			other => other.to_string(),
		}))
	}

	pub async fn get_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
		Ok(self.get(key).await?.and_then(|s| match s.value {
			Value::Number(n) => n.as_u64(),
			Value::String(s) => s.trim().parse().ok(),
			_ => None,
		}))
	}

	pub async fn get_bool(&self, key: &str) -> Result<Option<bool>, StorageError> {
		Ok(self.get(key).await?.and_then(|s| match s.value {
			Value::Bool(b) => Some(b),
			Value::String(s) => s.trim().parse().ok(),
			_ => None,
		}))
	}

	/// Stored credential. A bare string is read as a configured token.
	pub async fn credential(&self) -> Result<Option<Credential>, StorageError> {
		let Some(setting) = self.get(keys::JWT_TOKEN).await? else {
			return Ok(None);
		};
		match setting.value {
			Value::String(token) => Ok(Some(Credential::configured(token))),
			value => serde_json::from_value(value)
				.map(Some)
				.map_err(|e| StorageError::Serialization(e.to_string())),
		}
	}

	pub async fn set_credential(&self, credential: &Credential) -> Result<(), StorageError> {
		let value =
			serde_json::to_value(credential).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.set(keys::JWT_TOKEN, value).await?;
		Ok(())
	}

	/// Queue configuration from stored settings, `fallback` for missing or
	/// unusable values.
	pub async fn queue_config(&self, fallback: &QueueConfig) -> Result<QueueConfig, StorageError> {
		let config = QueueConfig {
			max_orders: self
				.get_u64(keys::MAX_ORDERS)
				.await?
				.map(|v| v as usize)
				.unwrap_or(fallback.max_orders),
			batch_size: self
				.get_u64(keys::BATCH_SIZE)
				.await?
				.map(|v| v as usize)
				.unwrap_or(fallback.batch_size),
			batch_delay_ms: self
				.get_u64(keys::BATCH_DELAY)
				.await?
				.unwrap_or(fallback.batch_delay_ms),
			cron_sync: self
				.get_bool(keys::CRON_SYNC)
				.await?
				.unwrap_or(fallback.cron_sync),
		};
		Ok(if config.validate().is_ok() {
			config
		} else {
			*fallback
		})
	}

	pub async fn save_queue_config(&self, config: &QueueConfig) -> Result<(), StorageError> {
		self.set(keys::MAX_ORDERS, json!(config.max_orders)).await?;
		self.set(keys::BATCH_SIZE, json!(config.batch_size)).await?;
		self.set(keys::BATCH_DELAY, json!(config.batch_delay_ms))
			.await?;
		self.set(keys::CRON_SYNC, json!(config.cron_sync)).await?;
		Ok(())
	}
}
