//! Configuration types for the bot.

use readybot_types::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BotConfig {
	/// Service identity and HTTP listener
	#[serde(default)]
	pub service: ServiceSettings,
	/// Upstream order API
	pub upstream: UpstreamConfig,
	/// Token issuance and fallback token
	pub credentials: CredentialsConfig,
	/// Persistence of settings and audit data
	#[serde(default)]
	pub storage: StorageConfig,
	/// Initial queue parameters (persisted settings win once they exist)
	#[serde(default)]
	pub queue: QueueSettings,
	/// Change monitor
	#[serde(default)]
	pub monitor: MonitorConfig,
	/// Bulk sweep schedule
	#[serde(default)]
	pub schedule: ScheduleConfig,
	/// Default restaurants and processing areas
	#[serde(default)]
	pub sites: SitesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSettings {
	#[serde(default = "default_service_name")]
	pub name: String,
	#[serde(default = "default_http_host")]
	pub http_host: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,
}

impl Default for ServiceSettings {
	fn default() -> Self {
		Self {
			name: default_service_name(),
			http_host: default_http_host(),
			http_port: default_http_port(),
		}
	}
}

/// Upstream order API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
	/// Base URL; `/orders` is appended
	pub base_url: String,
	#[serde(default = "default_brand")]
	pub brand: String,
	#[serde(default = "default_country")]
	pub country: String,
	#[serde(default = "default_fetch_timeout_ms")]
	pub fetch_timeout_ms: u64,
	#[serde(default = "default_transition_timeout_ms")]
	pub transition_timeout_ms: u64,
	/// Pause between two stores of one sweep
	#[serde(default = "default_store_delay_ms")]
	pub store_delay_ms: u64,
	/// Retries after the first attempt on transient failures
	#[serde(default = "default_retry_attempts")]
	pub retry_attempts: u32,
	/// First backoff interval; doubles on every retry
	#[serde(default = "default_retry_base_delay_ms")]
	pub retry_base_delay_ms: u64,
}

impl Default for UpstreamConfig {
	fn default() -> Self {
		Self {
			base_url: String::new(),
			brand: default_brand(),
			country: default_country(),
			fetch_timeout_ms: default_fetch_timeout_ms(),
			transition_timeout_ms: default_transition_timeout_ms(),
			store_delay_ms: default_store_delay_ms(),
			retry_attempts: default_retry_attempts(),
			retry_base_delay_ms: default_retry_base_delay_ms(),
		}
	}
}

/// Service credentials for the token endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialsConfig {
	pub token_url: String,
	#[serde(default = "default_token_timeout_ms")]
	pub token_timeout_ms: u64,
	#[serde(default)]
	pub apikey: String,
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub password: String,
	/// Used when the token endpoint is unavailable
	#[serde(default)]
	pub fallback_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	File,
	Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	#[serde(default = "default_storage_backend")]
	pub backend: StorageBackend,
	#[serde(default = "default_storage_path")]
	pub path: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			path: default_storage_path(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSettings {
	#[serde(default = "default_max_orders")]
	pub max_orders: usize,
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_batch_delay_ms")]
	pub batch_delay_ms: u64,
	#[serde(default)]
	pub cron_sync: bool,
}

impl Default for QueueSettings {
	fn default() -> Self {
		Self {
			max_orders: default_max_orders(),
			batch_size: default_batch_size(),
			batch_delay_ms: default_batch_delay_ms(),
			cron_sync: false,
		}
	}
}

impl From<&QueueSettings> for QueueConfig {
	fn from(settings: &QueueSettings) -> Self {
		QueueConfig {
			max_orders: settings.max_orders,
			batch_size: settings.batch_size,
			batch_delay_ms: settings.batch_delay_ms,
			cron_sync: settings.cron_sync,
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
	#[serde(default = "default_monitor_interval_ms")]
	pub interval_ms: u64,
	#[serde(default = "default_true")]
	pub autostart: bool,
	#[serde(default = "default_autostart_delay_ms")]
	pub autostart_delay_ms: u64,
	/// Evict last-known states untouched for this many cycles (0 = never)
	#[serde(default)]
	pub state_cache_max_idle_cycles: u64,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			interval_ms: default_monitor_interval_ms(),
			autostart: true,
			autostart_delay_ms: default_autostart_delay_ms(),
			state_cache_max_idle_cycles: 0,
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default = "default_cron_pattern")]
	pub cron_pattern: String,
	#[serde(default = "default_timezone")]
	pub timezone: String,
}

impl Default for ScheduleConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			cron_pattern: default_cron_pattern(),
			timezone: default_timezone(),
		}
	}
}

/// A restaurant or processing area seeded on first start
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteSeed {
	pub code: String,
	pub name: String,
	#[serde(default)]
	pub description: String,
}

impl SiteSeed {
	pub fn new(code: &str, name: &str) -> Self {
		Self {
			code: code.to_string(),
			name: name.to_string(),
			description: String::new(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SitesConfig {
	#[serde(default)]
	pub restaurants: Vec<SiteSeed>,
	#[serde(default = "default_areas")]
	pub areas: Vec<SiteSeed>,
}

impl Default for SitesConfig {
	fn default() -> Self {
		Self {
			restaurants: Vec::new(),
			areas: default_areas(),
		}
	}
}

/// Area codes used when no processing area is active.
pub const DEFAULT_AREA_CODES: &[&str] = &["MCC", "CDP", "CHK", "BKF", "DLV"];

pub const DEFAULT_CRON_PATTERN: &str = "*/5 * * * *";

fn default_service_name() -> String {
	"readybot".to_string()
}

fn default_http_host() -> String {
	"0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
	3000
}

fn default_brand() -> String {
	"ADSA".to_string()
}

fn default_country() -> String {
	"BR".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
	30_000
}

fn default_transition_timeout_ms() -> u64 {
	30_000
}

fn default_store_delay_ms() -> u64 {
	100
}

fn default_retry_attempts() -> u32 {
	3
}

fn default_retry_base_delay_ms() -> u64 {
	2_000
}

fn default_token_timeout_ms() -> u64 {
	10_000
}

fn default_storage_backend() -> StorageBackend {
	StorageBackend::File
}

fn default_storage_path() -> PathBuf {
	PathBuf::from("./data/storage")
}

fn default_max_orders() -> usize {
	500
}

fn default_batch_size() -> usize {
	50
}

fn default_batch_delay_ms() -> u64 {
	2_000
}

fn default_monitor_interval_ms() -> u64 {
	30_000
}

fn default_autostart_delay_ms() -> u64 {
	5_000
}

fn default_cron_pattern() -> String {
	DEFAULT_CRON_PATTERN.to_string()
}

fn default_timezone() -> String {
	"America/Sao_Paulo".to_string()
}

fn default_true() -> bool {
	true
}

fn default_areas() -> Vec<SiteSeed> {
	vec![
		SiteSeed::new("MCC", "McCafe"),
		SiteSeed::new("CDP", "Digital menu"),
		SiteSeed::new("CHK", "Checkout"),
		SiteSeed::new("BKF", "Breakfast"),
		SiteSeed::new("DLV", "Delivery"),
	]
}
