// readybot-config/src/lib.rs

use chrono_tz::Tz;
use std::env;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "READYBOT_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<BotConfig, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		if !Path::new(file_path).exists() {
			return Err(ConfigError::FileNotFound(file_path.clone()));
		}

		let content = tokio::fs::read_to_string(file_path).await?;
		self.load_from_str(&content)
	}

	/// Parses, overrides and validates configuration from TOML text.
	pub fn load_from_str(&self, content: &str) -> Result<BotConfig, ConfigError> {
		let substituted_content = self.substitute_env_vars(content)?;

		let mut config: BotConfig = toml::from_str(&substituted_content)
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		// Find and replace ${VAR_NAME} patterns
		let re = regex::Regex::new(r"\$\{([^}]+)\}")
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut BotConfig) -> Result<(), ConfigError> {
		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			config.service.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Ok(base_url) = env::var(format!("{}UPSTREAM_URL", self.env_prefix)) {
			debug!("Overriding upstream base URL from environment");
			config.upstream.base_url = base_url;
		}

		if let Ok(token) = env::var(format!("{}JWT_TOKEN", self.env_prefix)) {
			debug!("Overriding fallback token from environment");
			config.credentials.fallback_token = Some(token);
		}

		if let Ok(path) = env::var(format!("{}STORAGE_PATH", self.env_prefix)) {
			config.storage.path = path.into();
		}

		Ok(())
	}
}

fn validate_config(config: &BotConfig) -> Result<(), ConfigError> {
	if config.upstream.base_url.trim().is_empty() {
		return Err(ConfigError::ValidationError(
			"upstream.base_url must be set".to_string(),
		));
	}

	if config.credentials.token_url.trim().is_empty() {
		return Err(ConfigError::ValidationError(
			"credentials.token_url must be set".to_string(),
		));
	}

	readybot_types::QueueConfig::from(&config.queue)
		.validate()
		.map_err(|e| ConfigError::ValidationError(format!("queue: {}", e)))?;

	if config.monitor.interval_ms == 0 {
		return Err(ConfigError::ValidationError(
			"monitor.interval_ms must be greater than zero".to_string(),
		));
	}

	parse_cron_pattern(&config.schedule.cron_pattern)?;
	parse_timezone(&config.schedule.timezone)?;

	Ok(())
}

/// Parses a cron pattern. Classic five-field patterns get a leading seconds
/// field so that `*/5 * * * *` fires at second zero.
pub fn parse_cron_pattern(pattern: &str) -> Result<cron::Schedule, ConfigError> {
	let pattern = pattern.trim();
	let normalized = if pattern.split_whitespace().count() == 5 {
		format!("0 {}", pattern)
	} else {
		pattern.to_string()
	};

	cron::Schedule::from_str(&normalized)
		.map_err(|e| ConfigError::ValidationError(format!("Invalid cron pattern '{}': {}", pattern, e)))
}

/// Parses an IANA timezone name such as `America/Sao_Paulo`.
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
	name.trim()
		.parse::<Tz>()
		.map_err(|e| ConfigError::ValidationError(format!("Invalid timezone '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[upstream]
base_url = "https://orders.example.com/ui/v1"

[credentials]
token_url = "https://orders.example.com/ui/token"
"#;

	#[test]
	fn test_minimal_config_gets_defaults() {
		let config = ConfigLoader::new()
			.with_env_prefix("READYBOT_TEST_MINIMAL_")
			.load_from_str(MINIMAL)
			.unwrap();

		assert_eq!(config.service.http_port, 3000);
		assert_eq!(config.upstream.brand, "ADSA");
		assert_eq!(config.upstream.retry_attempts, 3);
		assert_eq!(config.upstream.retry_base_delay_ms, 2000);
		assert_eq!(config.credentials.token_timeout_ms, 10_000);
		assert_eq!(config.queue.batch_size, 50);
		assert_eq!(config.monitor.interval_ms, 30_000);
		assert_eq!(config.schedule.cron_pattern, "*/5 * * * *");
		assert_eq!(config.sites.areas.len(), 5);
		assert_eq!(config.storage.backend, StorageBackend::File);
	}

	#[test]
	fn test_env_substitution() {
		env::set_var("READYBOT_TEST_SUBST_APIKEY", "secret-key");
		let toml = format!(
			"{}apikey = \"${{READYBOT_TEST_SUBST_APIKEY}}\"\n",
			MINIMAL
		);

		let config = ConfigLoader::new()
			.with_env_prefix("READYBOT_TEST_SUBST_")
			.load_from_str(&toml)
			.unwrap();
		assert_eq!(config.credentials.apikey, "secret-key");
	}

	#[test]
	fn test_missing_env_var_is_an_error() {
		let toml = format!(
			"{}apikey = \"${{READYBOT_TEST_DEFINITELY_UNSET}}\"\n",
			MINIMAL
		);
		let err = ConfigLoader::new().load_from_str(&toml).unwrap_err();
		assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "READYBOT_TEST_DEFINITELY_UNSET"));
	}

	#[test]
	fn test_env_override_for_fallback_token() {
		env::set_var("READYBOT_TEST_OVERRIDE_JWT_TOKEN", "from-env");
		let config = ConfigLoader::new()
			.with_env_prefix("READYBOT_TEST_OVERRIDE_")
			.load_from_str(MINIMAL)
			.unwrap();
		assert_eq!(config.credentials.fallback_token.as_deref(), Some("from-env"));
	}

	#[test]
	fn test_rejects_zero_batch_size() {
		let toml = format!("{}\n[queue]\nbatch_size = 0\n", MINIMAL);
		let err = ConfigLoader::new().load_from_str(&toml).unwrap_err();
		assert!(matches!(err, ConfigError::ValidationError(_)));
	}

	#[test]
	fn test_rejects_bad_cron_pattern() {
		let toml = format!("{}\n[schedule]\ncron_pattern = \"every five minutes\"\n", MINIMAL);
		assert!(ConfigLoader::new().load_from_str(&toml).is_err());
	}

	#[test]
	fn test_cron_and_timezone_parsing() {
		assert!(parse_cron_pattern("*/5 * * * *").is_ok());
		assert!(parse_cron_pattern("0 */5 8-18 * * Mon-Fri").is_ok());
		assert!(parse_timezone("America/Sao_Paulo").is_ok());
		assert!(parse_timezone("Mars/Olympus").is_err());
	}

	#[tokio::test]
	async fn test_load_missing_file() {
		let err = ConfigLoader::new()
			.with_file("/nonexistent/readybot.toml")
			.load()
			.await
			.unwrap_err();
		assert!(matches!(err, ConfigError::FileNotFound(_)));
	}

	#[tokio::test]
	async fn test_load_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("readybot.toml");
		std::fs::write(&path, MINIMAL).unwrap();

		let config = ConfigLoader::new().with_file(&path).load().await.unwrap();
		assert_eq!(config.upstream.base_url, "https://orders.example.com/ui/v1");
	}
}
