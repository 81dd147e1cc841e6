// readybot-core/src/error.rs

use readybot_auth::CredentialError;
use readybot_config::ConfigError;
use readybot_state::StateError;
use readybot_storage::StorageError;
use readybot_upstream::UpstreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Credential error: {0}")]
	Credential(#[from] CredentialError),

	#[error("Upstream error: {0}")]
	Upstream(#[from] UpstreamError),

	#[error("State error: {0}")]
	State(#[from] StateError),

	#[error("Schedule error: {0}")]
	Schedule(String),
}

impl From<ConfigError> for CoreError {
	fn from(e: ConfigError) -> Self {
		match e {
			ConfigError::FileNotFound(msg) => CoreError::Configuration(format!("Config file not found: {}", msg)),
			ConfigError::ParseError(msg) => CoreError::Configuration(format!("Config parse error: {}", msg)),
			ConfigError::ValidationError(msg) => {
				CoreError::Configuration(format!("Config validation error: {}", msg))
			}
			ConfigError::EnvVarNotFound(var) => {
				CoreError::Configuration(format!("Environment variable not found: {}", var))
			}
			ConfigError::IoError(e) => CoreError::Configuration(format!("IO error reading config: {}", e)),
		}
	}
}
