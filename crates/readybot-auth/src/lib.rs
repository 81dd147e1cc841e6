//! Credential management for upstream calls.
//!
//! The [`CredentialManager`] hands out the bearer token used by every
//! upstream request. Tokens come from the token endpoint (through a
//! [`TokenIssuer`]) or from a statically configured fallback, and every
//! issued token is persisted in the settings store.

use async_trait::async_trait;
use parking_lot::RwLock;
use readybot_storage::{SettingsStore, StorageError};
use readybot_types::{is_placeholder_token, Credential};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub mod implementations {
	pub mod http;
}

pub use implementations::http::HttpTokenIssuer;

#[derive(Debug, Error)]
pub enum CredentialError {
	/// No usable token after trying the token endpoint and the fallback.
	#[error("Credential unavailable: {0}")]
	Unavailable(String),
	/// The only token that can be produced is the one just rejected upstream.
	#[error("Credential exhausted: the available token was already rejected")]
	Exhausted,
	/// The token endpoint failed or answered without a token.
	#[error("Token issuer error: {0}")]
	Issuer(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Source of freshly issued tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
	async fn issue_token(&self) -> Result<String, CredentialError>;
}

pub struct CredentialManager {
	issuer: Arc<dyn TokenIssuer>,
	settings: Arc<SettingsStore>,
	fallback: Option<String>,
	cached: RwLock<Option<Credential>>,
	refresh_lock: Mutex<()>,
}

impl CredentialManager {
	pub fn new(
		issuer: Arc<dyn TokenIssuer>,
		settings: Arc<SettingsStore>,
		fallback: Option<String>,
	) -> Self {
		Self {
			issuer,
			settings,
			fallback: fallback.filter(|token| !is_placeholder_token(token)),
			cached: RwLock::new(None),
			refresh_lock: Mutex::new(()),
		}
	}

	/// Returns the cached token, else the persisted one, else the configured
	/// fallback, and only then asks the token endpoint.
	pub async fn get_or_refresh_token(&self) -> Result<Credential, CredentialError> {
		if let Some(credential) = self.cached() {
			return Ok(credential);
		}

		if let Some(stored) = self.settings.credential().await? {
			if !stored.is_placeholder() {
				debug!(source = ?stored.source, "Using persisted token");
				*self.cached.write() = Some(stored.clone());
				return Ok(stored);
			}
		}

		if let Some(token) = &self.fallback {
			let credential = Credential::configured(token.clone());
			self.persist(&credential).await;
			*self.cached.write() = Some(credential.clone());
			return Ok(credential);
		}

		self.refresh_token().await
	}

	/// Obtains a new token from the token endpoint, falling back to the
	/// configured token when the endpoint is unavailable.
	#[instrument(skip(self))]
	pub async fn refresh_token(&self) -> Result<Credential, CredentialError> {
		let _guard = self.refresh_lock.lock().await;
		self.refresh_locked().await
	}

	/// Re-entry point for callers whose request was answered with 401.
	///
	/// If another caller already replaced the rejected token, that token is
	/// returned without issuing again. Producing the rejected token once more
	/// yields [`CredentialError::Exhausted`].
	#[instrument(skip_all)]
	pub async fn handle_token_expiration(
		&self,
		rejected: &Credential,
	) -> Result<Credential, CredentialError> {
		let _guard = self.refresh_lock.lock().await;

		if let Some(current) = self.cached() {
			if current.token != rejected.token {
				debug!("Token already refreshed by a concurrent caller");
				return Ok(current);
			}
		}

		warn!("Upstream rejected the token, refreshing");
		let credential = self.refresh_locked().await?;
		if credential.token == rejected.token {
			*self.cached.write() = None;
			warn!(source = ?credential.source, "No replacement for the rejected token");
			return Err(CredentialError::Exhausted);
		}
		Ok(credential)
	}

	/// Makes sure a usable token is persisted at startup. Failures are
	/// logged; the first upstream call will try again.
	pub async fn warm_up(&self) {
		let stored = match self.settings.credential().await {
			Ok(stored) => stored,
			Err(e) => {
				warn!(error = %e, "Could not read persisted token");
				None
			}
		};

		if let Some(stored) = stored.filter(|c| !c.is_placeholder()) {
			*self.cached.write() = Some(stored);
			return;
		}

		if let Some(token) = &self.fallback {
			info!("Persisting configured token");
			let credential = Credential::configured(token.clone());
			self.persist(&credential).await;
			*self.cached.write() = Some(credential);
			return;
		}

		if let Err(e) = self.refresh_token().await {
			warn!(error = %e, "Initial token retrieval failed");
		}
	}

	/// Installs an operator-supplied token, persisted and used from the next
	/// request on.
	pub async fn replace_token(&self, token: &str) -> Result<Credential, CredentialError> {
		let token = token.trim();
		if is_placeholder_token(token) {
			return Err(CredentialError::Unavailable("placeholder token rejected".to_string()));
		}

		let _guard = self.refresh_lock.lock().await;
		let credential = Credential::configured(token);
		self.settings.set_credential(&credential).await?;
		*self.cached.write() = Some(credential.clone());
		info!("Token replaced by operator");
		Ok(credential)
	}

	/// Cached credential, if it is usable.
	pub fn cached(&self) -> Option<Credential> {
		self.cached
			.read()
			.as_ref()
			.filter(|c| !c.is_placeholder())
			.cloned()
	}

	async fn refresh_locked(&self) -> Result<Credential, CredentialError> {
		match self.issuer.issue_token().await {
			Ok(token) if !is_placeholder_token(&token) => {
				info!("Obtained new token from the token endpoint");
				let credential = Credential::issued(token);
				self.persist(&credential).await;
				*self.cached.write() = Some(credential.clone());
				Ok(credential)
			}
			outcome => {
				let reason = match outcome {
					Err(e) => e.to_string(),
					Ok(_) => "token endpoint returned an empty token".to_string(),
				};
				warn!(%reason, "Token refresh failed");

				match &self.fallback {
					Some(token) => {
						info!("Using configured fallback token");
						let credential = Credential::configured(token.clone());
						*self.cached.write() = Some(credential.clone());
						Ok(credential)
					}
					None => Err(CredentialError::Unavailable(reason)),
				}
			}
		}
	}

	async fn persist(&self, credential: &Credential) {
		if let Err(e) = self.settings.set_credential(credential).await {
			warn!(error = %e, "Failed to persist token");
		}
	}
}
