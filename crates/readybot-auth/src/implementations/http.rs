//! Token issuer backed by the upstream token endpoint.

use crate::{CredentialError, TokenIssuer};
use async_trait::async_trait;
use readybot_config::CredentialsConfig;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TokenResponse {
	#[serde(default)]
	token: Option<String>,
}

/// Posts the service credentials as a form and reads `{ token }` back.
pub struct HttpTokenIssuer {
	client: reqwest::Client,
	token_url: String,
	brand: String,
	apikey: String,
	username: String,
	password: String,
}

impl HttpTokenIssuer {
	pub fn new(config: &CredentialsConfig, brand: &str) -> Result<Self, CredentialError> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_millis(config.token_timeout_ms))
			.build()
			.map_err(|e| CredentialError::Issuer(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			client,
			token_url: config.token_url.clone(),
			brand: brand.to_string(),
			apikey: config.apikey.clone(),
			username: config.username.clone(),
			password: config.password.clone(),
		})
	}
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
	async fn issue_token(&self) -> Result<String, CredentialError> {
		debug!(url = %self.token_url, "Requesting token");

		let response = self
			.client
			.post(&self.token_url)
			.header(reqwest::header::ACCEPT, "application/json")
			.form(&[
				("brand", self.brand.as_str()),
				("apikey", self.apikey.as_str()),
				("username", self.username.as_str()),
				("passwd", self.password.as_str()),
			])
			.send()
			.await
			.map_err(|e| CredentialError::Issuer(format!("Token request failed: {}", e)))?;

		let status = response.status();
		if !status.is_success() {
			return Err(CredentialError::Issuer(format!(
				"Token endpoint answered with status {}",
				status
			)));
		}

		let body: TokenResponse = response
			.json()
			.await
			.map_err(|e| CredentialError::Issuer(format!("Invalid token response: {}", e)))?;

		body.token
			.filter(|token| !token.is_empty())
			.ok_or_else(|| CredentialError::Issuer("Token missing from response".to_string()))
	}
}
