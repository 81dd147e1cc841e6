//! Bearer credential used for every upstream call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token values that mark an unset credential rather than a real one.
pub const PLACEHOLDER_TOKENS: &[&str] = &["your_jwt_token_here", "awaiting_automatic_retrieval"];

/// Returns true when `token` is empty or one of the known placeholders.
pub fn is_placeholder_token(token: &str) -> bool {
	let token = token.trim();
	token.is_empty() || PLACEHOLDER_TOKENS.contains(&token)
}

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
	/// Statically configured fallback token.
	Configured,
	/// Obtained from the upstream token endpoint.
	Issued,
}

/// A bearer token produced by the credential manager.
///
/// Expiry is not tracked locally; it is detected when the upstream answers
/// with 401.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	pub token: String,
	pub source: CredentialSource,
}

impl Credential {
	pub fn new(token: impl Into<String>, source: CredentialSource) -> Self {
		Self {
			token: token.into(),
			source,
		}
	}

	pub fn configured(token: impl Into<String>) -> Self {
		Self::new(token, CredentialSource::Configured)
	}

	pub fn issued(token: impl Into<String>) -> Self {
		Self::new(token, CredentialSource::Issued)
	}

	pub fn is_placeholder(&self) -> bool {
		is_placeholder_token(&self.token)
	}

	/// Value of the `Authorization` header.
	pub fn authorization(&self) -> String {
		format!("JWT {}", self.token)
	}
}

// Tokens must not end up in logs.
impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let tail: String = self
			.token
			.chars()
			.rev()
			.take(4)
			.collect::<Vec<_>>()
			.into_iter()
			.rev()
			.collect();
		f.debug_struct("Credential")
			.field("token", &format!("…{}", tail))
			.field("source", &self.source)
			.finish()
	}
}
