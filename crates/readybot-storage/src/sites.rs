//! Restaurants and processing areas.
//!
//! Restaurants are the stores polled upstream; processing areas narrow each
//! fetch through the `area` parameter. Both are kept in the same shape and
//! addressed by their code.

use crate::{StorageError, StorageService};
use chrono::{DateTime, Utc};
use readybot_config::SiteSeed;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
	Restaurant,
	Area,
}

impl SiteKind {
	fn namespace(&self) -> &'static str {
		match self {
			Self::Restaurant => "restaurants",
			Self::Area => "areas",
		}
	}
}

impl fmt::Display for SiteKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Restaurant => f.write_str("restaurant"),
			Self::Area => f.write_str("area"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
	pub code: String,
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Site {
	pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			code: code.into(),
			name: name.into(),
			description: String::new(),
			active: true,
			created_at: now,
			updated_at: now,
		}
	}
}

impl From<&SiteSeed> for Site {
	fn from(seed: &SiteSeed) -> Self {
		Self {
			description: seed.description.clone(),
			..Self::new(seed.code.clone(), seed.name.clone())
		}
	}
}

/// Partial update of a [`Site`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitePatch {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub active: Option<bool>,
}

pub struct SiteRegistry {
	storage: Arc<StorageService>,
	kind: SiteKind,
}

impl SiteRegistry {
	pub fn new(storage: Arc<StorageService>, kind: SiteKind) -> Self {
		Self { storage, kind }
	}

	pub fn kind(&self) -> SiteKind {
		self.kind
	}

	/// All sites ordered by code.
	pub async fn list(&self) -> Result<Vec<Site>, StorageError> {
		Ok(self
			.storage
			.list::<Site>(self.kind.namespace())
			.await?
			.into_iter()
			.map(|(_, site)| site)
			.collect())
	}

	pub async fn list_active(&self) -> Result<Vec<Site>, StorageError> {
		let mut sites = self.list().await?;
		sites.retain(|site| site.active);
		Ok(sites)
	}

	pub async fn active_codes(&self) -> Result<Vec<String>, StorageError> {
		Ok(self
			.list_active()
			.await?
			.into_iter()
			.map(|site| site.code)
			.collect())
	}

	pub async fn get(&self, code: &str) -> Result<Site, StorageError> {
		self.storage.retrieve(self.kind.namespace(), code).await
	}

	pub async fn add(&self, site: Site) -> Result<Site, StorageError> {
		let code = site.code.trim().to_string();
		if code.is_empty() {
			return Err(StorageError::Invalid(format!("{} code must not be empty", self.kind)));
		}
		if self.storage.exists(self.kind.namespace(), &code).await? {
			return Err(StorageError::AlreadyExists(code));
		}
		let site = Site { code, ..site };
		self.storage
			.store(self.kind.namespace(), &site.code, &site)
			.await?;
		info!(kind = %self.kind, code = %site.code, "Site added");
		Ok(site)
	}

	pub async fn update(&self, code: &str, patch: SitePatch) -> Result<Site, StorageError> {
		let mut site = self.get(code).await?;
		if let Some(name) = patch.name {
			site.name = name;
		}
		if let Some(description) = patch.description {
			site.description = description;
		}
		if let Some(active) = patch.active {
			site.active = active;
		}
		site.updated_at = Utc::now();
		self.storage
			.store(self.kind.namespace(), &site.code, &site)
			.await?;
		Ok(site)
	}

	pub async fn remove(&self, code: &str) -> Result<(), StorageError> {
		if !self.storage.exists(self.kind.namespace(), code).await? {
			return Err(StorageError::NotFound);
		}
		self.storage.remove(self.kind.namespace(), code).await?;
		info!(kind = %self.kind, code, "Site removed");
		Ok(())
	}

	/// Adds the seeds that are not registered yet.
	pub async fn seed(&self, seeds: &[SiteSeed]) -> Result<usize, StorageError> {
		let mut inserted = 0;
		for seed in seeds {
			if self.storage.exists(self.kind.namespace(), &seed.code).await? {
				continue;
			}
			self.add(Site::from(seed)).await?;
			inserted += 1;
		}
		Ok(inserted)
	}
}
