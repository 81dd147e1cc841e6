//! Storage module for the ready-order bot.
//!
//! This module provides a small key-value abstraction with file-based and
//! in-memory backends, and the durable records the bot keeps on top of it:
//! runtime settings, the cancelled-order audit log and the registry of
//! restaurants and processing areas.

use async_trait::async_trait;
use readybot_config::{StorageBackend, StorageConfig};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod audit;
pub mod settings;
pub mod sites;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use audit::CancelledOrderLog;
pub use implementations::file::FileStorage;
pub use implementations::memory::MemoryStorage;
pub use settings::{keys, Setting, SettingsStore};
pub use sites::{Site, SiteKind, SitePatch, SiteRegistry};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// An item with the same identifier already exists.
	#[error("Already exists: {0}")]
	AlreadyExists(String),
	/// A record failed validation before being written.
	#[error("Invalid record: {0}")]
	Invalid(String),
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys have the form `namespace:id`. Backends must be able to enumerate
/// keys by prefix so that whole namespaces can be listed.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, replacing any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists every key starting with `prefix`.
	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// High-level storage service that provides typed operations.
///
/// Values are stored as JSON under `namespace:id`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Service over a fresh in-memory backend.
	pub fn in_memory() -> Self {
		Self::new(Box::new(MemoryStorage::new()))
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key(namespace, id), bytes).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps `NotFound` to `None`.
	pub async fn find<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key(namespace, id)).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key(namespace, id)).await
	}

	/// Returns every `(id, value)` pair of a namespace, ordered by id.
	pub async fn list<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = format!("{}:", namespace);
		let mut keys = self.backend.keys(&prefix).await?;
		keys.sort();

		let mut items = Vec::with_capacity(keys.len());
		for full_key in keys {
			let bytes = match self.backend.get_bytes(&full_key).await {
				Ok(bytes) => bytes,
				// Deleted between listing and reading.
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};
			let value = serde_json::from_slice(&bytes)
				.map_err(|e| StorageError::Serialization(e.to_string()))?;
			items.push((full_key[prefix.len()..].to_string(), value));
		}
		Ok(items)
	}
}

fn key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

/// Factory function to create a storage backend from configuration.
pub fn create_storage(config: &StorageConfig) -> Box<dyn StorageInterface> {
	match config.backend {
		StorageBackend::File => Box::new(FileStorage::new(config.path.clone())),
		StorageBackend::Memory => Box::new(MemoryStorage::new()),
	}
}
