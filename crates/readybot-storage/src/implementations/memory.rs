//! In-memory storage backend, used for tests and the `memory` backend option.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile key-value store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.data
			.read()
			.get(key)
			.cloned()
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		self.data.write().insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.data.write().remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.data.read().contains_key(key))
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		Ok(self
			.data
			.read()
			.keys()
			.filter(|k| k.starts_with(prefix))
			.cloned()
			.collect())
	}
}
