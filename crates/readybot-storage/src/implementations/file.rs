//! File-based storage backend.
//!
//! One file per key under a base directory. Keys are percent-encoded into
//! file names so they can be recovered when listing a namespace.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

const EXTENSION: &str = "json";

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", encode_key(key), EXTENSION))
	}
}

fn encode_key(key: &str) -> String {
	let mut encoded = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => encoded.push_str("%25"),
			':' => encoded.push_str("%3A"),
			'/' => encoded.push_str("%2F"),
			'\\' => encoded.push_str("%5C"),
			c => encoded.push(c),
		}
	}
	encoded
}

fn decode_key(name: &str) -> Option<String> {
	let mut decoded = String::with_capacity(name.len());
	let mut chars = name.chars();
	while let Some(c) = chars.next() {
		if c != '%' {
			decoded.push(c);
			continue;
		}
		let code: String = chars.by_ref().take(2).collect();
		decoded.push(match code.as_str() {
			"25" => '%',
			"3A" => ':',
			"2F" => '/',
			"5C" => '\\',
			_ => return None,
		});
	}
	Some(decoded)
}

fn backend_error(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)?;

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value).await.map_err(backend_error)?;
		fs::rename(&temp_path, &path).await.map_err(backend_error)?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(backend_error)
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_error(e)),
		};

		let suffix = format!(".{}", EXTENSION);
		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_error)? {
			let file_name = entry.file_name();
			let Some(name) = file_name.to_str() else {
				continue;
			};
			let Some(stem) = name.strip_suffix(&suffix) else {
				continue;
			};
			if let Some(key) = decode_key(stem) {
				if key.starts_with(prefix) {
					keys.push(key);
				}
			}
		}
		Ok(keys)
	}
}
