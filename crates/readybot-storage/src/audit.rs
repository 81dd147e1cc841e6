//! Audit log of cancelled orders.

use crate::{StorageError, StorageService};
use readybot_types::CancelledOrder;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const NAMESPACE: &str = "cancelled_orders";

pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Insert-or-ignore log keyed by order id.
pub struct CancelledOrderLog {
	storage: Arc<StorageService>,
	// Serializes the exists/store pair of `record`.
	write_lock: Mutex<()>,
}

impl CancelledOrderLog {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			write_lock: Mutex::new(()),
		}
	}

	/// Records a cancelled order. Returns false when the order id was already
	/// recorded; the first record wins.
	pub async fn record(&self, order: &CancelledOrder) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		if self.storage.exists(NAMESPACE, &order.id).await? {
			return Ok(false);
		}
		self.storage.store(NAMESPACE, &order.id, order).await?;
		info!(order_id = %order.id, store = %order.store, "Cancelled order recorded");
		Ok(true)
	}

	/// Records several orders, returning how many were new.
	pub async fn record_all(&self, orders: &[CancelledOrder]) -> Result<usize, StorageError> {
		let mut inserted = 0;
		for order in orders {
			if self.record(order).await? {
				inserted += 1;
			}
		}
		Ok(inserted)
	}

	/// Newest first.
	pub async fn list(&self, limit: usize) -> Result<Vec<CancelledOrder>, StorageError> {
		let mut orders: Vec<CancelledOrder> = self
			.storage
			.list::<CancelledOrder>(NAMESPACE)
			.await?
			.into_iter()
			.map(|(_, order)| order)
			.collect();
		orders.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
		orders.truncate(limit);
		Ok(orders)
	}

	pub async fn list_by_store(
		&self,
		store: &str,
		limit: usize,
	) -> Result<Vec<CancelledOrder>, StorageError> {
		let mut orders: Vec<CancelledOrder> = self
			.storage
			.list::<CancelledOrder>(NAMESPACE)
			.await?
			.into_iter()
			.map(|(_, order)| order)
			.filter(|order| order.store == store)
			.collect();
		orders.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
		orders.truncate(limit);
		Ok(orders)
	}
}
