//! Interval-driven detection of orders turning READY.

use crate::processor::BatchProcessor;
use crate::CoreError;
use parking_lot::{Mutex, RwLock};
use readybot_state::{Observation, PollingContext};
use readybot_types::MonitoringStatus;
use readybot_upstream::UpstreamClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

struct RunningLoop {
	shutdown_tx: mpsc::Sender<()>,
	handle: JoinHandle<()>,
}

pub struct ChangeMonitor {
	context: Arc<PollingContext>,
	client: Arc<UpstreamClient>,
	processor: Arc<BatchProcessor>,
	interval: RwLock<Duration>,
	running: Mutex<Option<RunningLoop>>,
}

impl ChangeMonitor {
	pub fn new(
		context: Arc<PollingContext>,
		client: Arc<UpstreamClient>,
		processor: Arc<BatchProcessor>,
		interval: Duration,
	) -> Self {
		Self {
			context,
			client,
			processor,
			interval: RwLock::new(interval),
			running: Mutex::new(None),
		}
	}

	pub fn interval(&self) -> Duration {
		*self.interval.read()
	}

	/// Changes the polling interval. A running loop is stopped, its pass in
	/// progress awaited, and then restarted with the new interval.
	pub async fn set_interval(self: &Arc<Self>, interval: Duration) {
		*self.interval.write() = interval;
		if self.stop_and_wait().await {
			self.start_monitoring();
		}
	}

	pub fn is_active(&self) -> bool {
		self.running
			.lock()
			.as_ref()
			.is_some_and(|running| !running.handle.is_finished())
	}

	/// Fetches every active store at the current checkpoint and queues the
	/// orders that turned READY.
	#[instrument(skip(self))]
	pub async fn check_for_changes(&self) -> Result<Observation, CoreError> {
		let checkpoint = match self.context.checkpoint.current() {
			Some(checkpoint) => checkpoint,
			None => self.context.checkpoint.initialize(),
		};

		let sweep = self.client.fetch_all_stores(&checkpoint).await?;
		let orders: Vec<_> = sweep.orders().cloned().collect();
		let observation = self.context.observe_orders(&orders);

		if observation.changes > 0 || !observation.rejected.is_empty() {
			info!(
				fetched = orders.len(),
				changes = observation.changes,
				enqueued = observation.enqueued.len(),
				rejected = observation.rejected.len(),
				queue_length = self.context.queue.len(),
				"Order changes detected"
			);
		} else {
			debug!(fetched = orders.len(), "No order changes");
		}
		Ok(observation)
	}

	/// One monitor pass: check, then drain unless draining is left to the
	/// scheduler.
	pub async fn run_cycle(&self) -> Result<Observation, CoreError> {
		let observation = self.check_for_changes().await?;
		if !observation.enqueued.is_empty() && !self.context.queue_config().cron_sync {
			self.processor.drain_queue().await;
		}
		Ok(observation)
	}

	/// Starts the polling loop. Returns `false` when it already runs.
	pub fn start_monitoring(self: &Arc<Self>) -> bool {
		let mut running = self.running.lock();
		if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
			return false;
		}

		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		let monitor = Arc::clone(self);
		let handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });
		*running = Some(RunningLoop { shutdown_tx, handle });

		info!(interval_ms = self.interval().as_millis() as u64, "Order monitoring started");
		true
	}

	/// Signals the polling loop to stop and returns without waiting. A pass
	/// already in flight runs to completion in the background even though
	/// [`is_active`](Self::is_active) reports `false` at once; use
	/// [`stop_and_wait`](Self::stop_and_wait) when that matters. Returns
	/// `false` when the loop was not running.
	pub fn stop_monitoring(&self) -> bool {
		self.signal_stop().is_some()
	}

	/// Stops the polling loop and waits for its pass in flight to finish.
	pub async fn stop_and_wait(&self) -> bool {
		let Some(running) = self.signal_stop() else {
			return false;
		};
		if let Err(e) = running.handle.await {
			warn!(error = %e, "Monitor loop ended abnormally");
		}
		true
	}

	fn signal_stop(&self) -> Option<RunningLoop> {
		let running = self.running.lock().take()?;
		if running.handle.is_finished() {
			return None;
		}
		// A full channel means a stop is already pending.
		let _ = running.shutdown_tx.try_send(());
		info!("Order monitoring stopped");
		Some(running)
	}

	pub fn status(&self) -> MonitoringStatus {
		MonitoringStatus {
			is_active: self.is_active(),
			interval_ms: self.interval().as_millis() as u64,
			is_draining: self.processor.is_draining(),
			queue_length: self.context.queue.len(),
			tracked_orders: self.context.states.len(),
			checkpoint: self.context.checkpoint.current(),
			last_check: self.context.last_check(),
			queue_config: self.context.queue_config(),
			stats: self.context.stats(),
		}
	}

	async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
		let mut ticker = tokio::time::interval(self.interval());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;

				_ = shutdown_rx.recv() => {
					debug!("Monitor loop shutting down");
					break;
				}
				_ = ticker.tick() => {
					match self.run_cycle().await {
						Ok(_) => {}
						Err(CoreError::Upstream(e)) if e.is_credential_failure() => {
							error!(error = %e, "Monitor pass aborted, no usable credential");
						}
						Err(e) => warn!(error = %e, "Monitor pass failed"),
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::Harness;
	use readybot_types::{Checkpoint, OrderState, QueueConfig};

	fn monitor(h: &Harness, interval: Duration) -> Arc<ChangeMonitor> {
		Arc::new(ChangeMonitor::new(
			h.context.clone(),
			h.client.clone(),
			h.processor.clone(),
			interval,
		))
	}

	#[tokio::test]
	async fn test_check_queues_ready_orders_once() {
		let h = Harness::new(vec!["tok"]).await;
		h.add_store("S1").await;
		h.api.page("S1", &[("A1", OrderState::Ready), ("A2", OrderState::from("PREPARING"))], 9);
		let monitor = monitor(&h, Duration::from_secs(30));

		let first = monitor.check_for_changes().await.unwrap();
		let second = monitor.check_for_changes().await.unwrap();

		assert_eq!(first.changes, 2);
		assert_eq!(first.enqueued, vec!["A1"]);
		assert!(second.enqueued.is_empty());
		assert_eq!(h.context.queue.len(), 1);
		// Fetching does not move the checkpoint.
		let checkpoints = h.api.fetched_checkpoints();
		assert_eq!(checkpoints[0], checkpoints[1]);
		assert_ne!(h.context.checkpoint.current(), Some(Checkpoint::from(9u64)));
	}

	#[tokio::test]
	async fn test_cycle_drains_unless_cron_sync() {
		let h = Harness::new(vec!["tok"]).await;
		h.add_store("S1").await;
		h.api.page("S1", &[("A1", OrderState::Ready)], 9);
		let monitor = monitor(&h, Duration::from_secs(30));

		h.context
			.set_queue_config(QueueConfig {
				cron_sync: true,
				..Default::default()
			})
			.unwrap();
		monitor.run_cycle().await.unwrap();
		assert_eq!(h.context.queue.len(), 1);
		assert!(h.api.transitioned().is_empty());

		h.context.set_queue_config(QueueConfig::default()).unwrap();
		h.api.page("S1", &[("A1", OrderState::Ready), ("A2", OrderState::Ready)], 10);
		monitor.run_cycle().await.unwrap();
		assert!(h.context.queue.is_empty());
		assert_eq!(h.api.transitioned(), vec!["A1", "A2"]);
	}

	#[tokio::test]
	async fn test_start_and_stop_report_transitions() {
		let h = Harness::new(vec!["tok"]).await;
		let monitor = monitor(&h, Duration::from_secs(30));

		assert!(!monitor.stop_monitoring());
		assert!(monitor.start_monitoring());
		assert!(!monitor.start_monitoring());
		assert!(monitor.status().is_active);

		assert!(monitor.stop_monitoring());
		assert!(!monitor.stop_monitoring());
		assert!(!monitor.status().is_active);
	}

	#[tokio::test(start_paused = true)]
	async fn test_loop_polls_on_interval() {
		let h = Harness::new(vec!["tok"]).await;
		h.add_store("S1").await;
		let monitor = monitor(&h, Duration::from_secs(30));

		monitor.start_monitoring();
		tokio::time::sleep(Duration::from_secs(65)).await;
		monitor.stop_monitoring();

		// Immediate first tick, then at 30s and 60s.
		assert_eq!(h.api.fetched_checkpoints().len(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_interval_change_waits_for_pass_in_flight() {
		let h = Harness::new(vec!["tok"]).await;
		h.add_store("S1").await;
		h.api.set_fetch_delay(Duration::from_secs(10));
		let monitor = monitor(&h, Duration::from_secs(30));

		monitor.start_monitoring();
		tokio::time::sleep(Duration::from_secs(1)).await;
		let started = tokio::time::Instant::now();

		monitor.set_interval(Duration::from_secs(60)).await;
		assert!(started.elapsed() >= Duration::from_secs(9));
		assert!(monitor.is_active());
		assert_eq!(monitor.interval(), Duration::from_secs(60));

		tokio::time::sleep(Duration::from_secs(20)).await;
		assert!(monitor.stop_and_wait().await);
		assert!(!monitor.is_active());

		// The restarted loop polled once, never alongside the old one.
		assert_eq!(h.api.fetched_checkpoints().len(), 2);
		assert_eq!(h.api.max_concurrent_fetches(), 1);
	}
}
