//! Cron-driven bulk sweeps.

use crate::processor::BatchProcessor;
use crate::CoreError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use readybot_config::{parse_cron_pattern, parse_timezone, DEFAULT_CRON_PATTERN};
use readybot_state::PollingContext;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wait used when a pattern has no upcoming fire time.
const IDLE_RECHECK: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
	pub pattern: String,
	pub timezone: String,
	pub running: bool,
	pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct ActiveSchedule {
	pattern: String,
	schedule: cron::Schedule,
	timezone: Tz,
}

impl ActiveSchedule {
	/// Invalid patterns fall back to every five minutes, invalid timezones
	/// to UTC.
	fn resolve(pattern: &str, timezone: &str) -> Result<Self, CoreError> {
		let (pattern, schedule) = match parse_cron_pattern(pattern) {
			Ok(schedule) => (pattern.trim().to_string(), schedule),
			Err(e) => {
				warn!(error = %e, fallback = DEFAULT_CRON_PATTERN, "Invalid cron pattern, using fallback");
				let schedule = parse_cron_pattern(DEFAULT_CRON_PATTERN)
					.map_err(|e| CoreError::Schedule(e.to_string()))?;
				(DEFAULT_CRON_PATTERN.to_string(), schedule)
			}
		};

		let timezone = parse_timezone(timezone).unwrap_or_else(|e| {
			warn!(error = %e, "Invalid timezone, using UTC");
			chrono_tz::UTC
		});

		Ok(Self {
			pattern,
			schedule,
			timezone,
		})
	}

	fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
		self.schedule
			.after(&now.with_timezone(&self.timezone))
			.next()
			.map(|at| at.with_timezone(&Utc))
	}
}

struct RunningLoop {
	shutdown_tx: mpsc::Sender<()>,
	handle: JoinHandle<()>,
}

/// Runs the bulk sweep on a cron schedule evaluated in an IANA timezone.
/// With `cron_sync` set, each tick also drains the queue.
pub struct Scheduler {
	processor: Arc<BatchProcessor>,
	context: Arc<PollingContext>,
	active: RwLock<ActiveSchedule>,
	changed: Notify,
	running: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
	pub fn new(
		processor: Arc<BatchProcessor>,
		context: Arc<PollingContext>,
		pattern: &str,
		timezone: &str,
	) -> Result<Self, CoreError> {
		Ok(Self {
			processor,
			context,
			active: RwLock::new(ActiveSchedule::resolve(pattern, timezone)?),
			changed: Notify::new(),
			running: Mutex::new(None),
		})
	}

	/// Swaps the schedule. A running loop picks it up immediately.
	pub fn reconfigure(&self, pattern: &str, timezone: &str) -> Result<ScheduleInfo, CoreError> {
		let resolved = ActiveSchedule::resolve(pattern, timezone)?;
		info!(pattern = %resolved.pattern, timezone = resolved.timezone.name(), "Schedule reconfigured");
		*self.active.write() = resolved;
		self.changed.notify_one();
		Ok(self.info())
	}

	pub fn info(&self) -> ScheduleInfo {
		let active = self.active.read();
		ScheduleInfo {
			pattern: active.pattern.clone(),
			timezone: active.timezone.name().to_string(),
			running: self.is_running(),
			next_run: active.next_after(Utc::now()),
		}
	}

	pub fn next_run(&self) -> Option<DateTime<Utc>> {
		self.active.read().next_after(Utc::now())
	}

	pub fn is_running(&self) -> bool {
		self.running
			.lock()
			.as_ref()
			.is_some_and(|running| !running.handle.is_finished())
	}

	pub fn start(self: &Arc<Self>) -> bool {
		let mut running = self.running.lock();
		if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
			return false;
		}

		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		let scheduler = Arc::clone(self);
		let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });
		*running = Some(RunningLoop { shutdown_tx, handle });

		let active = self.active.read();
		info!(pattern = %active.pattern, timezone = active.timezone.name(), "Scheduler started");
		true
	}

	pub fn stop(&self) -> bool {
		let Some(running) = self.running.lock().take() else {
			return false;
		};
		if running.handle.is_finished() {
			return false;
		}
		let _ = running.shutdown_tx.try_send(());
		info!("Scheduler stopped");
		true
	}

	/// One scheduled tick: bulk sweep, then drain when draining is left to
	/// the scheduler.
	pub async fn run_tick(&self) {
		let summary = self.processor.process_orders().await;
		debug!(success = summary.success, processed = summary.processed, "Scheduled sweep done");

		if self.context.queue_config().cron_sync {
			self.processor.drain_queue().await;
		}
	}

	async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
		loop {
			let next = self.next_run();
			let wait = match next {
				Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
				None => IDLE_RECHECK,
			};
			debug!(next_run = ?next, "Waiting for next scheduled sweep");

			tokio::select! {
				_ = tokio::time::sleep(wait) => {
					if next.is_some() {
						self.run_tick().await;
					}
				}
				_ = self.changed.notified() => continue,
				_ = shutdown_rx.recv() => break,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::Harness;
	use chrono::{TimeZone, Timelike};
	use readybot_types::{OrderState, QueueConfig};

	fn scheduler(h: &Harness, pattern: &str, timezone: &str) -> Arc<Scheduler> {
		Arc::new(Scheduler::new(h.processor.clone(), h.context.clone(), pattern, timezone).unwrap())
	}

	#[test]
	fn test_five_field_pattern_in_timezone() {
		let active = ActiveSchedule::resolve("0 9 * * *", "America/Sao_Paulo").unwrap();
		let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

		// 09:00 in Sao Paulo (UTC-3) is 12:00 UTC.
		let next = active.next_after(now).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
	}

	#[test]
	fn test_invalid_pattern_and_timezone_fall_back() {
		let active = ActiveSchedule::resolve("every five minutes", "Mars/Olympus").unwrap();
		assert_eq!(active.pattern, DEFAULT_CRON_PATTERN);
		assert_eq!(active.timezone, chrono_tz::UTC);

		let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 1, 30).unwrap();
		let next = active.next_after(now).unwrap();
		assert_eq!((next.minute(), next.second()), (5, 0));
	}

	#[tokio::test]
	async fn test_reconfigure_swaps_schedule() {
		let h = Harness::new(vec!["tok"]).await;
		let scheduler = scheduler(&h, "*/5 * * * *", "UTC");

		let info = scheduler.reconfigure("30 2 * * *", "Europe/Lisbon").unwrap();
		assert_eq!(info.pattern, "30 2 * * *");
		assert_eq!(info.timezone, "Europe/Lisbon");
		assert!(info.next_run.is_some());
		assert!(!info.running);
	}

	#[tokio::test]
	async fn test_tick_drains_only_with_cron_sync() {
		let h = Harness::new(vec!["tok"]).await;
		let scheduler = scheduler(&h, "*/5 * * * *", "UTC");
		h.context.enqueue_order(&crate::testing::ready("Q1", "S9")).unwrap();

		scheduler.run_tick().await;
		assert_eq!(h.context.queue.len(), 1);

		h.context
			.set_queue_config(QueueConfig {
				cron_sync: true,
				..Default::default()
			})
			.unwrap();
		h.add_store("S1").await;
		h.api.page("S1", &[("A1", OrderState::Ready)], 3);
		scheduler.run_tick().await;

		assert!(h.context.queue.is_empty());
		assert_eq!(h.api.transitioned(), vec!["A1", "Q1"]);
	}

	#[tokio::test]
	async fn test_start_and_stop() {
		let h = Harness::new(vec!["tok"]).await;
		let scheduler = scheduler(&h, "*/5 * * * *", "UTC");

		assert!(scheduler.start());
		assert!(!scheduler.start());
		assert!(scheduler.is_running());
		assert!(scheduler.stop());
		assert!(!scheduler.stop());
	}
}
