//! Core engine of the ready-order bot.
//!
//! Wires the upstream client, the shared polling context and the three
//! actors working on it: the change monitor that queues orders turning
//! READY, the batch processor that marks them FULL_READY, and the cron
//! scheduler that runs the reconciling bulk sweep.

pub mod bot;
pub mod drain;
pub mod error;
pub mod monitor;
pub mod processor;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use bot::{ReadyBot, ReadyBotBuilder};
pub use drain::{DrainGate, DrainState};
pub use error::CoreError;
pub use monitor::ChangeMonitor;
pub use processor::BatchProcessor;
pub use scheduler::{ScheduleInfo, Scheduler};
