//! Shared domain types for the ready-order bot.
//!
//! Every crate in the workspace speaks in terms of these types: orders as the
//! upstream reports them, the checkpoint cursor, the bearer credential, queue
//! entries with their configuration and counters, and the summaries produced
//! by a processing cycle.

pub mod checkpoint;
pub mod credential;
pub mod cycle;
pub mod order;
pub mod queue;

pub use checkpoint::*;
pub use credential::*;
pub use cycle::*;
pub use order::*;
pub use queue::*;
