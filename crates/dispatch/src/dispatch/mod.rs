//! Dispatch engine
//!
//! `batch` partitions due records into rate-limited groups, `tick` drives one
//! full dispatch cycle, and `scheduler` fires ticks on a fixed cadence with
//! graceful shutdown.

mod batch;
mod scheduler;
mod tick;

pub use batch::{partition_by_cap, select_due, RateGroup};
pub use scheduler::DispatchScheduler;
pub use tick::{Dispatcher, TickStats};
