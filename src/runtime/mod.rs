//! Task launching on top of the Tokio executor.
//!
//! - [`launch_and_wait_started`]: spawn a group and wait until every body
//!   confirmed it began executing
//! - [`spawn_started`]: single-task variant confirming on first poll
//! - [`TaskHandle`] / [`CancelHandle`]: join or cancel what was launched
//! - [`yield_now`]: explicit cooperative suspension point (Tokio's)
//!
//! The primitives in [`crate::sync`] only assume a cooperative scheduler;
//! the current-thread runtime is sufficient for all of them.

pub mod task;

pub use task::{
    CancelHandle, Started, TaskHandle, launch_and_wait_started, launch_and_wait_started_with_exit,
    spawn_started,
};
pub use tokio::task::yield_now;
