//! Quiesce: broadcast-and-drain synchronization for cooperative async tasks.
//!
//! # Overview
//!
//! An ordinary condition variable answers "wake everyone". The primitives
//! in this crate answer the follow-up question: *when has everyone who was
//! woken finished acting on it?* A notifier does not regain control until
//! every waiter it released has left its critical section.
//!
//! # Core Guarantees
//!
//! - **Drain on broadcast**: `notify_all` returns only after every waiter
//!   it woke has exited
//! - **Snapshot semantics**: waiters registering after a broadcast began
//!   are left for the next one
//! - **Atomic multi-registration**: a race is registered on all of its
//!   conditions or on none
//! - **Cancel-correctness**: a cancelled parked task leaves no registration
//!   or count behind
//! - **Fault containment**: supervised loops survive their bodies' errors
//!   and panics, and stop on cancellation
//!
//! # Module Structure
//!
//! - [`sync`]: conditions, entry counter, gate, batch, race, `notify_many`
//! - [`runtime`]: launch barrier, task handles, cooperative yield
//! - [`supervision`]: supervised infinite loops and their configuration
//! - [`rule`]: reactive rules built on races and supervised loops
//! - [`error`](mod@error): error types
//! - [`tracing_compat`]: optional tracing integration (`tracing-integration`)
//! - [`test_utils`]: shared test helpers (`test-internals`)
//!
//! # Scheduling Model
//!
//! Everything assumes a cooperative scheduler. The primitives are `Send`
//! and work on Tokio's multi-threaded runtime, but their ordering
//! guarantees are stated for, and tested on, the current-thread runtime.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod rule;
pub mod runtime;
pub mod supervision;
pub mod sync;
pub mod tracing_compat;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use error::{Error, ErrorKind, Result, ResultExt};
pub use rule::{Firing, Rule, RuleBuilder};
pub use runtime::{TaskHandle, launch_and_wait_started};
pub use supervision::{LoopConfig, LoopStats, Supervised};
pub use sync::{Batch, Condition, EntryCounter, Gate, Race, notify_many, race_on};
