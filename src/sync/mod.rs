//! Broadcast-and-drain synchronization primitives.
//!
//! Every primitive here answers the same question: after a broadcast,
//! *when has everyone who heard it finished acting on it?* A notifier does
//! not get control back until that point.
//!
//! # Primitives
//!
//! - [`Condition`]: condition variable whose `notify_all` drains its waiters
//! - [`EntryCounter`]: counts active entrants; `wait(n)` is a drain barrier
//! - [`Gate`]: park until released; the release drains every holder
//! - [`Batch`]: queue work now, release it later, learn when it finished
//! - [`Race`]: one waiter registered on several conditions at once
//! - [`notify_many`]: broadcast to several conditions as one step
//!
//! # Cancel Safety
//!
//! - Cancellation while parked: registrations are removed and exit handles
//!   resolved before the cancellation reaches the caller.
//! - Cancellation while holding a guard or permit: dropped, released.
//! - A notifier cancelled mid-drain releases its lock; the waiters it
//!   already woke keep running.

mod batch;
mod condition;
mod entry;
mod gate;
pub(crate) mod latch;
mod notify_many;
mod race;

pub use batch::{Batch, BatchScope};
pub use condition::{Condition, ConditionGuard, WaiterToken};
pub use entry::{Admission, EntryCounter, EntryPermit};
pub use gate::{Gate, GatePass};
pub use notify_many::notify_many;
pub use race::{Race, Woken, race_on};
