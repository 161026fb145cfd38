//! Deferred task batch.
//!
//! "Batch now, run later, know when all runs finished." Submitters open a
//! [`BatchScope`], queue units of work, and close it. Closing spawns one
//! task per unit; each task parks at the batch's [`Gate`] and runs its unit
//! only after [`Batch::notify_all`], which returns once every released unit
//! has finished.
//!
//! Units of one scope are started in submission order, so they park, wake
//! and begin running in that order too.
//!
//! ```ignore
//! let batch = Batch::new();
//! let mut scope = batch.open().await;
//! scope.submit(async { flush_segment(1).await });
//! scope.submit(async { flush_segment(2).await });
//! scope.close().await;
//!
//! batch.notify_all().await; // both flushes have completed here
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use super::entry::EntryPermit;
use super::gate::{Gate, ParkedEntry};
use crate::error::Result;
use crate::runtime::spawn_started;
use crate::tracing_compat::{debug, error, trace};

type Unit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A gate whose parked work is submitted in batches.
#[derive(Clone, Default)]
pub struct Batch {
    gate: Gate,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a submission scope.
    ///
    /// The scope counts as an entrant until it is closed, so a concurrent
    /// [`notify_all`](Self::notify_all) also waits for it.
    pub async fn open(&self) -> BatchScope {
        let permit = self.gate.entries().acquire().await;
        BatchScope {
            gate: self.gate.clone(),
            permit: Some(permit),
            queue: VecDeque::new(),
        }
    }

    /// Releases every parked unit and waits until all of them finished.
    pub async fn notify_all(&self) {
        self.gate.notify_all().await;
    }

    /// Units parked and waiting for the next broadcast.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.gate.parked()
    }

    /// Open scopes plus units parked or running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.gate.active()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch").field("gate", &self.gate).finish()
    }
}

/// An open submission scope of a [`Batch`].
///
/// Dropping a scope without [`close`](Self::close) still schedules every
/// queued unit, but does not wait for them to start.
#[must_use = "queued units are only scheduled when the scope ends"]
pub struct BatchScope {
    gate: Gate,
    permit: Option<EntryPermit>,
    queue: VecDeque<Unit>,
}

impl BatchScope {
    /// Queues `unit` to run after the next broadcast.
    pub fn submit<F>(&mut self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue.push_back(Box::pin(unit));
    }

    /// Units queued in this scope and not yet scheduled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Schedules every queued unit in order, then leaves the batch.
    ///
    /// Each unit is parked at the gate before its task is spawned, and the
    /// task is confirmed started before the next unit is taken. A
    /// `notify_all` already draining when the scope closes runs these
    /// units too.
    pub async fn close(mut self) {
        let total = self.queue.len();
        while let Some((parked, unit)) = self.park_next() {
            let _detached = spawn_started(run_unit(parked, unit)).await;
        }
        debug!(units = total, "batch scope closed");
        self.permit.take();
    }

    fn park_next(&mut self) -> Option<(ParkedEntry, Unit)> {
        let holder = self.permit.as_ref()?;
        let unit = self.queue.pop_front()?;
        Some((self.gate.park_alongside(holder), unit))
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(units = self.queue.len(), "batch scope dropped outside a runtime, units lost");
            return;
        };
        trace!(units = self.queue.len(), "scheduling units of an unclosed scope");
        while let Some((parked, unit)) = self.park_next() {
            drop(runtime.spawn(run_unit(parked, unit)));
        }
    }
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchScope")
            .field("pending", &self.queue.len())
            .finish()
    }
}

async fn run_unit(parked: ParkedEntry, unit: Unit) -> Result<()> {
    let pass = parked.pass().await;
    unit.await;
    pass.release();
    Ok(())
}
