//! Entry counter with drain barrier.
//!
//! [`EntryCounter`] tracks how many callers are inside a scoped section.
//! [`EntryCounter::wait`] blocks until the count reaches a target **and**
//! keeps new callers out while it waits: `acquire` and `wait` contend for
//! the same FIFO admission token, and a parked `wait` keeps holding it.
//!
//! The consequence is a drain barrier: once `wait(0)` is queued, every
//! later `acquire` is admitted only after the drain returned.
//!
//! # Cancel Safety
//!
//! - `acquire().await`: cancel-safe, nothing is counted until it returns.
//! - `wait().await`: cancel-safe, cancelling releases admission.
//! - [`EntryPermit`]: dropping it always releases, including on unwind.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, watch};

use crate::tracing_compat::trace;

/// Counts active entrants and supports draining to a target count.
#[derive(Clone)]
pub struct EntryCounter {
    inner: Arc<EntryInner>,
}

struct EntryInner {
    /// FIFO admission token shared by `acquire` and `wait`.
    admission: AsyncMutex<()>,
    /// Current count; every change is published to drain waiters.
    count: watch::Sender<usize>,
}

impl EntryCounter {
    /// Creates a counter with no entrants.
    #[must_use]
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(EntryInner {
                admission: AsyncMutex::new(()),
                count,
            }),
        }
    }

    /// Current number of entrants.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.inner.count.borrow()
    }

    /// Enters the section, waiting behind any pending drain.
    pub async fn acquire(&self) -> EntryPermit {
        let _admission = self.inner.admission.lock().await;
        self.increment()
    }

    /// Enters the section unless a drain currently holds admission.
    pub fn try_acquire(&self) -> Option<EntryPermit> {
        let _admission = self.inner.admission.try_lock().ok()?;
        Some(self.increment())
    }

    /// Waits until the count equals `target`, admitting nobody meanwhile.
    pub async fn wait(&self, target: usize) {
        self.hold().await.wait(target).await;
    }

    /// Shorthand for `wait(0)`.
    pub async fn drain(&self) {
        self.wait(0).await;
    }

    /// Takes the admission token without waiting on the count yet.
    ///
    /// Lets a caller act (for example broadcast) while new entrants are
    /// already locked out, then wait on the [`Admission`].
    pub async fn hold(&self) -> Admission<'_> {
        let guard = self.inner.admission.lock().await;
        Admission {
            counter: self,
            _guard: guard,
        }
    }

    fn increment(&self) -> EntryPermit {
        self.inner.count.send_modify(|count| *count += 1);
        trace!(count = self.count(), "entry acquired");
        EntryPermit {
            counter: self.clone(),
        }
    }

    fn release(&self) {
        self.inner.count.send_modify(|count| {
            debug_assert!(*count > 0, "entry counter released below zero");
            *count = count.saturating_sub(1);
        });
        trace!(count = self.count(), "entry released");
    }
}

impl Default for EntryCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntryCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCounter")
            .field("count", &self.count())
            .finish()
    }
}

/// Held admission token of an [`EntryCounter`].
#[must_use = "admission is released as soon as this is dropped"]
pub struct Admission<'a> {
    counter: &'a EntryCounter,
    _guard: AsyncMutexGuard<'a, ()>,
}

impl Admission<'_> {
    /// Waits until the count equals `target`, then releases admission.
    pub async fn wait(self, target: usize) {
        let mut count = self.counter.inner.count.subscribe();
        // The sender lives as long as the counter, so this cannot fail.
        let _ = count.wait_for(|count| *count == target).await;
        trace!(target, "entry counter drained");
    }

    /// Waits until the count equals `target` or `interrupt` returns true,
    /// keeping admission. Returns true when the target was reached.
    ///
    /// `interrupt` is checked on entry and after every count change.
    pub(crate) async fn wait_or<F>(&self, target: usize, interrupt: F) -> bool
    where
        F: Fn() -> bool,
    {
        let mut count = self.counter.inner.count.subscribe();
        loop {
            let current = *count.borrow_and_update();
            if current == target {
                return true;
            }
            if interrupt() {
                return false;
            }
            if count.changed().await.is_err() {
                return true;
            }
        }
    }
}

impl fmt::Debug for Admission<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("count", &self.counter.count())
            .finish()
    }
}

/// One admitted entrant. Dropping it leaves the section.
#[must_use = "the entry is released as soon as the permit is dropped"]
pub struct EntryPermit {
    counter: EntryCounter,
}

impl EntryPermit {
    /// Leaves the section. Equivalent to dropping the permit.
    pub fn release(self) {
        drop(self);
    }

    /// Admits one more entrant on behalf of this one, bypassing admission.
    ///
    /// The holder is already counted, so a pending drain cannot have
    /// completed yet and keeps waiting for the new permit as well.
    pub(crate) fn split(&self) -> Self {
        self.counter.increment()
    }

    /// The counter this permit belongs to.
    #[must_use]
    pub fn counter(&self) -> &EntryCounter {
        &self.counter
    }
}

impl Drop for EntryPermit {
    fn drop(&mut self) {
        self.counter.release();
    }
}

impl fmt::Debug for EntryPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPermit")
            .field("count", &self.counter.count())
            .finish()
    }
}
