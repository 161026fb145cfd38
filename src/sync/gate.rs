//! Notify-and-park gate.
//!
//! Passing a [`Gate`] means "park until released". [`Gate::notify_all`]
//! releases everyone currently parked and then blocks until every released
//! holder has dropped its [`GatePass`], however long their bodies take.
//!
//! The gate is an [`EntryCounter`] plus an internal [`Condition`]. The
//! counter is the single serialization point: while a notifier drains, it
//! holds the counter's admission, so callers arriving late park for the
//! *next* broadcast instead of extending the current drain.
//!
//! Entrants admitted before the notifier took admission may still park
//! during its drain (a batch scope scheduling its units on close). The
//! notifier broadcasts again for them, so they run in the same round.

use std::fmt;

use super::condition::Condition;
use super::entry::{EntryCounter, EntryPermit};
use super::race::Race;
use crate::tracing_compat::{debug, trace};

/// A gate whose broadcast returns only when all released holders are done.
#[derive(Clone, Default)]
pub struct Gate {
    entries: EntryCounter,
    condition: Condition,
}

impl Gate {
    /// Creates a closed gate with nobody parked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the gate and parks until the next broadcast.
    ///
    /// The caller's body runs after this returns; dropping the pass ends it.
    pub async fn acquire(&self) -> GatePass {
        let permit = self.entries.acquire().await;
        let parked = ParkedEntry {
            race: self.condition.enter(),
            permit,
        };
        parked.pass().await
    }

    /// Parks one more entrant admitted through `holder`, without
    /// suspending and without waiting for admission.
    pub(crate) fn park_alongside(&self, holder: &EntryPermit) -> ParkedEntry {
        // Registered before counted: a drain woken by the new count
        // already sees the registration.
        let race = self.condition.enter();
        ParkedEntry {
            race,
            permit: holder.split(),
        }
    }

    /// Releases every parked caller and waits until all of them left.
    pub async fn notify_all(&self) {
        let admission = self.entries.hold().await;
        let mut rounds = 0_usize;
        loop {
            // Exits resolve on wake; the counter is what gets drained here.
            let released = self.condition.broadcast(None).len();
            rounds += 1;
            trace!(released, rounds, "gate broadcast");
            if admission
                .wait_or(0, || self.condition.unfired_count() > 0)
                .await
            {
                break;
            }
        }
        debug!(rounds, "gate drained");
    }

    /// Callers currently parked at the gate.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.condition.waiter_count()
    }

    /// Callers inside the gate, parked or running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.entries.count()
    }

    pub(crate) fn entries(&self) -> &EntryCounter {
        &self.entries
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("parked", &self.parked())
            .field("active", &self.active())
            .finish()
    }
}

/// An entrant registered at the gate and not yet released.
#[derive(Debug)]
pub(crate) struct ParkedEntry {
    race: Race,
    permit: EntryPermit,
}

impl ParkedEntry {
    /// Waits for the broadcast that releases this entrant.
    pub(crate) async fn pass(self) -> GatePass {
        let Self { race, permit } = self;
        drop(race.wait().await);
        trace!(active = permit.counter().count(), "gate passed");
        GatePass { permit }
    }
}

/// A caller that has been released through a [`Gate`].
#[must_use = "the gate's notifier is released as soon as the pass is dropped"]
#[derive(Debug)]
pub struct GatePass {
    permit: EntryPermit,
}

impl GatePass {
    /// Leaves the gate. Equivalent to dropping the pass.
    pub fn release(self) {
        self.permit.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_pending_for, init_test_logging, run_test};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn notify_returns_after_every_body_finished() {
        init_test("notify_returns_after_every_body_finished");
        run_test(|| async {
            let gate = Gate::new();
            let done = Arc::new(AtomicUsize::new(0));
            for i in 0..8_u64 {
                let gate = gate.clone();
                let done = Arc::clone(&done);
                tokio::spawn(async move {
                    let pass = gate.acquire().await;
                    tokio::time::sleep(Duration::from_millis(5 * i)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    pass.release();
                });
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            crate::assert_with_log!(gate.parked() == 8, "all parked", 8usize, gate.parked());
            assert_eq!(done.load(Ordering::SeqCst), 0);

            gate.notify_all().await;
            let finished = done.load(Ordering::SeqCst);
            crate::assert_with_log!(finished == 8, "all finished", 8usize, finished);
            assert_eq!(gate.active(), 0);
        });
        crate::test_complete!("notify_returns_after_every_body_finished");
    }

    #[test]
    fn late_arrivals_wait_for_next_broadcast() {
        init_test("late_arrivals_wait_for_next_broadcast");
        run_test(|| async {
            let gate = Gate::new();
            let runs = Arc::new(AtomicUsize::new(0));

            let early = {
                let gate = gate.clone();
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    let pass = gate.acquire().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                    drop(pass);
                })
            };
            tokio::task::yield_now().await;

            let notifier = {
                let gate = gate.clone();
                tokio::spawn(async move { gate.notify_all().await })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;

            // Arrives while the first broadcast is draining.
            let late = {
                let gate = gate.clone();
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    let _pass = gate.acquire().await;
                    runs.fetch_add(10, Ordering::SeqCst);
                })
            };
            notifier.await.expect("notifier panicked");
            early.await.expect("early panicked");
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(gate.parked(), 1, "late caller parked for the next round");
            gate.notify_all().await;
            late.await.expect("late panicked");
            assert_eq!(runs.load(Ordering::SeqCst), 11);
        });
        crate::test_complete!("late_arrivals_wait_for_next_broadcast");
    }

    #[test]
    fn cancelled_parked_caller_leaves_gate() {
        init_test("cancelled_parked_caller_leaves_gate");
        run_test(|| async {
            let gate = Gate::new();
            let parked = {
                let gate = gate.clone();
                tokio::spawn(async move {
                    let _pass = gate.acquire().await;
                })
            };
            tokio::task::yield_now().await;
            assert_eq!(gate.active(), 1);
            assert_eq!(gate.parked(), 1);

            parked.abort();
            let _ = parked.await;
            assert_eq!(gate.active(), 0);
            assert_eq!(gate.parked(), 0);
            gate.notify_all().await;
        });
        crate::test_complete!("cancelled_parked_caller_leaves_gate");
    }

    #[test]
    fn acquire_parks_until_notified() {
        init_test("acquire_parks_until_notified");
        run_test(|| async {
            let gate = Gate::new();
            assert_pending_for(Duration::from_millis(100), "acquire", gate.acquire()).await;
            assert_eq!(gate.active(), 0, "timed-out acquire left the gate");
        });
        crate::test_complete!("acquire_parks_until_notified");
    }
}
