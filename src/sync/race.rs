//! Multi-condition race.
//!
//! A [`Race`] registers one shared waiter handle and one shared exit handle
//! on several conditions at once. Whichever condition broadcasts first
//! resolves the race; every other condition that broadcasts while the race
//! is still held simply waits on the same exit handle.
//!
//! ```ignore
//! let woken = Race::register(&[c1.clone(), c2.clone()]).wait().await;
//! println!("fired by condition #{}", woken.index());
//! // ... act ...
//! drop(woken); // unregisters everywhere, then releases every notifier
//! ```
//!
//! # Cancel Safety
//!
//! - Cancelled while awaiting: the registration is removed from every
//!   condition and the exit handle is resolved, so no notifier hangs.
//! - Dropped without ever being awaited: caller misuse. The registration
//!   is cleaned up and then the drop panics with
//!   [`ErrorKind::AbandonedRace`](crate::ErrorKind::AbandonedRace).
//!   Use [`Race::withdraw`] to give up on purpose.
//! - Moved into a spawned task that is cancelled before its first poll:
//!   treated as cancellation, since the race is dropped by another task
//!   than the one that registered it. A race cancelled while its own
//!   registering task is suspended elsewhere, before `wait`, still counts
//!   as abandoned; call `wait` before any other await.

use std::fmt;
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;
use tokio::task::Id as TaskId;

use super::condition::{Condition, Registration, WaiterToken};
use super::latch::Latch;
use crate::error::Error;
use crate::tracing_compat::{error, trace};

/// One waiter registered on several conditions.
#[must_use = "a race must be awaited or withdrawn"]
pub struct Race {
    conditions: SmallVec<[Condition; 4]>,
    token: WaiterToken,
    waiter: Arc<Latch>,
    exit: Arc<Latch>,
    owner: Arc<OnceLock<TaskId>>,
    registered_by: Option<TaskId>,
    awaited: bool,
}

/// Registers a race on `conditions`. See [`Race::register`].
pub fn race_on(conditions: &[Condition]) -> Race {
    Race::register(conditions)
}

impl Race {
    /// Atomically registers on every condition in `conditions`.
    ///
    /// No suspension point separates the individual registrations, so a
    /// broadcast can never observe the race registered on only some of
    /// them.
    ///
    /// # Panics
    /// Panics if `conditions` is empty.
    pub fn register(conditions: &[Condition]) -> Self {
        assert!(!conditions.is_empty(), "race requires at least one condition");
        let token = WaiterToken::next();
        let waiter = Latch::new();
        let exit = Latch::new();
        let owner = Arc::new(OnceLock::new());
        let registration = Registration {
            token,
            waiter: &waiter,
            exit: &exit,
            owner: &owner,
        };
        for (slot, condition) in conditions.iter().enumerate() {
            condition.register(&registration, slot);
        }
        Self {
            conditions: conditions.iter().cloned().collect(),
            token,
            waiter,
            exit,
            owner,
            registered_by: tokio::task::try_id(),
            awaited: false,
        }
    }

    /// The token shared by this race's registrations.
    #[must_use]
    pub fn token(&self) -> WaiterToken {
        self.token
    }

    /// The conditions this race is registered on, in registration order.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true once some condition has fired this race.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.waiter.is_fired()
    }

    /// Waits for the first broadcast among the registered conditions.
    ///
    /// The task that polls this becomes the race's owner: a broadcast it
    /// issues later does not wait on this race's exit.
    pub async fn wait(mut self) -> Woken {
        self.awaited = true;
        if let Some(task) = tokio::task::try_id() {
            let _ = self.owner.set(task);
        }
        let index = self.waiter.fired().await;
        trace!(token = self.token.as_u64(), index, "race fired");
        Woken { race: self, index }
    }

    /// Abandons the registration without waiting.
    pub fn withdraw(mut self) {
        self.awaited = true;
    }

    /// True when the race is being dropped by a task other than the one
    /// that registered it, which only happens when the receiving task is
    /// torn down before it ran.
    fn dropped_by_cancelled_task(&self) -> bool {
        let current = tokio::task::try_id();
        current.is_some() && current != self.registered_by
    }

    fn release(&self) {
        for condition in &self.conditions {
            // Idempotent: a condition may already have dropped us.
            condition.unregister(self.token);
        }
        self.exit.fire(0);
    }
}

impl Drop for Race {
    fn drop(&mut self) {
        self.release();
        if !self.awaited && !std::thread::panicking() && !self.dropped_by_cancelled_task() {
            let err = Error::abandoned_race(self.conditions.len());
            error!(token = self.token.as_u64(), error = %err, "race misuse");
            panic!("{err}");
        }
    }
}

impl fmt::Debug for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Race")
            .field("token", &self.token)
            .field("conditions", &self.conditions.len())
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// A fired race: the waiter's critical section.
///
/// Dropping it unregisters from every condition and releases every
/// notifier draining on this waiter.
#[must_use = "notifiers are released as soon as the guard is dropped"]
pub struct Woken {
    race: Race,
    index: usize,
}

impl Woken {
    /// Index (in registration order) of the condition that fired first.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The condition that fired first.
    #[must_use]
    pub fn condition(&self) -> &Condition {
        &self.race.conditions[self.index]
    }

    /// The token shared by this race's registrations.
    #[must_use]
    pub fn token(&self) -> WaiterToken {
        self.race.token
    }
}

impl fmt::Debug for Woken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Woken")
            .field("token", &self.race.token)
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_completes_within, init_test_logging, run_test};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn registration_is_shared_across_conditions() {
        init_test("registration_is_shared_across_conditions");
        let conds: Vec<Condition> = (0..3).map(|_| Condition::new()).collect();
        let race = Race::register(&conds);
        for cond in &conds {
            assert!(cond.is_registered(race.token()));
            assert_eq!(cond.waiter_count(), 1);
        }
        let token = race.token();
        race.withdraw();
        for cond in &conds {
            assert!(!cond.is_registered(token));
        }
        crate::test_complete!("registration_is_shared_across_conditions");
    }

    #[test]
    fn one_trigger_wakes_race_exactly_once() {
        init_test("one_trigger_wakes_race_exactly_once");
        run_test(|| async {
            let conds: Vec<Condition> = (0..4).map(|_| Condition::new()).collect();
            let wakes = Arc::new(AtomicUsize::new(0));
            let race = Race::register(&conds);
            let token = race.token();
            let task = {
                let wakes = Arc::clone(&wakes);
                tokio::spawn(async move {
                    let woken = race.wait().await;
                    wakes.fetch_add(1, Ordering::SeqCst);
                    woken.index()
                })
            };

            conds[2].fast_notify().await;
            let index = task.await.expect("race task panicked");
            crate::assert_with_log!(index == 2, "fired by third condition", 2usize, index);
            assert_eq!(wakes.load(Ordering::SeqCst), 1);
            for cond in &conds {
                crate::assert_with_log!(
                    !cond.is_registered(token),
                    "handle removed",
                    false,
                    cond.is_registered(token)
                );
            }

            // Remaining conditions have nothing left to drain.
            for cond in &conds {
                assert_completes_within(Duration::from_millis(1), "idle notify", cond.fast_notify())
                    .await;
            }
            assert_eq!(wakes.load(Ordering::SeqCst), 1);
        });
        crate::test_complete!("one_trigger_wakes_race_exactly_once");
    }

    #[test]
    fn second_condition_waits_on_shared_exit() {
        init_test("second_condition_waits_on_shared_exit");
        run_test(|| async {
            let c1 = Condition::new();
            let c2 = Condition::new();
            let race = Race::register(&[c1.clone(), c2.clone()]);
            let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
            tokio::spawn(async move {
                let woken = race.wait().await;
                let _ = release_rx.await;
                drop(woken);
            });

            let first = {
                let c1 = c1.clone();
                tokio::spawn(async move { c1.fast_notify().await })
            };
            let second = {
                let c2 = c2.clone();
                tokio::spawn(async move { c2.fast_notify().await })
            };
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(!first.is_finished(), "c1 drains until the waiter exits");
            assert!(!second.is_finished(), "c2 drains on the shared exit handle");

            release_tx.send(()).expect("waiter gone");
            first.await.expect("c1 notifier panicked");
            second.await.expect("c2 notifier panicked");
        });
        crate::test_complete!("second_condition_waits_on_shared_exit");
    }

    #[test]
    #[should_panic(expected = "race dropped without being awaited")]
    fn dropping_unawaited_race_panics() {
        init_test("dropping_unawaited_race_panics");
        let cond = Condition::new();
        let race = cond.enter();
        drop(race);
    }

    #[test]
    fn abandoned_race_is_cleaned_before_panicking() {
        init_test("abandoned_race_is_cleaned_before_panicking");
        let cond = Condition::new();
        let cond_inner = cond.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let race = cond_inner.enter();
            drop(race);
        }));
        assert!(result.is_err());
        crate::assert_with_log!(cond.waiter_count() == 0, "cleaned", 0usize, cond.waiter_count());
        crate::test_complete!("abandoned_race_is_cleaned_before_panicking");
    }

    #[test]
    fn race_in_task_aborted_before_first_poll_is_cancelled() {
        init_test("race_in_task_aborted_before_first_poll_is_cancelled");
        run_test(|| async {
            let cond = Condition::new();
            let race = cond.enter();
            let task = tokio::spawn(async move {
                let _woken = race.wait().await;
            });
            task.abort();
            let err = task.await.expect_err("task never ran");
            crate::assert_with_log!(err.is_cancelled(), "reported as cancelled", true, err.is_cancelled());
            assert_eq!(cond.waiter_count(), 0);
            assert_completes_within(Duration::from_millis(1), "notify", cond.fast_notify()).await;
        });
        crate::test_complete!("race_in_task_aborted_before_first_poll_is_cancelled");
    }

    #[test]
    #[should_panic(expected = "at least one condition")]
    fn empty_race_is_rejected() {
        let _ = Race::register(&[]);
    }
}
