//! Broadcast-drain condition.
//!
//! [`Condition`] is a condition variable whose broadcast does not return
//! until every waiter it woke has left its critical section. Each waiter
//! registers a *waiter handle* (resolved by the notifier) and an *exit
//! handle* (resolved by the waiter when it is done acting). The notifier
//! snapshots the exit handles present at broadcast time and awaits all of
//! them.
//!
//! # Locking
//!
//! The condition has two locks with different jobs:
//!
//! - the **condition mutex** ([`Condition::lock`]) is an async mutex held
//!   across `notify_all`, so broadcasts on one condition are serialized;
//! - the **state lock** guards the waiter/exit lists. It is never held
//!   across a suspension point, which is what makes multi-condition
//!   registration atomic.
//!
//! # Hangs
//!
//! A woken waiter that never drops its [`Woken`](super::Woken) guard keeps
//! `notify_all` pending forever. That is a caller bug, not something the
//! condition recovers from.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::Id as TaskId;

use super::latch::Latch;
use super::race::Race;
use crate::tracing_compat::trace;

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WAITER_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identity of one registration (one race or one `wait` call).
///
/// A race registered on several conditions uses the same token on each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterToken(u64);

impl WaiterToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_WAITER_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A broadcastable wait point whose `notify_all` drains its waiters.
///
/// Cloning a `Condition` yields another handle to the same condition.
#[derive(Clone)]
pub struct Condition {
    inner: Arc<ConditionInner>,
}

struct ConditionInner {
    id: u64,
    lock: Arc<AsyncMutex<()>>,
    state: Mutex<ConditionState>,
}

/// Waiters and exits are kept as matching pairs, FIFO by registration.
#[derive(Debug, Default)]
struct ConditionState {
    waiters: VecDeque<WaiterEntry>,
    exits: VecDeque<ExitEntry>,
}

#[derive(Debug)]
struct WaiterEntry {
    token: WaiterToken,
    /// Position of this condition inside the registering race.
    slot: usize,
    latch: Arc<Latch>,
}

#[derive(Debug)]
struct ExitEntry {
    token: WaiterToken,
    latch: Arc<Latch>,
    /// Task that awaits the registration, set on its first poll.
    owner: Arc<OnceLock<TaskId>>,
}

/// Handles shared by every condition a registration is placed on.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    pub(crate) token: WaiterToken,
    pub(crate) waiter: &'a Arc<Latch>,
    pub(crate) exit: &'a Arc<Latch>,
    pub(crate) owner: &'a Arc<OnceLock<TaskId>>,
}

impl Condition {
    /// Creates a condition with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ConditionInner {
                id: NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed),
                lock: Arc::new(AsyncMutex::new(())),
                state: Mutex::new(ConditionState::default()),
            }),
        }
    }

    /// Process-unique identifier, used to order multi-condition locking.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Enters the condition's critical section.
    ///
    /// Dropping the returned guard leaves it.
    pub async fn lock(&self) -> ConditionGuard {
        let guard = Arc::clone(&self.inner.lock).lock_owned().await;
        ConditionGuard {
            condition: self.clone(),
            _lock: guard,
        }
    }

    /// Shorthand for `lock`, `notify_all`, unlock.
    pub async fn fast_notify(&self) {
        let mut guard = self.lock().await;
        guard.notify_all().await;
    }

    /// Registers a drain-tracked wait on this condition alone.
    ///
    /// Equivalent to [`Race::register`] with a single condition.
    pub fn enter(&self) -> Race {
        Race::register(std::slice::from_ref(self))
    }

    /// Number of registrations currently on this condition.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Returns true if `token` is still registered here.
    #[must_use]
    pub fn is_registered(&self, token: WaiterToken) -> bool {
        self.inner
            .state
            .lock()
            .waiters
            .iter()
            .any(|entry| entry.token == token)
    }

    /// Registrations not yet fired by any broadcast.
    pub(crate) fn unfired_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .waiters
            .iter()
            .filter(|entry| !entry.latch.is_fired())
            .count()
    }

    pub(crate) fn register(&self, registration: &Registration<'_>, slot: usize) {
        let token = registration.token;
        let mut state = self.inner.state.lock();
        state.waiters.push_back(WaiterEntry {
            token,
            slot,
            latch: Arc::clone(registration.waiter),
        });
        state.exits.push_back(ExitEntry {
            token,
            latch: Arc::clone(registration.exit),
            owner: Arc::clone(registration.owner),
        });
        debug_assert_eq!(state.waiters.len(), state.exits.len());
        trace!(condition = self.inner.id, token = token.0, "registered waiter");
    }

    /// Removes the waiter/exit pair for `token`. Idempotent.
    pub(crate) fn unregister(&self, token: WaiterToken) -> bool {
        let mut state = self.inner.state.lock();
        let Some(index) = state.waiters.iter().position(|e| e.token == token) else {
            return false;
        };
        state.waiters.remove(index);
        if let Some(exit) = state.exits.iter().position(|e| e.token == token) {
            state.exits.remove(exit);
        }
        debug_assert_eq!(state.waiters.len(), state.exits.len());
        true
    }

    /// Wakes every registered waiter and returns the exit handles that a
    /// drain must await.
    ///
    /// Skipped: `except`, already-resolved exits, and exits owned by the
    /// calling task, whose drain would otherwise wait on itself.
    pub(crate) fn broadcast(&self, except: Option<WaiterToken>) -> Vec<Arc<Latch>> {
        let caller = tokio::task::try_id();
        let is_own = |entry: &ExitEntry| {
            Some(entry.token) == except
                || caller.is_some_and(|caller| entry.owner.get() == Some(&caller))
        };
        let (to_wake, exits) = {
            let state = self.inner.state.lock();
            let to_wake: SmallVec<[(usize, Arc<Latch>); 8]> = state
                .waiters
                .iter()
                .map(|entry| (entry.slot, Arc::clone(&entry.latch)))
                .collect();
            let exits: Vec<Arc<Latch>> = state
                .exits
                .iter()
                .filter(|entry| !is_own(*entry) && !entry.latch.is_fired())
                .map(|entry| Arc::clone(&entry.latch))
                .collect();
            (to_wake, exits)
        };
        trace!(
            condition = self.inner.id,
            woken = to_wake.len(),
            draining = exits.len(),
            "broadcast"
        );
        for (slot, latch) in to_wake {
            latch.fire(slot);
        }
        exits
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("id", &self.inner.id)
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

/// Awaits every exit handle in `exits`.
pub(crate) async fn drain(exits: Vec<Arc<Latch>>) {
    for exit in exits {
        exit.fired().await;
    }
}

/// The held condition mutex.
#[must_use = "the critical section ends as soon as the guard is dropped"]
pub struct ConditionGuard {
    condition: Condition,
    _lock: OwnedMutexGuard<()>,
}

impl ConditionGuard {
    /// The condition this guard belongs to.
    #[must_use]
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Wakes every registered waiter, then waits until each of them has
    /// left its critical section.
    ///
    /// Waiters registered after this call begins are neither woken nor
    /// waited for. If the calling task is itself woken through a race on
    /// this condition, its own exit is not waited for.
    pub async fn notify_all(&mut self) {
        drain(self.condition.broadcast(None)).await;
    }

    /// Like [`notify_all`](Self::notify_all) but also does not wait on the
    /// registration identified by `own`.
    ///
    /// Needed when the race was awaited by another task than the one
    /// notifying, for example a helper spawned from a rule action.
    pub async fn notify_all_except(&mut self, own: WaiterToken) {
        drain(self.condition.broadcast(Some(own))).await;
    }

    /// Standard condition-variable wait.
    ///
    /// Registers, releases the mutex, parks until a broadcast, then
    /// re-acquires the mutex. The registration's exit is resolved as soon
    /// as the waiter is woken, so the notifier does not wait for the
    /// re-acquisition (it still holds the mutex at that point).
    pub async fn wait(self) -> Self {
        let condition = self.condition.clone();
        let race = condition.enter();
        drop(self);
        drop(race.wait().await);
        condition.lock().await
    }

    /// Waits until `predicate` holds, re-checking after every broadcast.
    pub async fn wait_until<P>(mut self, mut predicate: P) -> Self
    where
        P: FnMut() -> bool,
    {
        while !predicate() {
            self = self.wait().await;
        }
        self
    }
}

impl fmt::Debug for ConditionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionGuard")
            .field("condition", &self.condition.id())
            .finish()
    }
}
