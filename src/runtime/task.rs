//! Task launch barrier and task handles.
//!
//! [`launch_and_wait_started`] spawns a group of tasks and returns only once
//! every one of them confirmed that its body began executing. Callers use
//! it when they must be sure a task is already registered on a condition
//! before they broadcast.
//!
//! # Ownership
//!
//! A [`TaskHandle`] does not own its tasks. Dropping the handle detaches
//! them; they keep running until they finish or are cancelled through a
//! [`CancelHandle`].
//!
//! # Cancel Safety
//!
//! Dropping the future returned by [`launch_and_wait_started`] before it
//! resolved aborts every task of the group launched so far.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::error::{Error, Result};
use crate::sync::latch::Latch;
use crate::tracing_compat::debug;

/// Start confirmation handed to a launched body.
///
/// Call [`confirm`](Self::confirm) once the body reached the point the
/// launcher cares about. Dropping it confirms as well, so a body that
/// returns or panics early never blocks its launcher.
#[derive(Debug)]
pub struct Started {
    latch: Arc<Latch>,
}

impl Started {
    fn new(latch: Arc<Latch>) -> Self {
        Self { latch }
    }

    /// Signals the launcher that the body has started.
    pub fn confirm(self) {
        drop(self);
    }
}

impl Drop for Started {
    fn drop(&mut self) {
        self.latch.fire(0);
    }
}

/// Handle to one or more spawned tasks.
#[must_use = "dropping a TaskHandle detaches its tasks"]
pub struct TaskHandle {
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl TaskHandle {
    pub(crate) fn from_handles(tasks: Vec<JoinHandle<Result<()>>>) -> Self {
        Self { tasks }
    }

    /// Number of tasks behind this handle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the handle holds no task.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Requests cancellation of every task.
    ///
    /// Each task is cancelled at its next suspension point; registrations
    /// it holds are cleaned up as its future is dropped.
    pub fn cancel(&self) {
        debug!(tasks = self.tasks.len(), "cancelling tasks");
        for task in &self.tasks {
            task.abort();
        }
    }

    /// A cloneable handle that can cancel these tasks without owning them.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tasks: self.tasks.iter().map(JoinHandle::abort_handle).collect(),
        }
    }

    /// Returns true once every task has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Moves the tasks of `other` into this handle.
    pub fn merge(&mut self, other: Self) {
        self.tasks.extend(other.tasks);
    }

    /// Waits for every task and returns the first failure, if any.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled) if a task was
    ///   cancelled or ended with a cancellation error.
    /// - [`ErrorKind::Panicked`](crate::ErrorKind::Panicked) if a task
    ///   panicked.
    /// - Whatever error a task body returned.
    pub async fn join(self) -> Result<()> {
        let mut outcome = Ok(());
        for task in self.tasks {
            let result = task.await.unwrap_or_else(|err| Err(join_error(err)));
            if let Err(err) = result {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("tasks", &self.tasks.len())
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn join_error(err: JoinError) -> Error {
    if err.is_cancelled() {
        return Error::cancelled();
    }
    match err.try_into_panic() {
        Ok(payload) => Error::panicked(&*payload),
        Err(err) => Error::internal(err.to_string()),
    }
}

/// Cancels a set of tasks without owning them.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    tasks: Vec<AbortHandle>,
}

impl CancelHandle {
    /// Requests cancellation of every task.
    pub fn cancel(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Returns true once every task has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(AbortHandle::is_finished)
    }
}

/// Aborts a partially launched group unless disarmed.
struct LaunchGuard {
    tasks: Vec<JoinHandle<Result<()>>>,
    armed: bool,
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(tasks = self.tasks.len(), "launch abandoned, aborting group");
            for task in &self.tasks {
                task.abort();
            }
        }
    }
}

/// Runs a hook once every task of a group has terminated.
struct GroupExit {
    hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Drop for GroupExit {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.get_mut().take() {
            debug!("task group exited");
            hook();
        }
    }
}

/// Spawns one task per body and waits until each confirmed its start.
///
/// Every body receives a [`Started`]; the launcher resolves once all of
/// them have been confirmed or dropped. Must be called from within a
/// Tokio runtime.
///
/// # Example
///
/// ```ignore
/// let handle = launch_and_wait_started((0..4).map(|_| {
///     let cond = cond.clone();
///     move |started: Started| async move {
///         let race = cond.enter();
///         started.confirm();
///         drop(race.wait().await);
///         Ok(())
///     }
/// }))
/// .await;
/// cond.fast_notify().await; // all four are registered by now
/// ```
pub async fn launch_and_wait_started<I, F, Fut>(bodies: I) -> TaskHandle
where
    I: IntoIterator<Item = F>,
    F: FnOnce(Started) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    launch(bodies, None).await
}

/// Like [`launch_and_wait_started`], and calls `on_exit` once after every
/// task of the group terminated, whether it finished, failed, panicked or
/// was cancelled.
pub async fn launch_and_wait_started_with_exit<I, F, Fut, H>(bodies: I, on_exit: H) -> TaskHandle
where
    I: IntoIterator<Item = F>,
    F: FnOnce(Started) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
    H: FnOnce() + Send + 'static,
{
    let exit = Arc::new(GroupExit {
        hook: Mutex::new(Some(Box::new(on_exit))),
    });
    launch(bodies, Some(exit)).await
}

async fn launch<I, F, Fut>(bodies: I, exit: Option<Arc<GroupExit>>) -> TaskHandle
where
    I: IntoIterator<Item = F>,
    F: FnOnce(Started) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut guard = LaunchGuard {
        tasks: Vec::new(),
        armed: true,
    };
    let mut confirmations = Vec::new();
    for body in bodies {
        let latch = Latch::new();
        let future = body(Started::new(Arc::clone(&latch)));
        let exit = exit.clone();
        guard.tasks.push(tokio::spawn(async move {
            let _exit = exit;
            future.await
        }));
        confirmations.push(latch);
    }
    // Only the tasks keep the group exit alive from here on.
    drop(exit);
    for latch in &confirmations {
        latch.fired().await;
    }
    debug!(tasks = guard.tasks.len(), "launch confirmed");
    guard.armed = false;
    TaskHandle::from_handles(std::mem::take(&mut guard.tasks))
}

/// Spawns `future` and returns once it has been polled for the first time.
pub async fn spawn_started<F>(future: F) -> TaskHandle
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    launch_and_wait_started(std::iter::once(move |started: Started| async move {
        started.confirm();
        future.await
    }))
    .await
}
