//! Supervised infinite loops.
//!
//! [`Supervised`] turns a body into a launcher. Every [`start`] spawns a
//! task that runs the body again and again until it is cancelled. A body
//! fault (an error other than cancellation, or a panic) never kills the
//! loop: it is counted, reported once at `warn` level, and the loop goes on
//! after the next cooperative yield.
//!
//! # Suspension points
//!
//! Besides the body's own awaits, the loop suspends:
//!
//! - after a successful iteration, only when the task exhausted its
//!   Tokio scheduling budget (`consume_budget`), so a body that never
//!   suspends cannot starve the runtime;
//! - after a fault, for one [`yield_now`](crate::runtime::yield_now) or
//!   for the configured fault backoff.
//!
//! ```ignore
//! let ticker = Supervised::new(move || {
//!     let cond = cond.clone();
//!     async move {
//!         drop(cond.enter().wait().await);
//!         Ok(())
//!     }
//! })
//! .named("ticker");
//!
//! let handle = ticker.start().await; // the first iteration is registered
//! ```
//!
//! # Cancellation
//!
//! Cancelling the task (or a body returning
//! [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled)) ends the loop.
//! The `on_exit` hook runs in both cases.
//!
//! [`start`]: Supervised::start

mod config;

pub use config::LoopConfig;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_lite::FutureExt;

use crate::error::{Error, Result};
use crate::runtime::{Started, TaskHandle, launch_and_wait_started, yield_now};
use crate::tracing_compat::{debug, warn};

type BoxBody = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;
type BodyFn = dyn Fn() -> BoxBody + Send + Sync;
type FaultHook = dyn Fn(&Error) + Send + Sync;
type ExitHook = dyn Fn() + Send + Sync;

/// Launcher for a body that runs forever and survives its own faults.
#[derive(Clone)]
pub struct Supervised {
    body: Arc<BodyFn>,
    config: LoopConfig,
    on_fault: Option<Arc<FaultHook>>,
    on_exit: Option<Arc<ExitHook>>,
    counters: Arc<LoopCounters>,
}

impl Supervised {
    /// Wraps `body`. Nothing runs until [`start`](Self::start).
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            body: Arc::new(move || Box::pin(body()) as BoxBody),
            config: LoopConfig::default(),
            on_fault: None,
            on_exit: None,
            counters: Arc::default(),
        }
    }

    /// Sets the name used in log events.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Replaces the whole loop configuration.
    #[must_use]
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Calls `hook` once per fault, after it was logged.
    #[must_use]
    pub fn on_fault<H>(mut self, hook: H) -> Self
    where
        H: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_fault = Some(Arc::new(hook));
        self
    }

    /// Calls `hook` once whenever a started instance terminates, whatever
    /// the reason.
    #[must_use]
    pub fn on_exit<H>(mut self, hook: H) -> Self
    where
        H: Fn() + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// The loop configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Starts one more instance of the loop.
    ///
    /// Returns once the first iteration has been polled, so anything the
    /// body registers before its first suspension is in place.
    pub async fn start(&self) -> TaskHandle {
        let instance = self.clone();
        launch_and_wait_started(std::iter::once(move |started: Started| instance.run(started)))
            .await
    }

    /// Counters summed over every instance started from this launcher.
    #[must_use]
    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot()
    }

    async fn run(self, started: Started) -> Result<()> {
        let name = self.config.display_name().to_owned();
        let _exit = ExitGuard {
            hook: self.on_exit.clone(),
        };
        debug!(loop_name = %name, "supervised loop started");

        let mut started = Some(started);
        loop {
            self.counters.iterations.fetch_add(1, Ordering::Relaxed);
            let body = Arc::clone(&self.body);
            let iteration = AssertUnwindSafe(async move { body().await }).catch_unwind();
            let outcome = match started.take() {
                // First poll of the first iteration happens before the
                // launcher is released.
                Some(started) => {
                    futures_lite::future::zip(iteration, async move { started.confirm() })
                        .await
                        .0
                }
                None => iteration.await,
            };

            let err = match outcome {
                Ok(Ok(())) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    // Suspends only once the task's scheduling budget is
                    // spent, so the next iteration usually registers in
                    // the same poll.
                    tokio::task::consume_budget().await;
                    continue;
                }
                Ok(Err(err)) if err.is_cancelled() => {
                    debug!(loop_name = %name, "supervised loop cancelled");
                    return Err(err);
                }
                Ok(Err(err)) => err,
                Err(payload) => Error::panicked(&*payload),
            };
            self.fault(&name, &err).await;
        }
    }

    async fn fault(&self, name: &str, err: &Error) {
        let faults = self.counters.faults.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(loop_name = %name, error = %err, faults, "fault in supervised loop");
        if let Some(hook) = &self.on_fault {
            hook(err);
        }
        match self.config.fault_backoff() {
            Some(backoff) => tokio::time::sleep(backoff).await,
            None => yield_now().await,
        }
    }
}

impl fmt::Debug for Supervised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervised")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct ExitGuard {
    hook: Option<Arc<ExitHook>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

#[derive(Debug, Default)]
struct LoopCounters {
    iterations: AtomicU64,
    completed: AtomicU64,
    faults: AtomicU64,
}

impl LoopCounters {
    fn snapshot(&self) -> LoopStats {
        LoopStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a supervised loop's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Iterations begun.
    pub iterations: u64,
    /// Iterations whose body returned `Ok`.
    pub completed: u64,
    /// Iterations that returned an error or panicked.
    pub faults: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sync::Condition;
    use crate::test_utils::{init_test_logging, run_test};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn start_returns_with_first_iteration_registered() {
        init_test("start_returns_with_first_iteration_registered");
        run_test(|| async {
            let cond = Condition::new();
            let hits = Arc::new(AtomicUsize::new(0));
            let looped = {
                let cond = cond.clone();
                let hits = Arc::clone(&hits);
                Supervised::new(move || {
                    let race = cond.enter();
                    let hits = Arc::clone(&hits);
                    async move {
                        let _woken = race.wait().await;
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .named("registered")
            };

            let handle = looped.start().await;
            crate::assert_with_log!(cond.waiter_count() == 1, "registered", 1usize, cond.waiter_count());

            cond.fast_notify().await;
            cond.fast_notify().await;
            let count = hits.load(Ordering::SeqCst);
            crate::assert_with_log!(count == 2, "one hit per notify", 2usize, count);

            handle.cancel();
            assert!(handle.join().await.expect_err("cancelled").is_cancelled());
            assert_eq!(cond.waiter_count(), 0);
        });
        crate::test_complete!("start_returns_with_first_iteration_registered");
    }

    #[test]
    fn faults_are_contained_and_counted() {
        init_test("faults_are_contained_and_counted");
        run_test(|| async {
            let calls = Arc::new(AtomicUsize::new(0));
            let seen = Arc::new(AtomicUsize::new(0));
            let looped = {
                let calls = Arc::clone(&calls);
                Supervised::new(move || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        match call % 3 {
                            0 => Err(Error::fault("flaky")),
                            1 => panic!("body panicked"),
                            _ => Ok(()),
                        }
                    }
                })
                .named("flaky")
                .on_fault({
                    let seen = Arc::clone(&seen);
                    move |err| {
                        assert!(err.is_recoverable());
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })
            };

            let handle = looped.start().await;
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(!handle.is_finished(), "faults never end the loop");

            let stats = looped.stats();
            assert!(stats.faults >= 4, "stats: {stats:?}");
            assert!(stats.completed >= 2, "stats: {stats:?}");
            assert_eq!(stats.faults, seen.load(Ordering::SeqCst) as u64);
            assert!(stats.iterations >= stats.faults + stats.completed);
            handle.cancel();
        });
        crate::test_complete!("faults_are_contained_and_counted");
    }

    #[test]
    fn cancelled_body_ends_loop() {
        init_test("cancelled_body_ends_loop");
        run_test(|| async {
            let exits = Arc::new(AtomicUsize::new(0));
            let looped = Supervised::new(|| async { Err(Error::cancelled()) }).on_exit({
                let exits = Arc::clone(&exits);
                move || {
                    exits.fetch_add(1, Ordering::SeqCst);
                }
            });

            let err = looped.start().await.join().await.expect_err("loop ended");
            assert_eq!(err.kind(), ErrorKind::Cancelled);
            assert_eq!(looped.stats().faults, 0);
            assert_eq!(exits.load(Ordering::SeqCst), 1);
        });
        crate::test_complete!("cancelled_body_ends_loop");
    }

    #[test]
    fn exit_hook_runs_on_task_cancellation() {
        init_test("exit_hook_runs_on_task_cancellation");
        run_test(|| async {
            let exits = Arc::new(AtomicUsize::new(0));
            let looped = Supervised::new(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .on_exit({
                let exits = Arc::clone(&exits);
                move || {
                    exits.fetch_add(1, Ordering::SeqCst);
                }
            });

            let first = looped.start().await;
            let second = looped.start().await;
            first.cancel();
            second.cancel();
            let _ = first.join().await;
            let _ = second.join().await;
            let count = exits.load(Ordering::SeqCst);
            crate::assert_with_log!(count == 2, "one exit per instance", 2usize, count);
        });
        crate::test_complete!("exit_hook_runs_on_task_cancellation");
    }

    #[test]
    fn always_ready_body_does_not_starve_runtime() {
        init_test("always_ready_body_does_not_starve_runtime");
        run_test(|| async {
            let looped = Supervised::new(|| async { Ok(()) }).named("busy");
            let handle = looped.start().await;
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            let stats = looped.stats();
            crate::assert_with_log!(stats.completed > 1, "loop kept running", "> 1", stats.completed);

            handle.cancel();
            assert!(handle.join().await.expect_err("cancelled").is_cancelled());
        });
        crate::test_complete!("always_ready_body_does_not_starve_runtime");
    }

    #[test]
    fn fault_backoff_delays_next_iteration() {
        init_test("fault_backoff_delays_next_iteration");
        run_test(|| async {
            let looped = Supervised::new(|| async { Err(Error::fault("always")) }).with_config(
                LoopConfig::named("backoff").with_fault_backoff(Duration::from_millis(100)),
            );
            let handle = looped.start().await;
            tokio::time::sleep(Duration::from_millis(350)).await;
            let faults = looped.stats().faults;
            crate::assert_with_log!(faults == 4, "one fault per backoff period", 4u64, faults);
            handle.cancel();
        });
        crate::test_complete!("fault_backoff_delays_next_iteration");
    }
}
