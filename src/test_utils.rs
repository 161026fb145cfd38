//! Test utilities for quiesce.
//!
//! This module provides shared helpers for unit and scenario tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A current-thread runtime with a paused clock, so `sleep` is virtual
//!   and every scenario runs deterministically
//! - Timeout assertions for "this must not hang" checks
//!
//! # Example
//! ```
//! use quiesce::test_utils::{init_test_logging, run_test};
//!
//! init_test_logging();
//! run_test(|| async {
//!     let cond = quiesce::sync::Condition::new();
//!     cond.fast_notify().await;
//! });
//! ```

use std::future::Future;
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Builds the runtime used by [`run_test`].
///
/// Current-thread scheduler, timers enabled, clock paused: sleeping tasks
/// advance virtual time only once every other task is parked.
#[must_use]
pub fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to build test runtime")
}

/// Run async test code on a fresh [`test_runtime`].
pub fn run_test<F, Fut>(f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    init_test_logging();
    test_runtime().block_on(f());
}

/// Assert that an async operation completes within a timeout.
pub async fn assert_completes_within<Fut, T>(
    timeout_duration: Duration,
    description: &str,
    fut: Fut,
) -> T
where
    Fut: Future<Output = T>,
{
    let Ok(value) = tokio::time::timeout(timeout_duration, fut).await else {
        unreachable!("operation '{description}' did not complete within {timeout_duration:?}");
    };
    tracing::debug!(
        description = %description,
        timeout_ms = timeout_duration.as_millis(),
        "operation completed within timeout"
    );
    value
}

/// Assert that an async operation is still pending after `duration`.
pub async fn assert_pending_for<Fut>(duration: Duration, description: &str, fut: Fut)
where
    Fut: Future,
{
    if tokio::time::timeout(duration, fut).await.is_ok() {
        unreachable!("operation '{description}' completed before {duration:?} elapsed");
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
