//! Tracing compatibility layer for structured logging.
//!
//! - **With `tracing-integration`**: re-exports from the `tracing` crate.
//! - **Without it**: no-op macros that compile to nothing.
//!
//! Every primitive in this crate logs through this module so that
//! consumers who do not want `tracing` pay nothing for it.
//!
//! ```rust,ignore
//! use quiesce::tracing_compat::{debug, warn};
//!
//! debug!(condition = id, "broadcast");
//! warn!(loop_name = %name, error = %err, "fault in supervised loop");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{Level, debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// No-op level type for when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level;

#[cfg(not(feature = "tracing-integration"))]
impl Level {
    /// Trace level (most verbose).
    pub const TRACE: Self = Self;
    /// Debug level.
    pub const DEBUG: Self = Self;
    /// Info level.
    pub const INFO: Self = Self;
    /// Warn level.
    pub const WARN: Self = Self;
    /// Error level (least verbose).
    pub const ERROR: Self = Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn macros_accept_structured_fields() {
        init_test_logging();
        crate::test_phase!("macros_accept_structured_fields");
        trace!("trace message");
        debug!(count = 42, "debug with field");
        info!(name = "test", "info with field");
        warn!(loop_name = %"demo", "warn with display field");
        error!(kind = ?crate::ErrorKind::Internal, "error with debug field");
        let _ = Level::WARN;
        crate::test_complete!("macros_accept_structured_fields");
    }
}
