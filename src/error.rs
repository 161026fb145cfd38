//! Error types for quiesce.
//!
//! Errors follow the three-way taxonomy the primitives rely on:
//!
//! - **Cancellation** is a first-class signal. It is always propagated
//!   after local cleanup and never downgraded to a warning.
//! - **Faults** are recoverable errors raised by a supervised loop body.
//!   They are the only errors a primitive intentionally swallows (after
//!   logging them once).
//! - **Misuse** (an abandoned race, a rule with nothing to wait on) is
//!   reported loudly at the point where it happens.

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// The operation or task was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// A loop body reported a recoverable failure.
    #[error("fault in loop body")]
    Fault,
    /// A task panicked.
    #[error("task panicked")]
    Panicked,
    /// A race registration was dropped without ever being awaited.
    #[error("race dropped without being awaited")]
    AbandonedRace,
    /// A rule was declared without any condition to wait on.
    #[error("invalid rule")]
    InvalidRule,
    /// Configuration could not be parsed.
    #[error("invalid configuration")]
    Config,
    /// Internal invariant violated.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Returns true if a supervised loop may continue after this kind.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Fault | Self::Panicked)
    }
}

/// The main error type for quiesce operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a recoverable fault with a description.
    #[must_use]
    pub fn fault(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fault).with_message(detail)
    }

    /// Creates an error describing a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Creates the error reported when a race is dropped un-awaited.
    #[must_use]
    pub fn abandoned_race(conditions: usize) -> Self {
        Self::new(ErrorKind::AbandonedRace).with_message(format!(
            "registered on {conditions} condition(s); await it or withdraw it"
        ))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if a supervised loop may continue after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Extension trait for turning foreign errors into loop faults.
pub trait ResultExt<T> {
    /// Wraps the error as a [`ErrorKind::Fault`] carrying `msg`.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for core::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::fault(msg).with_source(e))
    }
}

/// A specialized Result type for quiesce operations.
pub type Result<T> = core::result::Result<T, Error>;
