//! Domain-specific error type for the streaming core.
//!
//! All fallible operations return `Result<T, CastError>`.
//! No panics on expected failures: every error is typed, logged at its
//! task boundary and turned into a clean shutdown of that task.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type of the streaming core.
#[derive(Debug, Error)]
pub enum CastError {
    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error (refused, reset, peer close,
    /// short transfer).
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation did not complete within its time budget.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Server Errors ────────────────────────────────────────────
    /// None of the requested endpoints could be bound.
    #[error("no endpoint could be bound")]
    NoBind,
}
