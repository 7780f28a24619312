//! Errors for parsing backoff configuration.
//!
//! The locks themselves never fail: a try-lock that loses returns `false` or
//! `None`, which is an ordinary outcome rather than an error.

use thiserror::Error;

/// Returned when a string does not name a [`Strategy`](crate::Strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseStrategyError {
    #[error("empty backoff strategy")]
    Empty,

    #[error("unknown backoff strategy, expected `spin` or `yield`")]
    Unknown,
}
