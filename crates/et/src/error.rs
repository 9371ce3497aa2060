// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by the local and remote paths.
//!
//! Every variant carries a stable negative status code so the same error can
//! cross the wire as a single `i32` and be rebuilt on the other side.

use crate::config::ConfigError;
use std::io;
use thiserror::Error;

/// Status code for success on the wire.
pub const OK: i32 = 0;

/// Errors returned by ET operations.
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // General
    // ========================================================================
    /// Unclassified failure (bad topology request, unknown station, ...).
    #[error("{0}")]
    Generic(String),

    /// A station, attachment or temp-event limit was reached.
    #[error("too many: {0}")]
    TooMany(String),

    /// Station name already taken by a station with a different configuration.
    #[error("station {0:?} already exists with a different configuration")]
    AlreadyExists(String),

    // ========================================================================
    // Retryable wait outcomes
    // ========================================================================
    /// A blocked get was interrupted by an explicit wakeup.
    #[error("attachment woken up")]
    Wakeup,

    /// A timed get reached its deadline.
    #[error("timed out")]
    Timeout,

    /// An asynchronous get found nothing to return.
    #[error("no events available")]
    Empty,

    /// Resource temporarily busy.
    #[error("resource busy")]
    Busy,

    // ========================================================================
    // Terminal handle states
    // ========================================================================
    /// The system stopped answering (heartbeat stale or peer gone).
    #[error("ET system is dead")]
    Dead,

    /// The handle was already closed.
    #[error("ET handle is closed")]
    Closed,

    // ========================================================================
    // Transport
    // ========================================================================
    /// Reading from the transport failed.
    #[error("transport read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing to the transport failed.
    #[error("transport write failed: {0}")]
    Write(#[source] io::Error),

    /// The remote peer reported an error without a more specific kind.
    #[error("remote error (status {0})")]
    Remote(i32),

    /// Event too large for the peer's addressable size.
    #[error("event too big: {0} bytes")]
    TooBig(u64),

    // ========================================================================
    // Arguments and resources
    // ========================================================================
    /// Allocation failure.
    #[error("out of memory")]
    NoMemory,

    /// An argument failed validation; nothing was changed.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub const CODE_ERROR: i32 = -1;
    pub const CODE_TOOMANY: i32 = -2;
    pub const CODE_EXISTS: i32 = -3;
    pub const CODE_WAKEUP: i32 = -4;
    pub const CODE_TIMEOUT: i32 = -5;
    pub const CODE_EMPTY: i32 = -6;
    pub const CODE_BUSY: i32 = -7;
    pub const CODE_DEAD: i32 = -8;
    pub const CODE_READ: i32 = -9;
    pub const CODE_WRITE: i32 = -10;
    pub const CODE_REMOTE: i32 = -11;
    pub const CODE_TOOBIG: i32 = -13;
    pub const CODE_NOMEM: i32 = -14;
    pub const CODE_BADARG: i32 = -15;
    pub const CODE_CLOSED: i32 = -18;

    /// Wire status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Generic(_) => Self::CODE_ERROR,
            Error::TooMany(_) => Self::CODE_TOOMANY,
            Error::AlreadyExists(_) => Self::CODE_EXISTS,
            Error::Wakeup => Self::CODE_WAKEUP,
            Error::Timeout => Self::CODE_TIMEOUT,
            Error::Empty => Self::CODE_EMPTY,
            Error::Busy => Self::CODE_BUSY,
            Error::Dead => Self::CODE_DEAD,
            Error::Read(_) => Self::CODE_READ,
            Error::Write(_) => Self::CODE_WRITE,
            Error::Remote(_) => Self::CODE_REMOTE,
            Error::TooBig(_) => Self::CODE_TOOBIG,
            Error::NoMemory => Self::CODE_NOMEM,
            Error::BadArgument(_) | Error::Config(_) => Self::CODE_BADARG,
            Error::Closed => Self::CODE_CLOSED,
        }
    }

    /// Rebuild an error from a status code sent by a peer.
    ///
    /// Unknown codes map to [`Error::Remote`].
    pub fn from_code(code: i32) -> Self {
        match code {
            Self::CODE_ERROR => Error::Generic("remote operation failed".into()),
            Self::CODE_TOOMANY => Error::TooMany("limit reached on remote system".into()),
            Self::CODE_EXISTS => Error::AlreadyExists("(remote)".into()),
            Self::CODE_WAKEUP => Error::Wakeup,
            Self::CODE_TIMEOUT => Error::Timeout,
            Self::CODE_EMPTY => Error::Empty,
            Self::CODE_BUSY => Error::Busy,
            Self::CODE_DEAD => Error::Dead,
            Self::CODE_READ => Error::Read(io::Error::other("remote read failure")),
            Self::CODE_WRITE => Error::Write(io::Error::other("remote write failure")),
            Self::CODE_TOOBIG => Error::TooBig(0),
            Self::CODE_NOMEM => Error::NoMemory,
            Self::CODE_BADARG => Error::BadArgument("rejected by remote system".into()),
            Self::CODE_CLOSED => Error::Closed,
            other => Error::Remote(other),
        }
    }

    /// Interpret a status word: non-negative values pass through.
    pub fn check(code: i32) -> Result<i32> {
        if code >= OK {
            Ok(code)
        } else {
            Err(Self::from_code(code))
        }
    }

    /// Expected outcomes a client loop should branch on and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::Empty | Error::Busy | Error::Wakeup
        )
    }

    /// After these, the handle is unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Dead | Error::Closed)
    }
}

/// Result alias for ET operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A refused put, with the events handed back to their holder.
#[derive(Debug)]
pub struct Refused<E> {
    pub error: Error,
    pub events: Vec<E>,
}

impl<E> From<Refused<E>> for Error {
    fn from(refused: Refused<E>) -> Self {
        refused.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_for_unit_kinds() {
        for err in [
            Error::Wakeup,
            Error::Timeout,
            Error::Empty,
            Error::Busy,
            Error::Dead,
            Error::Closed,
            Error::NoMemory,
        ] {
            let code = err.code();
            assert_eq!(Error::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_check_passes_counts() {
        assert_eq!(Error::check(7).unwrap(), 7);
        assert!(matches!(Error::check(-5), Err(Error::Timeout)));
        assert!(matches!(Error::check(-99), Err(Error::Remote(-99))));
    }

    #[test]
    fn test_retryable_and_terminal_are_disjoint() {
        assert!(Error::Wakeup.is_retryable());
        assert!(!Error::Wakeup.is_terminal());
        assert!(Error::Closed.is_terminal());
        assert!(!Error::Closed.is_retryable());
        assert!(!Error::Generic("x".into()).is_retryable());
    }
}
