//! Crate-wide error taxonomy.
//!
//! The upstream Tailwind tooling this pool wraps is itself driven through exceptions; per the
//! system's design notes, every public boundary here instead returns a typed `Result<T, Error>`
//! so that retry logic and callers can match on kind rather than parsing strings.

use std::time::Duration;

use fingerprint::Fingerprint;

/// The taxonomy from the error-handling design: every variant names a *kind*, not a specific
/// upstream failure string.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed option map, missing required field, or an empty path/URL. Permanent; never
    /// retried.
    #[error("invalid compile options: {0}")]
    Validation(String),

    /// No idle Worker was available and the pool was already at `max_pool_size`.
    #[error("pool exhausted: fingerprint {fingerprint} ({pool_size}/{max_pool_size} workers busy)")]
    PoolExhausted {
        fingerprint: Fingerprint,
        pool_size: usize,
        max_pool_size: usize,
    },

    /// Spawning the Worker's subprocess failed. Retried by [`crate::retry`] up to
    /// `retry_max_attempts` before being surfaced.
    #[error("failed to create worker process: {0}")]
    WorkerCreationFailed(String),

    /// The Worker's subprocess exited (or was found dead) while a compile was in flight, or while
    /// being acquired.
    #[error("worker for fingerprint {0} is no longer running")]
    WorkerDown(Fingerprint),

    /// The configured Tailwind binary does not exist, is not executable, or failed a trust check.
    /// Reported by the external `BinaryProvider`; never retried.
    #[error("tailwind binary unusable: {0}")]
    BinaryUnavailable(String),

    /// Retry's attempt budget was exhausted without a permanent error being raised.
    #[error("exceeded {attempts} attempts (last error: {last_error})")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// An I/O failure writing request content or reading captured output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Clone for Error {
    /// `std::io::Error` isn't `Clone`, so an I/O failure is rebuilt from its kind and message — good
    /// enough for fanning the same partition failure out to every request batched behind it.
    fn clone(&self) -> Error {
        match self {
            Error::Validation(s) => Error::Validation(s.clone()),
            Error::PoolExhausted { fingerprint, pool_size, max_pool_size } => Error::PoolExhausted {
                fingerprint: *fingerprint,
                pool_size: *pool_size,
                max_pool_size: *max_pool_size,
            },
            Error::WorkerCreationFailed(s) => Error::WorkerCreationFailed(s.clone()),
            Error::WorkerDown(fp) => Error::WorkerDown(*fp),
            Error::BinaryUnavailable(s) => Error::BinaryUnavailable(s.clone()),
            Error::MaxRetriesExceeded { attempts, last_error } => Error::MaxRetriesExceeded {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl Error {
    /// Whether this error kind is worth retrying (transient) as opposed to permanent.
    ///
    /// Validation, pool exhaustion, worker-down, and binary-unavailable are all permanent for the
    /// current attempt: retrying them without the caller changing something is just burning the
    /// `retry_max_attempts` budget on a foregone conclusion.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::PoolExhausted { .. }
                | Error::WorkerDown(_)
                | Error::BinaryUnavailable(_)
        )
    }
}

/// The outcome of a readiness wait: either the Worker signalled ready, or the deadline elapsed
/// first. Not an [`Error`] variant because a readiness timeout is not terminal — the caller
/// proceeds in degraded mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReadinessOutcome {
    Ready,
    Timeout,
}

/// Why a [`crate::capture::CaptureOutcome`] was downgraded to degraded rather than a clean `ok`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DegradedReason {
    Timeout,
    MissingOutputPath,
}

impl DegradedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradedReason::Timeout => "timeout",
            DegradedReason::MissingOutputPath => "missing_output_path",
        }
    }
}

/// A deadline expressed the way most of this crate's blocking operations take it: "how long from
/// now", rather than an absolute instant, since `tokio::time::Instant` isn't meaningfully
/// comparable across async-test fast-forwarding boundaries.
pub type Timeout = Duration;
