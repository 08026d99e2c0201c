//! Fixed-delay retry for transient store I/O.

use std::fmt::Display;
use std::io;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::vector::ArtifactError;

/// Classifies failures that may succeed when retried.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for io::Error {
    fn is_transient(&self) -> bool {
        !matches!(
            self.kind(),
            io::ErrorKind::NotFound
                | io::ErrorKind::PermissionDenied
                | io::ErrorKind::InvalidData
                | io::ErrorKind::InvalidInput
                | io::ErrorKind::AlreadyExists
                | io::ErrorKind::Unsupported
        )
    }
}

impl Transient for ArtifactError {
    fn is_transient(&self) -> bool {
        match self {
            ArtifactError::Io(err) => err.is_transient(),
            ArtifactError::InvalidFormat(_) | ArtifactError::Vector(_) => false,
        }
    }
}

/// The error of the last attempt plus how many attempts were made.
#[derive(Debug)]
pub struct Attempted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Retry bound and delay for one class of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget
    /// is spent. Sleeps `delay` between attempts.
    pub fn run<T, E>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, Attempted<E>>
    where
        E: Transient + Display,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempts <= self.max_retries => {
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        max_retries = self.max_retries,
                        error = %error,
                        "transient failure, retrying"
                    );
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
                Err(error) => return Err(Attempted { attempts, error }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn flaky(kind: io::ErrorKind, failures: u32) -> impl FnMut() -> io::Result<&'static str> {
        let calls = Cell::new(0);
        move || {
            calls.set(calls.get() + 1);
            if calls.get() <= failures {
                Err(io::Error::new(kind, "flaky"))
            } else {
                Ok("done")
            }
        }
    }

    #[test]
    fn test_recovers_within_budget() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = policy.run("persist", flaky(io::ErrorKind::Interrupted, 3));
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run("persist", flaky(io::ErrorKind::TimedOut, 10))
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.error.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let err = policy
            .run("load", flaky(io::ErrorKind::NotFound, 10))
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn test_delay_is_applied_between_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        let started = std::time::Instant::now();
        let _ = policy.run("load", flaky(io::ErrorKind::Other, 2));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_artifact_errors_classification() {
        assert!(ArtifactError::Io(io::Error::other("eio")).is_transient());
        assert!(!ArtifactError::InvalidFormat("bad magic".into()).is_transient());
    }
}
