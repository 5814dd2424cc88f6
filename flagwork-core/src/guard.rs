//! Timeout and cancellation guard.
//!
//! Races an operation against an optional deadline and an optional external
//! [`CancellationToken`]. Whichever finishes first wins; the losing side is
//! dropped. Cancellation is cooperative: an operation that ignores the token
//! keeps running only until its future is dropped, and its result is never
//! observed.
//!
//! ## Example
//!
//! ```
//! use flagwork_core::guard::EvaluationGuard;
//! use flagwork_core::GuardError;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let guard = EvaluationGuard::new(Some(Duration::from_millis(50)), None);
//! let result = guard
//!     .run(|| tokio::time::sleep(Duration::from_secs(5)))
//!     .await;
//! assert_eq!(result, Err(GuardError::TimedOut(Duration::from_millis(50))));
//! # }
//! ```

use crate::error::GuardError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Deadline and cancellation settings for one guarded operation
#[derive(Debug, Clone, Default)]
pub struct EvaluationGuard {
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl EvaluationGuard {
    pub fn new(timeout: Option<Duration>, cancellation: Option<CancellationToken>) -> Self {
        Self {
            timeout,
            cancellation,
        }
    }

    /// Guard with neither deadline nor cancellation
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Run an asynchronously completing operation under the guard.
    ///
    /// If the token is already cancelled the operation is never invoked.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(GuardError::Cancelled);
        }

        let deadline = async {
            match self.timeout {
                Some(duration) => tokio::time::timeout(duration, operation())
                    .await
                    .map_err(|_| {
                        warn!(duration = ?duration, "Operation timed out");
                        GuardError::TimedOut(duration)
                    }),
                None => Ok(operation().await),
            }
        };

        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(GuardError::Cancelled),
                    result = deadline => result,
                }
            }
            None => deadline.await,
        }
    }

    /// Check the guard for an operation that completes synchronously.
    ///
    /// A deadline cannot be enforced on such a path and only produces a
    /// warning; an already-triggered cancellation still short-circuits.
    pub fn check_sync(&self, operation: &str) -> Result<(), GuardError> {
        if let Some(duration) = self.timeout {
            warn!(
                operation = %operation,
                duration = ?duration,
                "Timeout is not enforced for synchronously resolving providers"
            );
        }
        if self.is_cancelled() {
            return Err(GuardError::Cancelled);
        }
        Ok(())
    }
}
