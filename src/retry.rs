//! Bounded retry with a fixed inter-attempt sleep.
//!
//! Directory lookups are idempotent, so a failed lookup is simply repeated
//! a fixed number of times. Only transient failures are retried; anything
//! else (a misconfigured selector, an undecodable answer) fails the call at
//! once. The sleep between attempts listens for a
//! shutdown signal so that stopping discovery never waits out a retry loop.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;

use crate::error::{Error, Result};

/// Runs an operation up to `attempts` times with a fixed `delay` between attempts.
///
/// The first successful attempt short-circuits. The delay is also slept
/// after the final failed attempt, so every failed attempt costs the same.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    attempts: u32,
    delay: Duration,
    attempt_timeout: Option<Duration>,
    cancel: Option<async_channel::Receiver<()>>,
}

impl RetryExecutor {
    /// Create an executor. `attempts` is clamped to at least one.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            attempt_timeout: None,
            cancel: None,
        }
    }

    /// Bound every attempt by `timeout` (builder pattern).
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Abort the retry loop when `signal` is closed or receives a value (builder pattern).
    pub fn with_cancellation(mut self, signal: async_channel::Receiver<()>) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Configured number of attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured inter-attempt delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until it succeeds, failing with [`Error::RetriesExhausted`]
    /// when every attempt failed, or [`Error::Cancelled`] on shutdown.
    ///
    /// An error that is not [transient](Error::is_transient) is returned
    /// as is, without further attempts.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = None;

        for attempt in 1..=self.attempts {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.attempt(operation, op()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if !e.is_transient() => {
                    tracing::debug!(operation, attempt, error = %e, "permanent failure, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        operation,
                        attempt,
                        attempts = self.attempts,
                        error = %e,
                        "attempt failed"
                    );
                    last = Some(e);
                }
            }

            self.pause().await?;
        }

        Err(Error::RetriesExhausted {
            operation: operation.to_string(),
            attempts: self.attempts,
            delay: self.delay,
            last: Box::new(last.unwrap_or(Error::Cancelled)),
        })
    }

    /// Like [`execute`](Self::execute), but tolerates total failure.
    ///
    /// Returns `Ok(None)` when every attempt failed. Cancellation is still
    /// reported as an error so callers can stop.
    pub async fn execute_optional<T, F, Fut>(&self, operation: &str, op: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.execute(operation, op).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "giving up on {}", operation);
                Ok(None)
            }
        }
    }

    async fn attempt<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match self.attempt_timeout {
            Some(after) => match tokio::time::timeout(after, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: operation.to_string(),
                    after,
                }),
            },
            None => fut.await,
        }
    }

    async fn pause(&self) -> Result<()> {
        match &self.cancel {
            Some(signal) => {
                let sleep = tokio::time::sleep(self.delay).fuse();
                let cancelled = signal.recv().fuse();
                futures::pin_mut!(sleep, cancelled);
                futures::select! {
                    _ = sleep => Ok(()),
                    _ = cancelled => Err(Error::Cancelled),
                }
            }
            None => {
                tokio::time::sleep(self.delay).await;
                Ok(())
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|signal| signal.is_closed())
    }
}
