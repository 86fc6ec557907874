// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Constant backoff that gives up after `max_retry_count` attempts.
#[derive(Debug, Clone)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    /// Creates a new Constant backoff with `interval` and `max_retry_count`.
    /// `interval` is the duration to wait between retries, and `max_retry_count` is the maximum
    /// number of retries, after which we return `None` to indicate that we should stop retrying.
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            self.interval
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// The single retry policy shared by every component that talks to a chain.
///
/// Waits a fixed `interval` between attempts and stops either after
/// `max_retries` attempts or as soon as the cancellation token fires,
/// whichever comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_retries: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), None)
    }
}

impl RetryPolicy {
    /// Creates a new policy. `None` retries forever.
    pub const fn new(interval: Duration, max_retries: Option<usize>) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// The fixed delay between two attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A fresh backoff following this policy.
    pub fn backoff(&self) -> ConstantWithMaxRetryCount {
        ConstantWithMaxRetryCount::new(
            self.interval,
            self.max_retries.unwrap_or(usize::MAX),
        )
    }

    /// Sleeps for one interval.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first.
    pub async fn sleep(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires.
    ///
    /// Only errors for which [`Error::is_transient`] holds are retried.
    pub async fn retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        name: &'static str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let task = || {
            let fut = operation();
            async move {
                fut.await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        };
        let notify = |err: Error, wait: Duration| {
            tracing::event!(
                target: crate::probe::TARGET,
                tracing::Level::WARN,
                kind = %crate::probe::Kind::Retry,
                operation = name,
                error = %err,
                wait = ?wait,
            );
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = backoff::future::retry_notify(self.backoff(), task, notify) => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn constant_backoff_stops_after_max_retries() {
        let mut backoff =
            ConstantWithMaxRetryCount::new(Duration::from_millis(5), 2);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), None);
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let value = policy
            .retry(&cancel, "flaky", || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(Error::Transient("not yet".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(Duration::from_millis(1), None);
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let res: Result<()> = policy
            .retry(&cancel, "decode", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Generic("bad bytes"))
                }
            })
            .await;
        assert!(matches!(res, Err(Error::Generic(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Some(2));
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let res: Result<()> = policy
            .retry(&cancel, "rpc", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Transient("down".into()))
                }
            })
            .await;
        assert!(matches!(res, Err(Error::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_retry_and_sleep() {
        let policy = RetryPolicy::new(Duration::from_secs(3600), None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<()> = policy
            .retry(&cancel, "rpc", || async {
                Err::<(), _>(Error::Transient("down".into()))
            })
            .await;
        assert!(matches!(res, Err(Error::Cancelled)));
        assert!(matches!(policy.sleep(&cancel).await, Err(Error::Cancelled)));
    }
}
