//! Async utilities for bounded futures.
//!
//! Provides the `BoundedExt` trait, which races a future against an
//! optional deadline and a tokio `CancellationToken`. The request
//! serializer uses it so that a single dispatch can neither outlive its
//! timeout nor survive an engine reset.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a bounded future did not produce its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The token was cancelled first.
    Cancelled,
    /// The deadline elapsed first. Carries the configured limit.
    TimedOut(Duration),
}

/// Extension trait for racing a future against a deadline and a token.
#[async_trait]
pub trait BoundedExt: Sized {
    type Output;

    /// Race this future against `token` and, when given, `limit`.
    ///
    /// Cancellation wins ties: an already-cancelled token returns
    /// `Err(Interrupted::Cancelled)` without polling the future.
    async fn bounded(
        self,
        limit: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Self::Output, Interrupted>;
}

#[async_trait]
impl<F> BoundedExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn bounded(
        self,
        limit: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Self::Output, Interrupted> {
        if token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match limit {
            Some(limit) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Interrupted::Cancelled),
                res = tokio::time::timeout(limit, self) => {
                    res.map_err(|_| Interrupted::TimedOut(limit))
                }
            },
            None => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Interrupted::Cancelled),
                res = self => Ok(res),
            },
        }
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns `false` when the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
