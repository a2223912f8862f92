use std::iter::Take;
use std::time::Duration;

use tokio::select;

use crate::cancel::CancellationToken;
use crate::error::{Code, StanError};

/// An exponential back-off sequence, `base`, `base*factor`, `base*factor^2`, ...
/// capped at `max_delay` once set.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: u64,
    base: u64,
    factor: u64,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn from_millis(base: u64) -> ExponentialBackoff {
        ExponentialBackoff {
            current: base,
            base,
            factor: 1,
            max_delay: None,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let duration = match self.current.checked_mul(self.factor) {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis(u64::MAX),
        };

        let duration = match &self.max_delay {
            Some(max) if duration > *max => *max,
            _ => duration,
        };

        self.current = self.current.checked_mul(self.base).unwrap_or(u64::MAX);
        Some(duration)
    }
}

/// Controls how many times, and how long between, `stan-store-sql`'s
/// reconnect loop and `stan-broker`'s expiration sweep retry a
/// [`Code::StoreUnavailable`] failure before giving up on one attempt.
#[derive(Clone, Debug)]
pub struct RetrySetting {
    pub from_millis: u64,
    pub max_delay: Option<Duration>,
    pub factor: u64,
    pub take: usize,
    pub retryable: Vec<Code>,
}

impl Default for RetrySetting {
    fn default() -> Self {
        Self {
            from_millis: 10,
            max_delay: Some(Duration::from_secs(1)),
            factor: 2,
            take: 5,
            retryable: vec![Code::StoreUnavailable],
        }
    }
}

impl RetrySetting {
    fn strategy(&self) -> Take<ExponentialBackoff> {
        let mut backoff = ExponentialBackoff::from_millis(self.from_millis);
        backoff.factor = self.factor;
        backoff.max_delay = self.max_delay;
        backoff.take(self.take)
    }

    fn should_retry(&self, err: &StanError) -> bool {
        self.retryable.contains(&err.code())
    }
}

/// Retries `f` according to `retry` (or [`RetrySetting::default`]),
/// stopping early if `cancel` fires. Mirrors the teacher's
/// `gax::retry::invoke`, specialized to [`StanError`] instead of a gRPC
/// `Status`.
pub async fn invoke<R, A>(
    cancel: Option<CancellationToken>,
    retry: Option<RetrySetting>,
    mut f: impl FnMut() -> A,
) -> Result<R, StanError>
where
    A: std::future::Future<Output = Result<R, StanError>>,
{
    let fn_loop = async {
        let retry = retry.unwrap_or_default();
        let mut strategy = retry.strategy();
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !retry.should_retry(&e) {
                        return Err(e);
                    }
                    match strategy.next() {
                        None => return Err(e),
                        Some(d) => {
                            attempt += 1;
                            tracing::warn!(attempt, delay_ms = d.as_millis() as u64, error = %e, "retrying after transient store error");
                            tokio::time::sleep(d).await;
                        }
                    }
                }
            }
        }
    };

    match cancel {
        Some(cancel) => {
            select! {
                _ = cancel.cancelled() => Err(StanError::store_unavailable("cancelled while retrying")),
                v = fn_loop => v,
            }
        }
        None => fn_loop.await,
    }
}
