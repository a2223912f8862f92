use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stan_gax::{CancellationToken, Clock, SharedClock};

/// A background-refreshed wall-clock reading, the relational back-end's
/// "monotonic now counter" (§4.A "Relational back-end specifics"). The
/// expiration sweep reads this instead of calling the underlying clock
/// directly on every row comparison, so a burst of expiring channels
/// shares one read per tick rather than one per channel.
pub struct TickingClock {
    now_ns: Arc<AtomicI64>,
}

impl TickingClock {
    /// Spawns a task that refreshes from `base` every `period` and returns
    /// a handle; the task stops when `cancel` fires. `base` is read once
    /// up front to seed the counter and then again on every tick, so
    /// `SqlStore::connect`'s caller-supplied clock (real or, in tests,
    /// manual) is the actual source of truth this ticker polls rather than
    /// a clock of its own.
    pub fn spawn(base: SharedClock, period: Duration, cancel: CancellationToken) -> (Self, tokio::task::JoinHandle<()>) {
        let now_ns = Arc::new(AtomicI64::new(base.now_ns()));
        let shared = now_ns.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        shared.store(base.now_ns(), Ordering::Relaxed);
                    }
                }
            }
        });
        (Self { now_ns }, handle)
    }
}

impl std::fmt::Debug for TickingClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickingClock").field("now_ns", &self.now_ns.load(Ordering::Relaxed)).finish()
    }
}

impl Clock for TickingClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refreshes_on_the_configured_period() {
        let cancel = CancellationToken::new();
        let base: SharedClock = Arc::new(stan_gax::SystemClock);
        let (clock, handle) = TickingClock::spawn(base, Duration::from_millis(5), cancel.clone());
        let first = clock.now_ns();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(clock.now_ns() >= first);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn tracks_a_manual_base_clock() {
        let cancel = CancellationToken::new();
        let manual = Arc::new(stan_gax::ManualClock::new(1_000));
        let base: SharedClock = manual.clone();
        let (clock, handle) = TickingClock::spawn(base, Duration::from_millis(5), cancel.clone());
        manual.advance(5_000);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(clock.now_ns(), 6_000);
        cancel.cancel();
        handle.await.unwrap();
    }
}
