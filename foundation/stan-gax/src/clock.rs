use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock source for everything that stamps `timestamp_ns` or schedules
/// a timer relative to "now": `MessageStore::Store`, the expiration
/// engine, and the ack-wait redelivery timer all go through this trait
/// instead of calling `SystemTime::now()` directly, so tests can pin time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ns(&self) -> i64;
}

/// The production clock: real wall-clock time, nanoseconds since the Unix
/// epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as i64
    }
}

/// A manually-advanced clock for deterministic redelivery/expiration tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ns: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: Arc::new(AtomicI64::new(start_ns)),
        }
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    pub fn set(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

pub type SharedClock = Arc<dyn Clock>;
