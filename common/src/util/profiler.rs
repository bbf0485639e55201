use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Logs the time spent in a scope when dropped.
pub struct ScopedTimer {
    name: String,
    start: Instant,
    level: log::Level,
}

impl ScopedTimer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::at(log::Level::Info, name)
    }

    /// A timer reporting at `level`; per-worker phases use `Debug`.
    pub fn at(level: log::Level, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
            level,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::log!(self.level, "{} took {:?}", self.name, self.start.elapsed());
    }
}

/// Time spent inside timed sections, summed over every thread that ran one.
/// Compared against wall time it shows how well a batch kept the pool busy.
#[derive(Debug, Default)]
pub struct BusyClock {
    nanos: AtomicU64,
}

impl BusyClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.add(start.elapsed());
        out
    }

    pub fn add(&self, d: Duration) {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    /// Busy time over `wall`, i.e. the average number of threads at work.
    pub fn utilization(&self, wall: Duration) -> f64 {
        if wall.is_zero() {
            return 0.0;
        }
        self.total().as_secs_f64() / wall.as_secs_f64()
    }
}
