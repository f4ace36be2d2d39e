use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of timestamps for visibility deadlines.
///
/// Implementations must be monotonically non-decreasing. Queues compare
/// `now()` against a message's `visible_at` to decide redelivery, so a clock
/// that jumps backwards only delays redelivery, it never duplicates it.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current timestamp in milliseconds since the UNIX epoch.
    fn now(&self) -> u64;
}

fn wall_millis() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch");
    u64::try_from(timestamp.as_millis()).expect("system time exceeds timestamp range")
}

/// A clock that uses `std::time::SystemTime`.
///
/// This is the default implementation. It follows NTP adjustments, which is
/// what you want when several processes share one file-backed queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        wall_millis()
    }
}

/// A clock that uses the CPU's Time-Stamp Counter (TSC) via the `quanta` crate.
///
/// Anchored to wall time at construction and advanced by TSC ticks afterwards,
/// so it never steps backwards. Separate processes anchor independently; prefer
/// `SystemClock` for queues shared across processes.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_ms: u64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        Self {
            clock,
            start_wall_ms: wall_millis(),
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> u64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_ms
            .saturating_add(u64::try_from(delta.as_millis()).unwrap_or(u64::MAX))
    }
}

/// A hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(crate::message::timeout_ms(by), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

// Lets a test keep an `Arc<ManualClock>` handle while the service owns another.
impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::new(1_000);
        clock.set(500);
        assert_eq!(clock.now(), 1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), 1_250);
        clock.set(2_000);
        assert_eq!(clock.now(), 2_000);
    }

    #[test]
    fn shared_manual_clock_is_a_clock() {
        let clock = Arc::new(ManualClock::new(7));
        let shared: Arc<ManualClock> = Arc::clone(&clock);
        clock.advance(Duration::from_millis(3));
        assert_eq!(Clock::now(&shared), 10);
    }

    #[test]
    fn quanta_clock_tracks_wall_time() {
        let quanta = QuantaClock::new();
        let wall = SystemClock.now();
        let diff = quanta.now().abs_diff(wall);
        assert!(diff < 1_000, "quanta drifted {diff}ms from wall clock");
    }
}
