//! Rate-limited drop logging, shared by the RMT, DTP receive path and DTCP
//! control-PDU handling — every place spec.md calls for a "rate-limited
//! log" on a silently-dropped PDU (§4.4, §4.6, §7). Hosted here, the
//! lowest leaf crate in the dependency order of spec.md §2, so RMT and DTP
//! do not need a new crate just to share it.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Logs at most one message per `interval`, counting suppressed calls in
/// between so the eventual log line can report how many were skipped.
pub struct RateLimitedLog {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl RateLimitedLog {
    /// Creates a limiter allowing at most one log line per `interval`.
    pub fn new(interval: Duration) -> Self {
        RateLimitedLog {
            interval,
            last: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Calls `log` with the number of previously-suppressed occurrences, at
    /// most once per `interval`; otherwise just counts the occurrence.
    pub fn log(&self, log: impl FnOnce(u64)) {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap();
        let due = match *last {
            None => true,
            Some(t) => now.duration_since(t) >= self.interval,
        };
        if due {
            *last = Some(now);
            drop(last);
            let suppressed = self.suppressed.swap(0, Ordering::SeqCst);
            log(suppressed);
        } else {
            self.suppressed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn suppresses_within_interval() {
        let limiter = RateLimitedLog::new(Duration::from_millis(200));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = calls.clone();
            limiter.log(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn logs_again_after_interval_elapses() {
        let limiter = RateLimitedLog::new(Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        limiter.log(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(20));
        let c = calls.clone();
        limiter.log(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
