//! Leading-edge debounce gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NEVER: u64 = u64::MAX;

/// Lets at most one notification through per window, timed from the last one that
/// fired. Suppressed calls are dropped, not queued. Safe to share across threads.
#[derive(Debug)]
pub struct DebounceGate {
    origin: Instant,
    window: Duration,
    /// Microseconds since `origin` of the last fired call, or `NEVER`.
    last_fired: AtomicU64,
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            origin: Instant::now(),
            window,
            last_fired: AtomicU64::new(NEVER),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn try_fire(&self) -> bool {
        self.try_fire_at(Instant::now())
    }

    /// Returns true if this call fires.
    pub fn try_fire_at(&self, now: Instant) -> bool {
        let now_us = now.saturating_duration_since(self.origin).as_micros() as u64;
        let window_us = self.window.as_micros() as u64;
        let mut last = self.last_fired.load(Ordering::Acquire);
        loop {
            if last != NEVER && now_us.saturating_sub(last) < window_us {
                return false;
            }
            match self.last_fired.compare_exchange_weak(
                last,
                now_us,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn burst_inside_window_fires_once() {
        let gate = DebounceGate::new(WINDOW);
        let t0 = Instant::now();
        let fired = (0..10u64)
            .filter(|i| gate.try_fire_at(t0 + Duration::from_millis(i * 9)))
            .count();
        assert_eq!(fired, 1);

        assert!(gate.try_fire_at(t0 + Duration::from_millis(150)));
        assert!(!gate.try_fire_at(t0 + Duration::from_millis(160)));
        assert!(gate.try_fire_at(t0 + Duration::from_millis(250)));
    }

    #[test]
    fn window_is_timed_from_last_fire_not_last_call() {
        let gate = DebounceGate::new(WINDOW);
        let t0 = Instant::now();
        assert!(gate.try_fire_at(t0));
        // steady suppressed traffic does not push the window out
        for ms in (10..100u64).step_by(10) {
            assert!(!gate.try_fire_at(t0 + Duration::from_millis(ms)));
        }
        assert!(gate.try_fire_at(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn concurrent_callers_fire_once_per_window() {
        let gate = Arc::new(DebounceGate::new(Duration::from_secs(60)));
        let fired = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let fired = fired.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if gate.try_fire_at(now) {
                            fired.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
