//! Time adapters implementing [`Clock`].
//!
//! - **`target_os = "espidf"`**: [`MonotonicClock`] wraps `esp_timer_get_time()`
//!   (microsecond precision, monotonic since boot).
//! - **`not(target_os = "espidf")`**: [`MonotonicClock`] uses
//!   `std::time::Instant`; [`StepClock`] advances a fixed step on every
//!   query so bounded waits expire deterministically in tests.

use crate::app::ports::Clock;

/// Microseconds since boot (or since construction on host).
pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    #[cfg(target_os = "espidf")]
    fn now_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Simulated clock: every `now_us()` call moves time forward by `step_us`.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug)]
pub struct StepClock {
    now: core::cell::Cell<u64>,
    step_us: u64,
}

#[cfg(not(target_os = "espidf"))]
impl StepClock {
    pub fn new(step_us: u64) -> Self {
        Self {
            now: core::cell::Cell::new(0),
            step_us,
        }
    }

    /// Jump forward without a query.
    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get().wrapping_add(us));
    }
}

#[cfg(not(target_os = "espidf"))]
impl Clock for StepClock {
    fn now_us(&self) -> u64 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.step_us));
        t
    }
}
