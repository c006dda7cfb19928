//! Port traits: the boundary between the telemetry core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ bus driver / TelemetryApp
//! ```
//!
//! The bus and wireless-stack ports live next to the code that drives them
//! ([`crate::bus::TwiPort`], [`crate::gatt::GattStack`]); the ports here are
//! the cross-cutting ones.

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic microsecond time source for bounded waits.
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin. Wraps at `u64::MAX`.
    fn now_us(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The telemetry core emits structured [`AppEvent`]s through this port.
/// Adapters decide where they go (serial log, test recorder).
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent<'_>);
}
