//! Interrupt-driven event system.
//!
//! Events are produced by:
//! - Timer callbacks (sensor poll tick, watchdog heartbeat)
//! - The wireless stack task (a stack event was queued)
//!
//! Events are consumed by the main loop, which processes them one at a
//! time in FIFO order.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Poll timer  │────▶│              │     │              │
//! │ WDT timer   │────▶│  EventQueue  │────▶│  Main Loop   │
//! │ BLE task    │────▶│  (lock-free) │     │  (consumer)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::mpmc::Q32;

/// System event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Sensor poll timer fired.
    SensorPollTick,
    /// The wireless stack queued one or more events.
    StackEvent,
    /// Watchdog heartbeat.
    WatchdogTick,
}

/// Bounded lock-free queue; producers may run on other tasks.
pub struct EventQueue {
    queue: Q32<Event>,
    dropped: AtomicU32,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            queue: Q32::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Push an event. Never blocks; returns `false` and counts the drop
    /// when the queue is full.
    pub fn push(&self, event: Event) -> bool {
        if self.queue.enqueue(event).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn pop(&self) -> Option<Event> {
        self.queue.dequeue()
    }

    /// Drain all pending events into a callback, FIFO.
    pub fn drain(&self, mut handler: impl FnMut(Event)) {
        while let Some(event) = self.pop() {
            handler(event);
        }
    }

    /// Events lost to a full queue since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The firmware's event queue.
pub static EVENTS: EventQueue = EventQueue::new();
