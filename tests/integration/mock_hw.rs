//! Shared fixtures: a simulated bus with an accelerometer attached and an
//! event sink that records everything the application reports.

use wearlink::adapters::time::StepClock;
use wearlink::adapters::twi::SimTwi;
use wearlink::app::events::AppEvent;
use wearlink::app::ports::EventSink;
use wearlink::bus::TwiDriver;
use wearlink::config::BusConfig;
use wearlink::sensors::accel::{ACCEL_ADDR_PRIMARY, CHIP_ID, REG_CHIP_ID};

pub type SimBus = TwiDriver<SimTwi, StepClock>;

/// Clock step per query; well below the default transfer timeout.
pub const CLOCK_STEP_US: u64 = 100;

// ── Bus fixtures ──────────────────────────────────────────────

pub fn bus_with(sim: SimTwi) -> SimBus {
    TwiDriver::init(sim, StepClock::new(CLOCK_STEP_US), &BusConfig::default()).expect("sim bus init")
}

/// Bus with a single all-zero device at `address`.
pub fn bus_with_device(address: u8) -> SimBus {
    let mut sim = SimTwi::new();
    sim.attach(address);
    bus_with(sim)
}

/// Bus with an accelerometer answering its chip id at the primary address.
pub fn accel_bus() -> SimBus {
    let mut sim = SimTwi::new();
    sim.attach(ACCEL_ADDR_PRIMARY);
    sim.load(ACCEL_ADDR_PRIMARY, REG_CHIP_ID, &[CHIP_ID]);
    bus_with(sim)
}

// ── Recording sink ────────────────────────────────────────────

/// Keeps the `Debug` rendering of every emitted event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<String>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.events.iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn last(&self) -> Option<&str> {
        self.events.last().map(String::as_str)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent<'_>) {
        self.events.push(format!("{:?}", event));
    }
}
