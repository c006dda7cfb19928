//! Wearlink firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspTwi          BluedroidStack    MonotonicClock  LogEventSink│
//! │  (TwiPort)       (GattStack)       (Clock)         (EventSink) │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  TwiDriver ─▶ Accelerometer ─▶ TelemetryApp ─▶ publish         │
//! │  dispatch  ─▶ AttributeService ×2 ─▶ CommandInbox              │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use core::fmt::Display;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use wearlink::adapters::ble::BluedroidStack;
use wearlink::adapters::log_sink::LogEventSink;
use wearlink::adapters::time::MonotonicClock;
use wearlink::adapters::twi::EspTwi;
use wearlink::app::service::{CommandInbox, TelemetryApp};
use wearlink::bus::TwiDriver;
use wearlink::config::SystemConfig;
use wearlink::drivers::hw_timer::PeriodicTimer;
use wearlink::drivers::watchdog::{WATCHDOG_TIMEOUT_MS, Watchdog};
use wearlink::events::{EVENTS, Event};
use wearlink::gatt::{ACCEL_SERVICE, AttributeService, TELEMETRY_SERVICE, dispatch};
use wearlink::sensors::Accelerometer;

/// Main-loop idle between queue drains.
const LOOP_IDLE: Duration = Duration::from_millis(10);
const WATCHDOG_TICK_MS: u32 = 1_000;

/// Fatal bring-up failure: log and stop. The task watchdog (once
/// subscribed) or a power cycle recovers.
fn halt(what: &str, e: impl Display) -> ! {
    error!("{} failed: {}, halting", what, e);
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Wearlink v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = SystemConfig::default();
    config.validate()?;
    let mut sink = LogEventSink::new();

    // ── 2. Wireless stack and services ────────────────────────
    let mut stack = BluedroidStack::start(&config.ble.device_name).unwrap_or_else(|e| halt("BLE stack", e));
    let policy = config.ble.subscription_policy;
    let mut telemetry = AttributeService::register(&mut stack, &TELEMETRY_SERVICE, policy, CommandInbox::new(LogEventSink::new()))
        .unwrap_or_else(|e| halt("telemetry service", e));
    let mut accel = AttributeService::register(&mut stack, &ACCEL_SERVICE, policy, CommandInbox::new(LogEventSink::new()))
        .unwrap_or_else(|e| halt("accel service", e));
    stack.advertise().unwrap_or_else(|e| halt("advertising", e));

    // ── 3. Bus and sensor ─────────────────────────────────────
    let bus = TwiDriver::init(EspTwi::new(), MonotonicClock::new(), &config.bus).unwrap_or_else(|e| halt("TWI", e));
    let mut app = TelemetryApp::new(Accelerometer::new(bus, config.sensor.accel_address));
    let mut sensor_ready = match app.start(config.sensor.accel_range, &mut sink) {
        Ok(()) => true,
        Err(e) => {
            warn!("sensor init failed ({}), retrying on poll ticks", e);
            false
        }
    };

    // ── 4. Timers and watchdog ────────────────────────────────
    let _poll_timer = PeriodicTimer::start(c"poll", config.sensor.poll_interval_ms, &EVENTS, Event::SensorPollTick)?;
    let _wdt_timer = PeriodicTimer::start(c"wdt", WATCHDOG_TICK_MS, &EVENTS, Event::WatchdogTick)?;
    let mut watchdog = Watchdog::new(WATCHDOG_TIMEOUT_MS);

    info!("main: entering event loop");

    // ── 5. Event loop ─────────────────────────────────────────
    loop {
        while let Some(event) = EVENTS.pop() {
            match event {
                Event::StackEvent => {
                    while let Some(owned) = stack.next_event() {
                        dispatch(&owned.as_event(), &mut [&mut telemetry, &mut accel]);
                    }
                }
                Event::SensorPollTick => {
                    if !sensor_ready {
                        sensor_ready = app.start(config.sensor.accel_range, &mut sink).is_ok();
                        continue;
                    }
                    app.poll(&mut stack, &accel, &mut sink);
                }
                Event::WatchdogTick => {
                    watchdog.feed();
                    app.publish_heartbeat(&mut stack, &telemetry, &mut sink);
                    let dropped = EVENTS.dropped() + u32::from(stack.dropped_events());
                    if dropped > 0 && watchdog.feeds() % 60 == 0 {
                        warn!("main: {} events dropped since boot", dropped);
                    }
                }
            }
        }

        for inbox in [telemetry.handler_mut(), accel.handler_mut()] {
            while let Some(cmd) = inbox.take() {
                if let Err(e) = app.handle_command(cmd, &mut sink) {
                    warn!("main: {:?} failed: {}", cmd, e);
                }
            }
        }

        std::thread::sleep(LOOP_IDLE);
    }
}
