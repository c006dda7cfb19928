//! Telemetry application: turns poll ticks into published samples and
//! client commands into sensor changes.
//!
//! ```text
//!  poll tick ──▶ ┌──────────────┐ ──publish──▶ AttributeService (accel)
//!                │ TelemetryApp │
//!  AppCommand ──▶└──────────────┘ ──────────▶ EventSink
//!      ▲
//!  CommandInbox ◀── ServiceEvent (per service)
//! ```

use heapless::Deque;
use log::{info, warn};

use crate::bus::RegisterBus;
use crate::error::Error;
use crate::gatt::{AttributeService, GattStack, PublishOutcome, ServiceDescriptor, ServiceEvent, ServiceEventHandler};
use crate::sensors::accel::{AccelRange, Accelerometer};

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::EventSink;

/// Commands buffered per service between two main-loop passes.
pub const INBOX_DEPTH: usize = 4;

// ───────────────────────────────────────────────────────────────
// CommandInbox
// ───────────────────────────────────────────────────────────────

/// Service event handler: reports every event to the sink and queues
/// decoded commands for the main loop.
pub struct CommandInbox<K: EventSink> {
    sink: K,
    pending: Deque<AppCommand, INBOX_DEPTH>,
    dropped: u32,
}

impl<K: EventSink> CommandInbox<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            pending: Deque::new(),
            dropped: 0,
        }
    }

    /// Oldest queued command.
    pub fn take(&mut self) -> Option<AppCommand> {
        self.pending.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Commands discarded because the inbox was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }
}

impl<K: EventSink> ServiceEventHandler for CommandInbox<K> {
    fn on_event(&mut self, service: &'static ServiceDescriptor, event: &ServiceEvent<'_>) {
        self.sink.emit(&AppEvent::Service { service: service.name, event: *event });

        let ServiceEvent::CommandReceived(payload) = event else {
            return;
        };
        match AppCommand::parse(payload) {
            Ok(cmd) => {
                if self.pending.push_back(cmd).is_err() {
                    self.dropped = self.dropped.saturating_add(1);
                    warn!("app: {} inbox full, {:?} dropped", service.name, cmd);
                }
            }
            Err(e) => {
                warn!("app: {} command rejected: {}", service.name, e);
                self.sink.emit(&AppEvent::CommandRejected(e));
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// TelemetryApp
// ───────────────────────────────────────────────────────────────

/// Counters since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub samples: u32,
    pub bus_faults: u32,
    pub publish_failures: u32,
}

/// The polling loop body.
pub struct TelemetryApp<B> {
    accel: Accelerometer<B>,
    streaming: bool,
    stats: TelemetryStats,
}

impl<B> TelemetryApp<B>
where
    B: RegisterBus,
    Error: From<B::Error>,
{
    pub fn new(accel: Accelerometer<B>) -> Self {
        Self {
            accel,
            streaming: true,
            stats: TelemetryStats::default(),
        }
    }

    /// Probe and configure the sensor.
    pub fn start(&mut self, range: AccelRange, sink: &mut impl EventSink) -> Result<(), Error> {
        self.accel.init(range)?;
        sink.emit(&AppEvent::SensorReady(range));
        Ok(())
    }

    /// One polling tick: read a sample and publish it on `service`.
    ///
    /// Failures are reported to `sink` and counted; the next tick is the
    /// retry. Returns what the publisher did, `None` when nothing was
    /// published.
    pub fn poll<S, H>(
        &mut self,
        stack: &mut S,
        service: &AttributeService<H>,
        sink: &mut impl EventSink,
    ) -> Option<PublishOutcome>
    where
        S: GattStack + ?Sized,
        H: ServiceEventHandler,
    {
        if !self.streaming {
            return None;
        }

        let sample = match self.accel.read_sample() {
            Ok(s) => s,
            Err(Error::Bus(e)) => {
                self.stats.bus_faults = self.stats.bus_faults.saturating_add(1);
                sink.emit(&AppEvent::BusFault(e));
                return None;
            }
            Err(e) => {
                sink.emit(&AppEvent::SensorFault(e));
                return None;
            }
        };

        match service.publish(stack, &sample.to_le_bytes()) {
            Ok(outcome) => {
                self.stats.samples = self.stats.samples.wrapping_add(1);
                sink.emit(&AppEvent::Sample { sample, outcome });
                Some(outcome)
            }
            Err(e) => {
                self.stats.publish_failures = self.stats.publish_failures.saturating_add(1);
                sink.emit(&AppEvent::PublishFailed(e));
                None
            }
        }
    }

    /// Publish the 4-byte heartbeat (samples published since boot,
    /// little-endian) on the telemetry service.
    pub fn publish_heartbeat<S, H>(
        &mut self,
        stack: &mut S,
        service: &AttributeService<H>,
        sink: &mut impl EventSink,
    ) -> Option<PublishOutcome>
    where
        S: GattStack + ?Sized,
        H: ServiceEventHandler,
    {
        match service.publish(stack, &self.stats.samples.to_le_bytes()) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.stats.publish_failures = self.stats.publish_failures.saturating_add(1);
                sink.emit(&AppEvent::PublishFailed(e));
                None
            }
        }
    }

    /// Apply one client command.
    pub fn handle_command(&mut self, cmd: AppCommand, sink: &mut impl EventSink) -> Result<(), Error> {
        match cmd {
            AppCommand::PauseStreaming | AppCommand::ResumeStreaming => {
                let on = cmd == AppCommand::ResumeStreaming;
                if self.streaming != on {
                    self.streaming = on;
                    info!("app: streaming {}", if on { "resumed" } else { "paused" });
                    sink.emit(&AppEvent::StreamingChanged(on));
                }
            }
            AppCommand::SetRange(range) => {
                self.accel.set_range(range)?;
                sink.emit(&AppEvent::RangeChanged(range));
            }
        }
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    pub fn accelerometer(&self) -> &Accelerometer<B> {
        &self.accel
    }

    pub fn accelerometer_mut(&mut self) -> &mut Accelerometer<B> {
        &mut self.accel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ble::SimStack;
    use crate::adapters::time::StepClock;
    use crate::adapters::twi::{SimFault, SimTwi};
    use crate::app::commands::CommandError;
    use crate::bus::{BusError, TwiDriver};
    use crate::config::BusConfig;
    use crate::gatt::stack::{ConnHandle, StackEvent, WriteEvent};
    use crate::gatt::{ACCEL_SERVICE, SubscriptionPolicy};
    use crate::sensors::accel::{ACCEL_ADDR_PRIMARY, CHIP_ID, REG_CHIP_ID};

    #[derive(Default)]
    struct Collect(Vec<String>);

    impl EventSink for Collect {
        fn emit(&mut self, event: &AppEvent<'_>) {
            self.0.push(format!("{:?}", event));
        }
    }

    type Bus = TwiDriver<SimTwi, StepClock>;

    fn app() -> TelemetryApp<Bus> {
        let mut sim = SimTwi::new();
        sim.attach(ACCEL_ADDR_PRIMARY);
        sim.load(ACCEL_ADDR_PRIMARY, REG_CHIP_ID, &[CHIP_ID]);
        let bus = TwiDriver::init(sim, StepClock::new(100), &BusConfig::default()).unwrap();
        let mut app = TelemetryApp::new(Accelerometer::new(bus, ACCEL_ADDR_PRIMARY));
        app.start(AccelRange::G2, &mut Collect::default()).unwrap();
        app
    }

    fn accel_service(stack: &mut SimStack) -> AttributeService<CommandInbox<Collect>> {
        AttributeService::register(stack, &ACCEL_SERVICE, SubscriptionPolicy::Retain, CommandInbox::new(Collect::default()))
            .unwrap()
    }

    #[test]
    fn poll_publishes_sample_bytes() {
        let mut app = app();
        let mut stack = SimStack::new();
        let svc = accel_service(&mut stack);
        let mut sink = Collect::default();

        assert_eq!(app.poll(&mut stack, &svc, &mut sink), Some(PublishOutcome::Stored));
        assert_eq!(stack.stored_value(svc.value_handles().value_handle), Some(&[0u8; 6][..]));
        assert_eq!(app.stats().samples, 1);
        assert!(sink.0[0].starts_with("Sample"));
    }

    #[test]
    fn bus_fault_is_reported_and_next_tick_retries() {
        let mut app = app();
        let mut stack = SimStack::new();
        let svc = accel_service(&mut stack);
        let mut sink = Collect::default();

        app.accelerometer_mut().bus_mut().port_mut().inject(SimFault::Stall);
        assert_eq!(app.poll(&mut stack, &svc, &mut sink), None);
        assert_eq!(sink.0[0], format!("{:?}", AppEvent::BusFault(BusError::Timeout)));
        assert_eq!(app.stats().bus_faults, 1);

        assert!(app.poll(&mut stack, &svc, &mut sink).is_some());
    }

    #[test]
    fn paused_app_does_not_touch_the_bus() {
        let mut app = app();
        let mut stack = SimStack::new();
        let svc = accel_service(&mut stack);
        let mut sink = Collect::default();

        app.handle_command(AppCommand::PauseStreaming, &mut sink).unwrap();
        let before = app.accelerometer_mut().bus_mut().port().tx_count();
        assert_eq!(app.poll(&mut stack, &svc, &mut sink), None);
        assert_eq!(app.accelerometer_mut().bus_mut().port().tx_count(), before);

        app.handle_command(AppCommand::ResumeStreaming, &mut sink).unwrap();
        assert!(app.is_streaming());
        assert_eq!(sink.0.len(), 2);
    }

    #[test]
    fn set_range_reprograms_sensor() {
        let mut app = app();
        let mut sink = Collect::default();
        app.handle_command(AppCommand::SetRange(AccelRange::G16), &mut sink).unwrap();
        assert_eq!(app.accelerometer().range(), AccelRange::G16);
        assert_eq!(sink.0, vec![format!("{:?}", AppEvent::RangeChanged(AccelRange::G16))]);
    }

    #[test]
    fn heartbeat_carries_sample_count() {
        let mut app = app();
        let mut stack = SimStack::new();
        let svc = accel_service(&mut stack);
        let mut sink = Collect::default();
        app.poll(&mut stack, &svc, &mut sink);
        app.poll(&mut stack, &svc, &mut sink);

        let mut telemetry_stack = SimStack::new();
        let telemetry = AttributeService::register(
            &mut telemetry_stack,
            &crate::gatt::TELEMETRY_SERVICE,
            SubscriptionPolicy::Retain,
            CommandInbox::new(Collect::default()),
        )
        .unwrap();
        app.publish_heartbeat(&mut telemetry_stack, &telemetry, &mut sink);
        assert_eq!(
            telemetry_stack.stored_value(telemetry.value_handles().value_handle),
            Some(&[2, 0, 0, 0][..])
        );
    }

    fn command(svc: &mut AttributeService<CommandInbox<Collect>>, data: &[u8]) {
        let handle = svc.command_handles().value_handle;
        svc.handle_stack_event(&StackEvent::Write(WriteEvent { conn: ConnHandle::new(0), handle, offset: 0, data }));
    }

    #[test]
    fn inbox_queues_decoded_commands() {
        let mut stack = SimStack::new();
        let mut svc = accel_service(&mut stack);
        command(&mut svc, &[0x02, 4]);
        command(&mut svc, &[0x00]);
        assert_eq!(svc.handler_mut().take(), Some(AppCommand::SetRange(AccelRange::G4)));
        assert_eq!(svc.handler_mut().take(), Some(AppCommand::PauseStreaming));
        assert_eq!(svc.handler_mut().take(), None);
    }

    #[test]
    fn inbox_reports_rejected_payloads() {
        let mut stack = SimStack::new();
        let mut svc = accel_service(&mut stack);
        command(&mut svc, &[0x05]);
        assert_eq!(svc.handler().pending(), 0);
        let seen = &svc.handler().sink().0;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], format!("{:?}", AppEvent::CommandRejected(CommandError::UnknownOpcode(0x05))));
    }

    #[test]
    fn full_inbox_drops_newest() {
        let mut stack = SimStack::new();
        let mut svc = accel_service(&mut stack);
        for _ in 0..INBOX_DEPTH + 2 {
            command(&mut svc, &[0x01]);
        }
        assert_eq!(svc.handler().pending(), INBOX_DEPTH);
        assert_eq!(svc.handler().dropped(), 2);
    }
}
