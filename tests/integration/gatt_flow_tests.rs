//! End-to-end attribute-service flows over the recording stack: client
//! connects, subscribes, writes commands; the application publishes.

use wearlink::adapters::ble::{SimStack, StackCall};
use wearlink::app::commands::AppCommand;
use wearlink::app::service::{CommandInbox, TelemetryApp};
use wearlink::gatt::service::{ServiceDescriptor, ServiceEvent, ServiceEventHandler};
use wearlink::gatt::stack::WriteEvent;
use wearlink::gatt::{
    ACCEL_SERVICE, AttributeService, ConnHandle, GattError, PublishOutcome, StackEvent, SubscriptionPolicy,
    TELEMETRY_SERVICE, dispatch,
};
use wearlink::sensors::accel::{ACCEL_ADDR_PRIMARY, REG_PMU_RANGE};
use wearlink::sensors::{AccelRange, Accelerometer};

use crate::mock_hw::{RecordingSink, accel_bus};

const CONN: ConnHandle = ConnHandle::new(1);

// ── Recording handler ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Connected(ConnHandle),
    Disconnected(u8),
    Enabled,
    Disabled,
    Command(Vec<u8>),
}

#[derive(Default)]
struct Recorder(Vec<(&'static str, Seen)>);

impl ServiceEventHandler for Recorder {
    fn on_event(&mut self, service: &'static ServiceDescriptor, event: &ServiceEvent<'_>) {
        let seen = match *event {
            ServiceEvent::Connected { conn } => Seen::Connected(conn),
            ServiceEvent::Disconnected { reason } => Seen::Disconnected(reason),
            ServiceEvent::NotificationEnabled => Seen::Enabled,
            ServiceEvent::NotificationDisabled => Seen::Disabled,
            ServiceEvent::CommandReceived(data) => Seen::Command(data.to_vec()),
        };
        self.0.push((service.name, seen));
    }
}

fn telemetry(stack: &mut SimStack, policy: SubscriptionPolicy) -> AttributeService<Recorder> {
    AttributeService::register(stack, &TELEMETRY_SERVICE, policy, Recorder::default()).unwrap()
}

fn write<'a, H>(svc: &AttributeService<H>, cccd: bool, data: &'a [u8]) -> StackEvent<'a> {
    let handle = if cccd {
        svc.value_handles().cccd_handle.unwrap()
    } else {
        svc.command_handles().value_handle
    };
    StackEvent::Write(WriteEvent { conn: CONN, handle, offset: 0, data })
}

// ── Flows ─────────────────────────────────────────────────────

#[test]
fn connect_subscribe_publish_notifies_once() {
    let mut stack = SimStack::new();
    let mut svc = telemetry(&mut stack, SubscriptionPolicy::Retain);

    svc.handle_stack_event(&StackEvent::Connected { conn: CONN });
    svc.handle_stack_event(&write(&svc, true, &[0x01, 0x00]));
    assert!(svc.notifications_enabled());

    let value = [0x12, 0x34, 0x56, 0x78];
    assert_eq!(svc.publish(&mut stack, &value), Ok(PublishOutcome::Notified));

    let handle = svc.value_handles().value_handle;
    assert_eq!(stack.notify_count(), 1);
    assert_eq!(stack.notifications()[0].conn, CONN);
    assert_eq!(stack.notifications()[0].handle, handle);
    assert_eq!(stack.notifications()[0].data, value);
    assert_eq!(stack.stored_value(handle), Some(&value[..]));
    assert_eq!(
        svc.handler().0,
        vec![("telemetry", Seen::Connected(CONN)), ("telemetry", Seen::Enabled)]
    );
}

#[test]
fn publish_after_disconnect_keeps_value_without_notifying() {
    let mut stack = SimStack::new();
    let mut svc = telemetry(&mut stack, SubscriptionPolicy::Retain);

    svc.handle_stack_event(&StackEvent::Connected { conn: CONN });
    svc.handle_stack_event(&write(&svc, true, &[0x01, 0x00]));
    svc.handle_stack_event(&StackEvent::Disconnected { conn: CONN, reason: 0x13 });

    assert_eq!(svc.publish(&mut stack, &[9, 9, 9, 9]), Err(GattError::InvalidState));
    assert_eq!(stack.notify_count(), 0);
    assert_eq!(stack.stored_value(svc.value_handles().value_handle), Some(&[9u8, 9, 9, 9][..]));
    assert_eq!(svc.handler().0.last(), Some(&("telemetry", Seen::Disconnected(0x13))));
}

#[test]
fn clear_on_disconnect_requires_resubscribe() {
    let mut stack = SimStack::new();
    let mut svc = telemetry(&mut stack, SubscriptionPolicy::ClearOnDisconnect);

    svc.handle_stack_event(&StackEvent::Connected { conn: CONN });
    svc.handle_stack_event(&write(&svc, true, &[0x01, 0x00]));
    svc.handle_stack_event(&StackEvent::Disconnected { conn: CONN, reason: 0x13 });
    assert!(!svc.notifications_enabled());

    svc.handle_stack_event(&StackEvent::Connected { conn: CONN });
    assert_eq!(svc.publish(&mut stack, &[1, 2, 3, 4]), Ok(PublishOutcome::Stored));
    assert_eq!(stack.notify_count(), 0);
}

#[test]
fn command_write_reaches_handler_once() {
    let mut stack = SimStack::new();
    let mut svc = telemetry(&mut stack, SubscriptionPolicy::Retain);

    svc.handle_stack_event(&write(&svc, false, &[0x05]));
    assert_eq!(svc.handler().0, vec![("telemetry", Seen::Command(vec![0x05]))]);
}

#[test]
fn malformed_cccd_write_is_ignored() {
    let mut stack = SimStack::new();
    let mut svc = telemetry(&mut stack, SubscriptionPolicy::Retain);

    svc.handle_stack_event(&write(&svc, true, &[0x01]));
    svc.handle_stack_event(&write(&svc, true, &[0x01, 0x00, 0x00]));
    assert!(!svc.notifications_enabled());
    assert!(svc.handler().0.is_empty());
}

#[test]
fn publish_without_connection_only_stores() {
    let mut stack = SimStack::new();
    let svc = telemetry(&mut stack, SubscriptionPolicy::Retain);

    assert_eq!(svc.publish(&mut stack, &[0xAB, 0xCD, 0xEF, 0x01]), Ok(PublishOutcome::Stored));
    assert_eq!(stack.notify_count(), 0);
    assert!(stack.calls().contains(&StackCall::ValueSet {
        conn: ConnHandle::INVALID,
        handle: svc.value_handles().value_handle,
        len: 4,
    }));
}

#[test]
fn dispatch_fans_out_to_both_services() {
    let mut stack = SimStack::new();
    let mut tele = telemetry(&mut stack, SubscriptionPolicy::Retain);
    let mut accel =
        AttributeService::register(&mut stack, &ACCEL_SERVICE, SubscriptionPolicy::Retain, Recorder::default())
            .unwrap();
    assert_ne!(tele.value_handles().value_handle, accel.value_handles().value_handle);

    dispatch(&StackEvent::Connected { conn: CONN }, &mut [&mut tele, &mut accel]);
    let cmd = write(&accel, false, &[0x00]);
    dispatch(&cmd, &mut [&mut tele, &mut accel]);

    assert!(tele.is_connected() && accel.is_connected());
    assert_eq!(tele.handler().0, vec![("telemetry", Seen::Connected(CONN))]);
    assert_eq!(
        accel.handler().0,
        vec![("accel", Seen::Connected(CONN)), ("accel", Seen::Command(vec![0x00]))]
    );
}

// ── Application on top ────────────────────────────────────────

#[test]
fn client_command_changes_sensor_range_and_streaming() {
    let mut stack = SimStack::new();
    let mut svc = AttributeService::register(
        &mut stack,
        &ACCEL_SERVICE,
        SubscriptionPolicy::Retain,
        CommandInbox::new(RecordingSink::new()),
    )
    .unwrap();
    let mut sink = RecordingSink::new();
    let mut app = TelemetryApp::new(Accelerometer::new(accel_bus(), ACCEL_ADDR_PRIMARY));
    app.start(AccelRange::G2, &mut sink).unwrap();

    svc.handle_stack_event(&StackEvent::Connected { conn: CONN });
    svc.handle_stack_event(&write(&svc, false, &[0x02, 16]));
    svc.handle_stack_event(&write(&svc, false, &[0x00]));
    assert_eq!(svc.handler().pending(), 2);

    while let Some(cmd) = svc.handler_mut().take() {
        app.handle_command(cmd, &mut sink).unwrap();
    }
    assert_eq!(app.accelerometer().range(), AccelRange::G16);
    assert_eq!(
        app.accelerometer_mut().bus_mut().port().register(ACCEL_ADDR_PRIMARY, REG_PMU_RANGE),
        Some(0x0C)
    );
    assert!(!app.is_streaming());
    assert_eq!(app.poll(&mut stack, &svc, &mut sink), None);

    app.handle_command(AppCommand::ResumeStreaming, &mut sink).unwrap();
    assert_eq!(app.poll(&mut stack, &svc, &mut sink), Some(PublishOutcome::Stored));
    assert_eq!(app.publish_heartbeat(&mut stack, &svc, &mut sink), Some(PublishOutcome::Stored));
}

#[test]
fn rejected_command_is_reported_not_queued() {
    let mut stack = SimStack::new();
    let mut svc = AttributeService::register(
        &mut stack,
        &ACCEL_SERVICE,
        SubscriptionPolicy::Retain,
        CommandInbox::new(RecordingSink::new()),
    )
    .unwrap();

    svc.handle_stack_event(&write(&svc, false, &[0x02, 3]));
    assert_eq!(svc.handler().pending(), 0);
    assert_eq!(svc.handler().sink().count_prefix("CommandRejected"), 1);
}
