//! Fuzz target: stack event handling
//!
//! Turns the input into a sequence of stack events aimed at the telemetry
//! service's handles (plus stray ones) and drives them through the
//! service, publishing after each. The service must never panic, and a
//! notification may only be sent while connected and subscribed.
//!
//! cargo fuzz run fuzz_stack_events

#![no_main]

use libfuzzer_sys::fuzz_target;
use wearlink::adapters::ble::SimStack;
use wearlink::gatt::service::{ServiceDescriptor, ServiceEvent, ServiceEventHandler};
use wearlink::gatt::stack::WriteEvent;
use wearlink::gatt::{AttributeService, ConnHandle, StackEvent, SubscriptionPolicy, TELEMETRY_SERVICE};

struct Quiet;

impl ServiceEventHandler for Quiet {
    fn on_event(&mut self, _: &'static ServiceDescriptor, _: &ServiceEvent<'_>) {}
}

fuzz_target!(|data: &[u8]| {
    let Some((&policy, mut rest)) = data.split_first() else {
        return;
    };
    let policy = if policy & 1 == 0 {
        SubscriptionPolicy::Retain
    } else {
        SubscriptionPolicy::ClearOnDisconnect
    };

    let mut stack = SimStack::new();
    let Ok(mut svc) = AttributeService::register(&mut stack, &TELEMETRY_SERVICE, policy, Quiet) else {
        return;
    };
    let cccd = svc.value_handles().cccd_handle.unwrap_or(0);
    let command = svc.command_handles().value_handle;

    // Each event: [kind, arg, len, payload[len]].
    while let [kind, arg, len, tail @ ..] = rest {
        let n = usize::from(*len).min(tail.len()).min(20);
        let (payload, next) = tail.split_at(n);
        rest = next;

        let conn = ConnHandle::new(u16::from(*arg));
        let event = match kind % 6 {
            0 => StackEvent::Connected { conn },
            1 => StackEvent::Disconnected { conn, reason: *arg },
            2 => StackEvent::Write(WriteEvent { conn, handle: cccd, offset: 0, data: payload }),
            3 => StackEvent::Write(WriteEvent { conn, handle: command, offset: 0, data: payload }),
            4 => StackEvent::Write(WriteEvent { conn, handle: u16::from(*arg) << 4, offset: 0, data: payload }),
            _ => StackEvent::HvnTxComplete { conn, count: *arg },
        };
        svc.handle_stack_event(&event);

        let before = stack.notify_count();
        let _ = svc.publish(&mut stack, &[0x12, 0x34, 0x56, 0x78]);
        if stack.notify_count() > before {
            assert!(svc.is_connected() && svc.notifications_enabled());
        }
    }
});
