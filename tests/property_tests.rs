//! Property tests for the bus driver, command parsing and event decoding.
//!
//! Runs on host only; proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use proptest::prelude::*;
use wearlink::adapters::time::StepClock;
use wearlink::adapters::twi::SimTwi;
use wearlink::app::commands::AppCommand;
use wearlink::bus::{BusError, TransferState, TwiDriver};
use wearlink::config::BusConfig;
use wearlink::gatt::dispatch::{AttributeRoutes, decode};
use wearlink::gatt::service::ServiceEvent;
use wearlink::gatt::stack::WriteEvent;
use wearlink::gatt::{ConnHandle, StackEvent};

const DEV: u8 = 0x18;
const ROUTES: AttributeRoutes = AttributeRoutes { command_handle: 0x0014, cccd_handle: Some(0x0012) };

fn driver() -> TwiDriver<SimTwi, StepClock> {
    let mut sim = SimTwi::new();
    sim.attach(DEV);
    TwiDriver::init(sim, StepClock::new(100), &BusConfig::default()).unwrap()
}

// ── Bus ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn written_byte_reads_back(register in any::<u8>(), value in any::<u8>()) {
        let mut bus = driver();
        bus.write_byte(DEV, register, value).unwrap();
        prop_assert_eq!(bus.read_byte(DEV, register), Ok(value));
        prop_assert_eq!(bus.transfer_state(), TransferState::Idle);
    }

    #[test]
    fn burst_read_matches_preloaded_registers(
        start in 0u8..=200,
        data in proptest::collection::vec(any::<u8>(), 1..=32),
    ) {
        let mut bus = driver();
        bus.port_mut().load(DEV, start, &data);
        let mut dest = vec![0u8; data.len()];
        bus.read_bytes(DEV, start, &mut dest).unwrap();
        prop_assert_eq!(dest, data);
    }

    #[test]
    fn oversize_transfers_rejected_before_start(len in 256usize..=600) {
        let mut bus = driver();
        let data = vec![0u8; len];
        prop_assert_eq!(bus.write_bytes(DEV, &data), Err(BusError::TooLong(len)));
        prop_assert_eq!(bus.port().tx_count(), 0);
    }
}

// ── Commands ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn command_parse_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..=20)) {
        let _ = AppCommand::parse(&payload);
    }

    #[test]
    fn set_range_accepts_only_supported_ranges(g in any::<u8>()) {
        let parsed = AppCommand::parse(&[0x02, g]);
        prop_assert_eq!(parsed.is_ok(), matches!(g, 2 | 4 | 8 | 16));
    }
}

// ── Event decoding ────────────────────────────────────────────

proptest! {
    #[test]
    fn cccd_writes_other_than_two_bytes_are_ignored(
        data in proptest::collection::vec(any::<u8>(), 0..=8).prop_filter("not two bytes", |d| d.len() != 2),
    ) {
        let ev = StackEvent::Write(WriteEvent { conn: ConnHandle::new(0), handle: 0x0012, offset: 0, data: &data });
        prop_assert_eq!(decode(&ROUTES, &ev), None);
    }

    #[test]
    fn cccd_notify_bit_decides_subscription(value in any::<u16>()) {
        let bytes = value.to_le_bytes();
        let ev = StackEvent::Write(WriteEvent { conn: ConnHandle::new(0), handle: 0x0012, offset: 0, data: &bytes });
        let expected = if value & 1 != 0 {
            ServiceEvent::NotificationEnabled
        } else {
            ServiceEvent::NotificationDisabled
        };
        prop_assert_eq!(decode(&ROUTES, &ev), Some(expected));
    }

    #[test]
    fn writes_to_unrouted_handles_are_ignored(
        handle in any::<u16>().prop_filter("unrouted", |h| *h != 0x0012 && *h != 0x0014),
        data in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        let ev = StackEvent::Write(WriteEvent { conn: ConnHandle::new(0), handle, offset: 0, data: &data });
        prop_assert_eq!(decode(&ROUTES, &ev), None);
    }
}
