//! Bus driver against the register simulator: transaction semantics,
//! failure recovery and the accelerometer on top of the HAL trait.

use embedded_hal::i2c::{I2c, Operation};
use wearlink::adapters::twi::{SimFault, SimTwi};
use wearlink::bus::{BusError, TransferState};
use wearlink::sensors::accel::{ACCEL_ADDR_PRIMARY, REG_ACCD_X_LSB, REG_PMU_RANGE};
use wearlink::sensors::{AccelRange, Accelerometer};
use wearlink::{Error, pins};

use crate::mock_hw::{accel_bus, bus_with, bus_with_device};

const DEV: u8 = 0x29;

// ── Driver ────────────────────────────────────────────────────

#[test]
fn init_powers_sensor_and_enables_peripheral() {
    let bus = bus_with(SimTwi::new());
    assert!(bus.port().is_enabled());
    assert_eq!(bus.port().powered_pin(), Some(pins::ACCEL_VDD_GPIO));
    assert_eq!(bus.transfer_state(), TransferState::Idle);
}

#[test]
fn init_failure_is_fatal_init_error() {
    let mut sim = SimTwi::new();
    sim.fail_init(-1);
    let result = wearlink::bus::TwiDriver::init(
        sim,
        wearlink::adapters::time::StepClock::new(100),
        &wearlink::config::BusConfig::default(),
    );
    assert!(matches!(result, Err(Error::Init(_))));
}

#[test]
fn stalled_read_times_out_and_bus_recovers() {
    let mut bus = bus_with_device(DEV);
    bus.port_mut().load(DEV, 0x40, &[0x7E]);

    bus.port_mut().inject(SimFault::Stall);
    assert_eq!(bus.read_byte(DEV, 0x40), Err(BusError::Timeout));
    assert_eq!(bus.port().abort_count(), 1);
    assert_eq!(bus.transfer_state(), TransferState::Idle);

    assert_eq!(bus.read_byte(DEV, 0x40), Ok(0x7E));
}

#[test]
fn failed_select_skips_read_phase() {
    let mut bus = bus_with_device(DEV);
    bus.port_mut().load(DEV, 0x00, &[1, 2, 3]);

    bus.port_mut().inject(SimFault::Nack);
    let mut dest = [0xAAu8; 3];
    assert_eq!(bus.read_bytes(DEV, 0x00, &mut dest), Err(BusError::AddressNack));
    assert_eq!(dest, [0xAA; 3]);
    assert_eq!(bus.port().rx_count(), 0);
}

#[test]
fn rejected_start_surfaces_driver_code() {
    let mut bus = bus_with_device(DEV);
    bus.port_mut().inject(SimFault::RejectStart(0x103));
    assert_eq!(bus.write_byte(DEV, 0x10, 0x01), Err(BusError::Rejected(0x103)));
    assert_eq!(bus.transfer_state(), TransferState::Idle);
    assert_eq!(bus.write_byte(DEV, 0x10, 0x01), Ok(()));
}

#[test]
fn absent_device_reports_address_nack() {
    let mut bus = bus_with(SimTwi::new());
    assert_eq!(bus.write_byte(0x50, 0x00, 0x00), Err(BusError::AddressNack));
}

// ── embedded-hal ──────────────────────────────────────────────

#[test]
fn hal_write_read_uses_repeated_start() {
    let mut bus = bus_with_device(DEV);
    bus.port_mut().load(DEV, 0x30, &[0xDE, 0xAD]);

    let mut buf = [0u8; 2];
    bus.write_read(DEV, &[0x30], &mut buf).unwrap();
    assert_eq!(buf, [0xDE, 0xAD]);
    assert!(!bus.port().last_stop());
}

#[test]
fn hal_adjacent_writes_are_one_register_write() {
    let mut bus = bus_with_device(DEV);
    bus.transaction(DEV, &mut [Operation::Write(&[0x10]), Operation::Write(&[0xAB])])
        .unwrap();
    assert_eq!(bus.port().register(DEV, 0x10), Some(0xAB));
    assert_eq!(bus.port().tx_count(), 1);
    assert!(bus.port().last_stop());
}

#[test]
fn hal_empty_write_detects_device_presence() {
    let mut bus = bus_with_device(DEV);
    assert_eq!(bus.write(DEV, &[]), Ok(()));
    assert_eq!(bus.write(DEV + 1, &[]), Err(BusError::AddressNack));
}

// ── Accelerometer over the driver ─────────────────────────────

#[test]
fn accelerometer_init_programs_range() {
    let mut accel = Accelerometer::new(accel_bus(), ACCEL_ADDR_PRIMARY);
    accel.init(AccelRange::G8).unwrap();
    assert!(accel.is_ready());
    assert_eq!(accel.bus_mut().port().register(ACCEL_ADDR_PRIMARY, REG_PMU_RANGE), Some(0x08));
}

#[test]
fn accelerometer_sample_scales_to_milli_g() {
    let mut accel = Accelerometer::new(accel_bus(), ACCEL_ADDR_PRIMARY);
    accel.init(AccelRange::G2).unwrap();
    // X = +1024 counts, Y = -1024 counts, Z = 0.
    accel
        .bus_mut()
        .port_mut()
        .load(ACCEL_ADDR_PRIMARY, REG_ACCD_X_LSB, &[0x00, 0x10, 0x00, 0xF0, 0x00, 0x00]);

    let sample = accel.read_sample().unwrap();
    assert_eq!(sample.raw, [1024, -1024, 0]);
    assert_eq!(sample.mg, [250, -250, 0]);
}

#[test]
fn accelerometer_bus_fault_maps_to_bus_error() {
    let mut accel = Accelerometer::new(accel_bus(), ACCEL_ADDR_PRIMARY);
    accel.init(AccelRange::G2).unwrap();
    accel.bus_mut().port_mut().inject(SimFault::Stall);
    assert_eq!(accel.read_sample(), Err(Error::Bus(BusError::Timeout)));
}
