//! Register-level access for sensor drivers.
//!
//! Sensors address their device as a register file: write one register,
//! read a block starting at a register. [`TwiDriver`] serves that through
//! its own `write_byte` / `read_bytes` (select phase with stop, then read);
//! any other `embedded-hal` bus is wrapped in [`HalBus`].

use embedded_hal::i2c::I2c;

use super::{BusError, TwiDriver, TwiPort};
use crate::app::ports::Clock;

pub trait RegisterBus {
    type Error;

    fn write_register(&mut self, address: u8, register: u8, value: u8) -> Result<(), Self::Error>;

    /// Read `dest.len()` consecutive registers starting at `register`.
    fn read_registers(&mut self, address: u8, register: u8, dest: &mut [u8]) -> Result<(), Self::Error>;
}

impl<P: TwiPort, C: Clock> RegisterBus for TwiDriver<P, C> {
    type Error = BusError;

    fn write_register(&mut self, address: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.write_byte(address, register, value)
    }

    fn read_registers(&mut self, address: u8, register: u8, dest: &mut [u8]) -> Result<(), BusError> {
        self.read_bytes(address, register, dest)
    }
}

/// Register access over a generic `embedded-hal` bus; block reads use
/// write-then-read with a repeated start.
#[derive(Debug)]
pub struct HalBus<I>(I);

impl<I: I2c> HalBus<I> {
    pub fn new(i2c: I) -> Self {
        Self(i2c)
    }

    pub fn inner(&self) -> &I {
        &self.0
    }

    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.0
    }

    pub fn into_inner(self) -> I {
        self.0
    }
}

impl<I: I2c> RegisterBus for HalBus<I> {
    type Error = I::Error;

    fn write_register(&mut self, address: u8, register: u8, value: u8) -> Result<(), I::Error> {
        self.0.write(address, &[register, value])
    }

    fn read_registers(&mut self, address: u8, register: u8, dest: &mut [u8]) -> Result<(), I::Error> {
        self.0.write_read(address, &[register], dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::time::StepClock;
    use crate::adapters::twi::SimTwi;
    use crate::config::BusConfig;

    const DEV: u8 = 0x18;

    fn driver() -> TwiDriver<SimTwi, StepClock> {
        let mut sim = SimTwi::new();
        sim.attach(DEV);
        TwiDriver::init(sim, StepClock::new(100), &BusConfig::default()).unwrap()
    }

    #[test]
    fn driver_block_read_stops_after_select() {
        let mut bus = driver();
        bus.port_mut().load(DEV, 0x02, &[9, 8, 7]);
        let mut dest = [0u8; 3];
        bus.read_registers(DEV, 0x02, &mut dest).unwrap();
        assert_eq!(dest, [9, 8, 7]);
        assert!(bus.port().last_stop());
    }

    #[test]
    fn hal_block_read_uses_repeated_start() {
        let mut bus = HalBus::new(driver());
        bus.write_register(DEV, 0x0F, 0x05).unwrap();
        let mut dest = [0u8; 1];
        bus.read_registers(DEV, 0x0F, &mut dest).unwrap();
        assert_eq!(dest, [0x05]);
        assert!(!bus.inner().port().last_stop());
    }
}
