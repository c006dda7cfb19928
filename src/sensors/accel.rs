//! BMA280-class 3-axis accelerometer (14-bit, ±2/4/8/16 g).
//!
//! Powered through the sensor enable pin (see [`crate::pins`]) and read
//! through a [`RegisterBus`]: the [`TwiDriver`](crate::bus::TwiDriver) on the
//! wearable, or any `embedded-hal` bus wrapped in
//! [`HalBus`](crate::bus::HalBus).
//!
//! ## Data format
//!
//! Each axis is two registers, LSB first. The 14-bit sample is
//! left-justified in the 16-bit pair; bit 0 of the LSB is the new-data flag
//! and is discarded by the shift.

use crate::bus::RegisterBus;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, SensorError};

/// SDO pulled low.
pub const ACCEL_ADDR_PRIMARY: u8 = 0x18;
/// SDO pulled high.
pub const ACCEL_ADDR_SECONDARY: u8 = 0x19;

pub const CHIP_ID: u8 = 0xFB;

pub const REG_CHIP_ID: u8 = 0x00;
pub const REG_ACCD_X_LSB: u8 = 0x02;
pub const REG_PMU_RANGE: u8 = 0x0F;
pub const REG_PMU_BW: u8 = 0x10;

/// 62.5 Hz filter bandwidth; comfortably above the 2.5 Hz poll rate.
const BW_62_5_HZ: u8 = 0x0B;

/// Full-scale counts of a signed 14-bit sample.
const FULL_SCALE_COUNTS: i32 = 8192;

/// Measurement range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    /// Range from its full-scale value in g.
    pub fn from_g(g: u8) -> Option<Self> {
        match g {
            2 => Some(Self::G2),
            4 => Some(Self::G4),
            8 => Some(Self::G8),
            16 => Some(Self::G16),
            _ => None,
        }
    }

    pub fn g(self) -> u8 {
        match self {
            Self::G2 => 2,
            Self::G4 => 4,
            Self::G8 => 8,
            Self::G16 => 16,
        }
    }

    /// `PMU_RANGE` register value.
    fn reg(self) -> u8 {
        match self {
            Self::G2 => 0x03,
            Self::G4 => 0x05,
            Self::G8 => 0x08,
            Self::G16 => 0x0C,
        }
    }

    fn counts_to_mg(self, counts: i16) -> i16 {
        // |counts| <= 8192 and g <= 16, so the result fits in i16.
        (i32::from(counts) * i32::from(self.g()) * 1000 / FULL_SCALE_COUNTS) as i16
    }
}

/// One X/Y/Z reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccelSample {
    /// Signed 14-bit counts.
    pub raw: [i16; 3],
    /// Acceleration in milli-g.
    pub mg: [i16; 3],
}

impl AccelSample {
    fn from_frame(frame: &[u8; 6], range: AccelRange) -> Self {
        let mut raw = [0i16; 3];
        let mut mg = [0i16; 3];
        for (axis, pair) in frame.chunks_exact(2).enumerate() {
            let counts = i16::from_le_bytes([pair[0], pair[1]]) >> 2;
            raw[axis] = counts;
            mg[axis] = range.counts_to_mg(counts);
        }
        Self { raw, mg }
    }

    /// Characteristic payload: X, Y, Z milli-g as little-endian i16.
    pub fn to_le_bytes(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        for (dst, v) in out.chunks_exact_mut(2).zip(self.mg) {
            dst.copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Accelerometer driver.
pub struct Accelerometer<B> {
    bus: B,
    address: u8,
    range: AccelRange,
    ready: bool,
}

impl<B> Accelerometer<B>
where
    B: RegisterBus,
    Error: From<B::Error>,
{
    pub fn new(bus: B, address: u8) -> Self {
        Self {
            bus,
            address,
            range: AccelRange::G2,
            ready: false,
        }
    }

    /// Verify the chip id and program range and bandwidth.
    pub fn init(&mut self, range: AccelRange) -> Result<(), Error> {
        let mut id = [0u8; 1];
        self.bus.read_registers(self.address, REG_CHIP_ID, &mut id)?;
        if id[0] != CHIP_ID {
            return Err(SensorError::WrongChipId(id[0]).into());
        }
        self.bus.write_register(self.address, REG_PMU_BW, BW_62_5_HZ)?;
        self.ready = true;
        self.set_range(range)?;
        info!("accel: ready at 0x{:02X}, ±{} g", self.address, range.g());
        Ok(())
    }

    pub fn set_range(&mut self, range: AccelRange) -> Result<(), Error> {
        if !self.ready {
            return Err(SensorError::NotInitialised.into());
        }
        self.bus.write_register(self.address, REG_PMU_RANGE, range.reg())?;
        self.range = range;
        debug!("accel: range ±{} g", range.g());
        Ok(())
    }

    /// Read X, Y and Z in one block read so the axes belong together.
    pub fn read_sample(&mut self) -> Result<AccelSample, Error> {
        if !self.ready {
            return Err(SensorError::NotInitialised.into());
        }
        let mut frame = [0u8; 6];
        self.bus.read_registers(self.address, REG_ACCD_X_LSB, &mut frame)?;
        Ok(AccelSample::from_frame(&frame, self.range))
    }

    pub fn range(&self) -> AccelRange {
        self.range
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::time::StepClock;
    use crate::adapters::twi::{SimFault, SimTwi};
    use crate::bus::{BusError, HalBus, TwiDriver};
    use crate::config::BusConfig;

    type Bus = TwiDriver<SimTwi, StepClock>;

    fn bus(chip_id: u8) -> Bus {
        let mut sim = SimTwi::new();
        sim.attach(ACCEL_ADDR_PRIMARY);
        sim.load(ACCEL_ADDR_PRIMARY, REG_CHIP_ID, &[chip_id]);
        TwiDriver::init(sim, StepClock::new(100), &BusConfig::default()).unwrap()
    }

    #[test]
    fn init_programs_range_and_bandwidth() {
        let mut accel = Accelerometer::new(bus(CHIP_ID), ACCEL_ADDR_PRIMARY);
        accel.init(AccelRange::G4).unwrap();
        let sim = accel.bus_mut().port();
        assert_eq!(sim.register(ACCEL_ADDR_PRIMARY, REG_PMU_RANGE), Some(0x05));
        assert_eq!(sim.register(ACCEL_ADDR_PRIMARY, REG_PMU_BW), Some(BW_62_5_HZ));
        assert_eq!(accel.range(), AccelRange::G4);
    }

    #[test]
    fn wrong_chip_id_is_rejected() {
        let mut accel = Accelerometer::new(bus(0x12), ACCEL_ADDR_PRIMARY);
        assert_eq!(
            accel.init(AccelRange::G2),
            Err(Error::Sensor(SensorError::WrongChipId(0x12)))
        );
        assert!(!accel.is_ready());
    }

    #[test]
    fn sample_before_init_is_refused() {
        let mut accel = Accelerometer::new(bus(CHIP_ID), ACCEL_ADDR_PRIMARY);
        assert_eq!(accel.read_sample(), Err(Error::Sensor(SensorError::NotInitialised)));
    }

    #[test]
    fn decodes_left_justified_samples() {
        let mut accel = Accelerometer::new(bus(CHIP_ID), ACCEL_ADDR_PRIMARY);
        accel.init(AccelRange::G2).unwrap();
        // +1 g, -1 g, 0 g at ±2 g; X carries the new-data flag.
        accel
            .bus_mut()
            .port_mut()
            .load(ACCEL_ADDR_PRIMARY, REG_ACCD_X_LSB, &[0x01, 0x40, 0x00, 0xC0, 0x00, 0x00]);
        let s = accel.read_sample().unwrap();
        assert_eq!(s.raw, [4096, -4096, 0]);
        assert_eq!(s.mg, [1000, -1000, 0]);
        assert_eq!(s.to_le_bytes(), [0xE8, 0x03, 0x18, 0xFC, 0x00, 0x00]);
    }

    #[test]
    fn bus_fault_surfaces_as_bus_error() {
        let mut accel = Accelerometer::new(bus(CHIP_ID), ACCEL_ADDR_PRIMARY);
        accel.init(AccelRange::G2).unwrap();
        accel.bus_mut().port_mut().inject(SimFault::Nack);
        assert_eq!(accel.read_sample(), Err(Error::Bus(BusError::AddressNack)));
    }

    #[test]
    fn sample_frame_read_selects_with_stop() {
        let mut accel = Accelerometer::new(bus(CHIP_ID), ACCEL_ADDR_PRIMARY);
        accel.init(AccelRange::G2).unwrap();
        let rx_before = accel.bus_mut().port().rx_count();
        accel.read_sample().unwrap();
        let sim = accel.bus_mut().port();
        assert!(sim.last_stop());
        assert_eq!(sim.rx_count(), rx_before + 1);
    }

    #[test]
    fn runs_over_generic_hal_bus() {
        let mut accel = Accelerometer::new(HalBus::new(bus(CHIP_ID)), ACCEL_ADDR_PRIMARY);
        accel.init(AccelRange::G8).unwrap();
        accel
            .bus_mut()
            .inner_mut()
            .port_mut()
            .load(ACCEL_ADDR_PRIMARY, REG_ACCD_X_LSB, &[0x00, 0x10, 0x00, 0x00, 0x00, 0x00]);
        let s = accel.read_sample().unwrap();
        assert_eq!(s.raw, [1024, 0, 0]);
        assert!(!accel.bus_mut().inner().port().last_stop());
    }

    #[test]
    fn range_scaling() {
        assert_eq!(AccelRange::G16.counts_to_mg(8191), 15998);
        assert_eq!(AccelRange::G8.counts_to_mg(-8192), -8000);
        assert_eq!(AccelRange::from_g(3), None);
    }
}
