//! System configuration parameters
//!
//! All tunable parameters for the wearable: bus wiring and timing, BLE
//! policy, and sensor polling. Defaults match the production board.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gatt::SubscriptionPolicy;
use crate::pins;
use crate::sensors::accel::{ACCEL_ADDR_PRIMARY, AccelRange};

/// TWI clock frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwiFrequency {
    K100,
    K250,
    K400,
}

impl TwiFrequency {
    pub const fn hz(self) -> u32 {
        match self {
            Self::K100 => 100_000,
            Self::K250 => 250_000,
            Self::K400 => 400_000,
        }
    }
}

/// Two-wire bus binding: wiring, clock, interrupt priority, wait bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub sda_pin: i32,
    pub scl_pin: i32,
    pub frequency: TwiFrequency,
    pub interrupt_priority: u8,
    /// Output pin that powers the sensor, driven HIGH before the bus comes up.
    pub sensor_power_pin: Option<i32>,
    /// Upper bound on the wait for one transaction phase to complete.
    pub transfer_timeout_ms: u32,
    /// Clock out nine pulses on SCL at init to free a stuck slave.
    pub clear_bus_on_init: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sda_pin: pins::I2C_SDA_GPIO,
            scl_pin: pins::I2C_SCL_GPIO,
            frequency: TwiFrequency::K100,
            interrupt_priority: pins::I2C_IRQ_PRIORITY,
            sensor_power_pin: Some(pins::ACCEL_VDD_GPIO),
            transfer_timeout_ms: 20,
            clear_bus_on_init: false,
        }
    }
}

/// Peripheral-role BLE settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    /// Advertised device name.
    pub device_name: heapless::String<24>,
    /// What happens to a subscription when the client disconnects.
    pub subscription_policy: SubscriptionPolicy,
}

impl Default for BleConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("wearlink");
        Self {
            device_name,
            subscription_policy: SubscriptionPolicy::Retain,
        }
    }
}

/// Accelerometer polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub accel_address: u8,
    pub accel_range: AccelRange,
    /// Sensor poll interval (milliseconds)
    pub poll_interval_ms: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            accel_address: ACCEL_ADDR_PRIMARY,
            accel_range: AccelRange::G2,
            poll_interval_ms: 400,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub bus: BusConfig,
    pub ble: BleConfig,
    pub sensor: SensorConfig,
}

impl SystemConfig {
    /// Reject values the drivers cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.bus.sda_pin == self.bus.scl_pin {
            return Err(Error::Config("SDA and SCL share a pin"));
        }
        if self.bus.sensor_power_pin.is_some_and(|p| p == self.bus.sda_pin || p == self.bus.scl_pin) {
            return Err(Error::Config("sensor power pin collides with bus pin"));
        }
        if self.bus.transfer_timeout_ms == 0 {
            return Err(Error::Config("transfer timeout must be non-zero"));
        }
        if self.sensor.accel_address > 0x7F {
            return Err(Error::Config("accelerometer address is not 7-bit"));
        }
        if self.sensor.poll_interval_ms <= self.bus.transfer_timeout_ms * 2 {
            return Err(Error::Config("poll interval shorter than a two-phase read"));
        }
        if self.ble.device_name.is_empty() {
            return Err(Error::Config("device name is empty"));
        }
        Ok(())
    }
}
