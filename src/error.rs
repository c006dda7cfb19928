//! Unified error types for the wearable firmware.
//!
//! Each subsystem owns a small `Copy` error enum; every one of them converts
//! into the top-level [`Error`] so the main loop handles failures uniformly.

use core::fmt;

pub use crate::bus::BusError;
pub use crate::gatt::GattError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A two-wire bus transaction failed.
    Bus(BusError),
    /// A GATT service operation failed.
    Gatt(GattError),
    /// The sensor answered but its data or identity is wrong.
    Sensor(SensorError),
    /// Peripheral or stack bring-up failed. Fatal on target.
    Init(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Gatt(e) => write!(f, "gatt: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<GattError> for Error {
    fn from(e: GattError) -> Self {
        Self::Gatt(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The chip-id register did not hold the expected value.
    WrongChipId(u8),
    /// A sample was requested before `init()`.
    NotInitialised,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongChipId(id) => write!(f, "unexpected chip id 0x{id:02X}"),
            Self::NotInitialised => write!(f, "sensor not initialised"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
