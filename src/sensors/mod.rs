//! Sensor drivers on the two-wire bus.

pub mod accel;

pub use accel::{AccelRange, AccelSample, Accelerometer};
