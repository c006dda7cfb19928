//! Wearlink firmware library.
//!
//! The sensor-telemetry path of the wearable: a blocking two-wire bus
//! driver over an interrupt-completed hardware primitive, the BLE
//! attribute services that republish sensor data, and the application
//! glue between them. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; every other target
//! gets simulation adapters so the whole path runs under `cargo test`.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bus;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod gatt;
pub mod pins;
pub mod sensors;

pub use error::{Error, Result};
