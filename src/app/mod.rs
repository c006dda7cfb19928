//! Application core: command decoding, service event handling and the
//! polling tick.
//!
//! Everything here talks to hardware only through the bus driver, the
//! [`GattStack`](crate::gatt::GattStack) port and the traits in [`ports`],
//! so it runs unchanged against the simulation adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
