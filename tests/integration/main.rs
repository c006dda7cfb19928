//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the simulation adapters. All tests run on the host with no
//! real hardware required.

#![cfg(not(target_os = "espidf"))]

mod bus_tests;
mod gatt_flow_tests;
mod mock_hw;
