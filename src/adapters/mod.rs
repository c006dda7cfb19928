//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements  | Connects to                               |
//! |------------|-------------|-------------------------------------------|
//! | `ble`      | GattStack   | Bluedroid GATT server / recording sim     |
//! | `twi`      | TwiPort     | ESP-IDF I²C master (async) / register sim |
//! | `time`     | Clock       | `esp_timer` / `Instant` / stepped sim     |
//! | `log_sink` | EventSink   | Serial log output                         |

pub mod ble;
pub mod log_sink;
pub mod time;
pub mod twi;
