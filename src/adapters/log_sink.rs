//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the logger (UART / USB-CDC in production, nothing in tests unless a
//! logger is installed).

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::gatt::ServiceEvent;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent<'_>) {
        match event {
            AppEvent::SensorReady(range) => {
                info!("SENSOR | ready, range=±{}g", range.g());
            }
            AppEvent::Service { service, event } => match event {
                ServiceEvent::Connected { conn } => info!("BLE    | {} connected (conn={})", service, conn.raw()),
                ServiceEvent::Disconnected { reason } => {
                    info!("BLE    | {} disconnected (reason=0x{:02X})", service, reason)
                }
                ServiceEvent::NotificationEnabled => info!("BLE    | {} notifications on", service),
                ServiceEvent::NotificationDisabled => info!("BLE    | {} notifications off", service),
                ServiceEvent::CommandReceived(data) => info!("BLE    | {} command {:02X?}", service, data),
            },
            AppEvent::Sample { sample, outcome } => {
                info!(
                    "ACCEL  | x={} y={} z={} mg | {:?}",
                    sample.mg[0], sample.mg[1], sample.mg[2], outcome
                );
            }
            AppEvent::BusFault(e) => warn!("BUS    | {}", e),
            AppEvent::SensorFault(e) => warn!("SENSOR | {}", e),
            AppEvent::PublishFailed(e) => warn!("BLE    | publish failed: {}", e),
            AppEvent::StreamingChanged(on) => {
                info!("APP    | streaming {}", if *on { "on" } else { "off" });
            }
            AppEvent::RangeChanged(range) => info!("SENSOR | range=±{}g", range.g()),
            AppEvent::CommandRejected(e) => warn!("APP    | command rejected: {}", e),
        }
    }
}
