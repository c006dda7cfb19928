//! Outbound application events.
//!
//! Emitted through the [`EventSink`](super::ports::EventSink) port by the
//! [`CommandInbox`](super::service::CommandInbox) and the
//! [`TelemetryApp`](super::service::TelemetryApp).

use crate::bus::BusError;
use crate::error::Error;
use crate::gatt::{GattError, PublishOutcome, ServiceEvent};
use crate::sensors::accel::{AccelRange, AccelSample};

use super::commands::CommandError;

/// Structured events emitted by the telemetry core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppEvent<'a> {
    /// The sensor answered and was configured.
    SensorReady(AccelRange),

    /// A service reported a connection, subscription or command event.
    Service {
        service: &'static str,
        event: ServiceEvent<'a>,
    },

    /// One sample was read and handed to the publisher.
    Sample {
        sample: AccelSample,
        outcome: PublishOutcome,
    },

    /// A bus transaction failed; the next poll tick retries.
    BusFault(BusError),

    /// The sensor or driver reported a non-bus error.
    SensorFault(Error),

    /// Publishing a sample failed.
    PublishFailed(GattError),

    /// Streaming was paused (`false`) or resumed (`true`).
    StreamingChanged(bool),

    /// The measurement range changed.
    RangeChanged(AccelRange),

    /// A command payload could not be decoded.
    CommandRejected(CommandError),
}
