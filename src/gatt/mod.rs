//! BLE attribute services.
//!
//! One generic service shape is instantiated once per sensor channel from a
//! [`ServiceDescriptor`]: a read/notify value characteristic plus a
//! write-only command characteristic, both under a vendor 128-bit base.
//!
//! ```text
//!  GattStack ──StackEvent──▶ dispatch ──▶ AttributeService ──ServiceEvent──▶ handler
//!      ▲                                        │
//!      └──────── value_set / notify ◀── publish ┘
//! ```

pub mod dispatch;
pub mod publish;
pub mod service;
pub mod stack;

use core::fmt;

pub use dispatch::{StackObserver, dispatch};
pub use publish::{PublishOutcome, publish_value};
pub use service::{
    ACCEL_SERVICE, AttributeService, ServiceDescriptor, ServiceEvent, ServiceEventHandler,
    SubscriptionPolicy, TELEMETRY_SERVICE,
};
pub use stack::{ConnHandle, GattStack, StackError, StackEvent};

/// Errors from service registration and publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattError {
    /// Publish was called without a service instance.
    NullService,
    /// Notifications are enabled but no client is connected.
    InvalidState,
    /// The stack rejected a call; its code is passed through.
    Stack(StackError),
}

impl fmt::Display for GattError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullService => write!(f, "no service instance"),
            Self::InvalidState => write!(f, "notifications enabled but not connected"),
            Self::Stack(e) => write!(f, "stack: {e}"),
        }
    }
}

impl From<StackError> for GattError {
    fn from(e: StackError) -> Self {
        Self::Stack(e)
    }
}
