//! The value + command attribute service.
//!
//! | Characteristic | Properties   | Length            | CCCD |
//! |----------------|--------------|-------------------|------|
//! | Value          | Read, Notify | `value_max_len`   | yes  |
//! | Command        | Write        | `command_max_len` | no   |
//!
//! Each instance tracks the current connection and the client's
//! subscription to the value characteristic, and reports both, plus
//! command writes, to its [`ServiceEventHandler`].

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::dispatch::{self, AttributeRoutes};
use super::publish::{self, PublishOutcome};
use super::stack::{
    AttrHandle, BleUuid, CharHandles, CharProps, CharacteristicSpec, ConnHandle, GattStack,
    SecurityMode, StackEvent, Uuid128, UuidType,
};
use super::GattError;

// ───────────────────────────────────────────────────────────────
// Descriptors
// ───────────────────────────────────────────────────────────────

/// Vendor base shared by both sensor services.
pub const WEARLINK_UUID_BASE: Uuid128 = Uuid128([
    0x23, 0xD1, 0x13, 0xEF, 0x5F, 0x78, 0x23, 0x15, 0xDE, 0xEF, 0x12, 0x12, 0x00, 0x00, 0x00, 0x00,
]);

/// Static shape of one service instance.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub uuid_base: Uuid128,
    pub service_uuid: u16,
    pub value_uuid: u16,
    pub command_uuid: u16,
    /// Value readable before the first publish.
    pub value_init: &'static [u8],
    pub value_max_len: u16,
    pub command_max_len: u16,
    pub value_read_perm: SecurityMode,
    pub cccd_write_perm: SecurityMode,
    pub command_write_perm: SecurityMode,
}

impl ServiceDescriptor {
    fn value_spec(&self, uuid_type: UuidType) -> CharacteristicSpec<'static> {
        CharacteristicSpec {
            uuid: BleUuid { uuid_type, uuid: self.value_uuid },
            props: CharProps { read: true, write: false, notify: true },
            read_perm: self.value_read_perm,
            write_perm: SecurityMode::NoAccess,
            cccd_write_perm: Some(self.cccd_write_perm),
            initial_value: self.value_init,
            max_len: self.value_max_len,
        }
    }

    fn command_spec(&self, uuid_type: UuidType) -> CharacteristicSpec<'static> {
        const COMMAND_INIT: [u8; 1] = [0];
        CharacteristicSpec {
            uuid: BleUuid { uuid_type, uuid: self.command_uuid },
            props: CharProps { read: false, write: true, notify: false },
            read_perm: SecurityMode::NoAccess,
            write_perm: self.command_write_perm,
            cccd_write_perm: None,
            initial_value: &COMMAND_INIT,
            max_len: self.command_max_len,
        }
    }
}

/// General telemetry channel (4-byte value).
pub const TELEMETRY_SERVICE: ServiceDescriptor = ServiceDescriptor {
    name: "telemetry",
    uuid_base: WEARLINK_UUID_BASE,
    service_uuid: 0x1200,
    value_uuid: 0x1201,
    command_uuid: 0x1202,
    value_init: &[0x12, 0x34, 0x56, 0x78],
    value_max_len: 4,
    command_max_len: 1,
    value_read_perm: SecurityMode::Open,
    cccd_write_perm: SecurityMode::Open,
    command_write_perm: SecurityMode::Open,
};

/// Accelerometer channel: X, Y, Z as little-endian i16.
pub const ACCEL_SERVICE: ServiceDescriptor = ServiceDescriptor {
    name: "accel",
    uuid_base: WEARLINK_UUID_BASE,
    service_uuid: 0x1400,
    value_uuid: 0x1401,
    command_uuid: 0x1402,
    value_init: &[0; 6],
    value_max_len: 6,
    command_max_len: 2,
    value_read_perm: SecurityMode::Open,
    cccd_write_perm: SecurityMode::Open,
    command_write_perm: SecurityMode::Open,
};

// ───────────────────────────────────────────────────────────────
// Events and handler
// ───────────────────────────────────────────────────────────────

/// Application-level events derived from stack events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent<'a> {
    Connected { conn: ConnHandle },
    Disconnected { reason: u8 },
    NotificationEnabled,
    NotificationDisabled,
    /// Raw command payload, borrowed for the duration of the handler call.
    CommandReceived(&'a [u8]),
}

/// Receives the events of one service instance, synchronously and in order.
pub trait ServiceEventHandler {
    fn on_event(&mut self, service: &'static ServiceDescriptor, event: &ServiceEvent<'_>);
}

/// Whether a disconnect also drops the client's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionPolicy {
    /// Keep the subscription; a publish while disconnected reports
    /// `InvalidState`.
    Retain,
    /// Clear the subscription; the reconnecting client must re-subscribe.
    ClearOnDisconnect,
}

// ───────────────────────────────────────────────────────────────
// AttributeService
// ───────────────────────────────────────────────────────────────

/// One registered value + command service.
pub struct AttributeService<H> {
    descriptor: &'static ServiceDescriptor,
    uuid_type: UuidType,
    service_handle: AttrHandle,
    value: CharHandles,
    command: CharHandles,
    conn: Option<ConnHandle>,
    notifications: bool,
    policy: SubscriptionPolicy,
    handler: H,
}

impl<H: ServiceEventHandler> AttributeService<H> {
    /// Add the service and both characteristics to the stack.
    ///
    /// The first failing stack call aborts registration and its code is
    /// returned; the caller must treat the service as unusable.
    pub fn register<S: GattStack + ?Sized>(
        stack: &mut S,
        descriptor: &'static ServiceDescriptor,
        policy: SubscriptionPolicy,
        handler: H,
    ) -> Result<Self, GattError> {
        let result = Self::add_attributes(stack, descriptor);
        let (uuid_type, service_handle, value, command) = match result {
            Ok(handles) => handles,
            Err(e) => {
                warn!("gatt: {} service registration failed: {}", descriptor.name, e);
                return Err(e.into());
            }
        };
        info!(
            "gatt: {} service 0x{:04X} registered (value=0x{:04X} cccd={:?} command=0x{:04X})",
            descriptor.name, descriptor.service_uuid, value.value_handle, value.cccd_handle, command.value_handle,
        );
        Ok(Self {
            descriptor,
            uuid_type,
            service_handle,
            value,
            command,
            conn: None,
            notifications: false,
            policy,
            handler,
        })
    }

    fn add_attributes<S: GattStack + ?Sized>(
        stack: &mut S,
        descriptor: &'static ServiceDescriptor,
    ) -> Result<(UuidType, AttrHandle, CharHandles, CharHandles), super::StackError> {
        let uuid_type = stack.uuid_base_add(&descriptor.uuid_base)?;
        let service_handle = stack.service_add(BleUuid { uuid_type, uuid: descriptor.service_uuid })?;
        let value = stack.characteristic_add(service_handle, &descriptor.value_spec(uuid_type))?;
        let command = stack.characteristic_add(service_handle, &descriptor.command_spec(uuid_type))?;
        Ok((uuid_type, service_handle, value, command))
    }

    /// Apply one stack event: update connection / subscription state and
    /// forward the resulting domain event to the handler. Events that do not
    /// concern this service are ignored.
    pub fn handle_stack_event(&mut self, event: &StackEvent<'_>) {
        let Some(domain) = dispatch::decode(&self.routes(), event) else {
            return;
        };

        match domain {
            ServiceEvent::Connected { conn } => {
                if let Some(old) = self.conn.replace(conn) {
                    warn!("gatt: {} connect while connected ({:?} replaced)", self.descriptor.name, old);
                }
            }
            ServiceEvent::Disconnected { .. } => {
                self.conn = None;
                if self.policy == SubscriptionPolicy::ClearOnDisconnect {
                    self.notifications = false;
                }
            }
            ServiceEvent::NotificationEnabled => self.notifications = true,
            ServiceEvent::NotificationDisabled => self.notifications = false,
            ServiceEvent::CommandReceived(data) => {
                debug!("gatt: {} command ({} bytes)", self.descriptor.name, data.len());
            }
        }

        self.handler.on_event(self.descriptor, &domain);
    }

    /// Store `value` and notify a subscribed client.
    pub fn publish<S: GattStack + ?Sized>(&self, stack: &mut S, value: &[u8]) -> Result<PublishOutcome, GattError> {
        publish::publish_value(stack, Some(self), value)
    }
}

impl<H> AttributeService<H> {
    fn routes(&self) -> AttributeRoutes {
        AttributeRoutes {
            command_handle: self.command.value_handle,
            cccd_handle: self.value.cccd_handle,
        }
    }

    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        self.descriptor
    }

    pub fn uuid_type(&self) -> UuidType {
        self.uuid_type
    }

    pub fn service_handle(&self) -> AttrHandle {
        self.service_handle
    }

    pub fn value_handles(&self) -> CharHandles {
        self.value
    }

    pub fn command_handles(&self) -> CharHandles {
        self.command
    }

    /// Active connection, `None` when no client is connected.
    pub fn connection(&self) -> Option<ConnHandle> {
        self.conn
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications
    }

    pub fn policy(&self) -> SubscriptionPolicy {
        self.policy
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}
