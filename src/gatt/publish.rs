//! Value publishing.

use log::debug;

use super::GattError;
use super::service::AttributeService;
use super::stack::{ConnHandle, GattStack, HvxKind, HvxParams};

/// What a successful publish did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Value stored for reads; no client subscribed.
    Stored,
    /// Value stored and a notification queued.
    Notified,
}

/// Store `value` as the service's current value and, when the client has
/// subscribed, notify it.
///
/// The value is always written first (at offset 0, on the current
/// connection or the "no connection" handle), so later reads see it even if
/// notifying fails. A subscribed service without a connection reports
/// [`GattError::InvalidState`] after storing.
pub fn publish_value<S, H>(
    stack: &mut S,
    service: Option<&AttributeService<H>>,
    value: &[u8],
) -> Result<PublishOutcome, GattError>
where
    S: GattStack + ?Sized,
{
    let service = service.ok_or(GattError::NullService)?;
    let handle = service.value_handles().value_handle;
    let conn = service.connection().unwrap_or(ConnHandle::INVALID);

    stack.value_set(conn, handle, 0, value)?;

    if !service.notifications_enabled() {
        return Ok(PublishOutcome::Stored);
    }
    let Some(conn) = service.connection() else {
        debug!("gatt: {} subscribed but disconnected", service.descriptor().name);
        return Err(GattError::InvalidState);
    };

    stack.notify(
        conn,
        &HvxParams { handle, kind: HvxKind::Notification, offset: 0, data: value },
    )?;
    Ok(PublishOutcome::Notified)
}
