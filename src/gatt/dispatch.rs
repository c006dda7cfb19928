//! Stack event fan-out and decoding.
//!
//! The stack delivers every event to every registered observer; each
//! service decides for itself whether an event concerns it. [`decode`] is
//! the pure half of that decision and is what the fuzz target exercises.

use super::service::ServiceEvent;
use super::stack::{AttrHandle, StackEvent};

/// Attribute handles a service reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeRoutes {
    pub command_handle: AttrHandle,
    pub cccd_handle: Option<AttrHandle>,
}

/// CCCD value bit that enables notifications.
const CCCD_NOTIFY: u16 = 0x0001;

/// Map one stack event to the domain event it means for a service with
/// `routes`, or `None` when the event does not concern it.
///
/// A CCCD write is honoured only when exactly two bytes are written.
pub fn decode<'a>(routes: &AttributeRoutes, event: &StackEvent<'a>) -> Option<ServiceEvent<'a>> {
    match *event {
        StackEvent::Connected { conn } => Some(ServiceEvent::Connected { conn }),
        StackEvent::Disconnected { reason, .. } => Some(ServiceEvent::Disconnected { reason }),
        StackEvent::Write(w) => {
            if Some(w.handle) == routes.cccd_handle {
                let bytes: [u8; 2] = w.data.try_into().ok()?;
                if u16::from_le_bytes(bytes) & CCCD_NOTIFY != 0 {
                    Some(ServiceEvent::NotificationEnabled)
                } else {
                    Some(ServiceEvent::NotificationDisabled)
                }
            } else if w.handle == routes.command_handle {
                Some(ServiceEvent::CommandReceived(w.data))
            } else {
                None
            }
        }
        StackEvent::HvnTxComplete { .. } | StackEvent::Other { .. } => None,
    }
}

/// Anything that consumes raw stack events.
pub trait StackObserver {
    fn on_stack_event(&mut self, event: &StackEvent<'_>);
}

impl<H: super::ServiceEventHandler> StackObserver for super::AttributeService<H> {
    fn on_stack_event(&mut self, event: &StackEvent<'_>) {
        self.handle_stack_event(event);
    }
}

/// Deliver `event` to every observer, in registration order.
pub fn dispatch(event: &StackEvent<'_>, observers: &mut [&mut dyn StackObserver]) {
    for observer in observers.iter_mut() {
        observer.on_stack_event(event);
    }
}
