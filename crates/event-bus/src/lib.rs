//! A simple typed event bus for decoupling the relay node's long-running
//! tasks from each other. Built on [`flume`] channels keyed by
//! [`std::any::TypeId`], so any `Clone + 'static` event type can be
//! registered, sent to, and subscribed from without a central enum of
//! every possible message.
mod event_bus;

pub use crate::event_bus::{BusEvent, Error, EventBus};
use std::any::TypeId;

mod macros;
mod receiver;

pub use crate::receiver::Receiver;

pub use event_bus_macros::Event;

/// Wraps retrieving [`std::any::TypeId`] for type T.
///
/// Use [`typeid`] macros for vec
pub fn tid<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}
