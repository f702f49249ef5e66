//! Lifecycle events of the job executor and the registry dispatching them.

mod context;
mod event;
mod events;
mod plugin;
mod registry;
mod result;

use std::any::{Any, TypeId};
use std::collections::HashMap;

use futures::future::BoxFuture;

pub use context::*;
pub use event::Event;
pub use events::*;
pub use plugin::Plugin;
pub use registry::HookRegistry;
pub use result::*;

pub(crate) type BoxedHandler<Ctx, Out> = Box<dyn Fn(Ctx) -> BoxFuture<'static, Out> + Send + Sync>;

/// Handler lists keyed by event type. Each slot holds a `Vec<BoxedHandler<E::Context, E::Output>>`
/// for the event `E` whose `TypeId` keys it.
#[derive(Default)]
pub(crate) struct EventHandlers {
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventHandlers {
    pub(crate) fn of<E: Event>(&self) -> &[BoxedHandler<E::Context, E::Output>] {
        self.slots
            .get(&TypeId::of::<E>())
            .and_then(|slot| slot.downcast_ref::<Vec<BoxedHandler<E::Context, E::Output>>>())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn push<E: Event>(&mut self, handler: BoxedHandler<E::Context, E::Output>) {
        let slot = self
            .slots
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<BoxedHandler<E::Context, E::Output>>::new()));
        if let Some(handlers) = slot.downcast_mut::<Vec<BoxedHandler<E::Context, E::Output>>>() {
            handlers.push(handler);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
