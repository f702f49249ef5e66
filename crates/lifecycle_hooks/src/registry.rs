use std::future::Future;

use futures::future::BoxFuture;

use crate::context::BeforeJobInsertContext;
use crate::event::Event;
use crate::events::{BeforeJobInsert, Emittable};
use crate::plugin::Plugin;
use crate::result::JobInsertResult;
use crate::{BoxedHandler, EventHandlers};

/// Dispatches executor and job events to registered handlers.
///
/// Observer handlers are fire-and-forget: they return nothing and cannot fail the caller.
/// `BeforeJobInsert` handlers run in registration order, each seeing the job produced by
/// the previous one, and the first rejection wins.
#[derive(Default)]
pub struct HookRegistry {
    handlers: EventHandlers,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<E, F, Fut>(&mut self, _event: E, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(E::Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = E::Output> + Send + 'static,
    {
        let boxed: BoxedHandler<E::Context, E::Output> =
            Box::new(move |ctx| -> BoxFuture<'static, E::Output> { Box::pin(handler(ctx)) });
        self.handlers.push::<E>(boxed);
        self
    }

    pub fn with_plugin<P: Plugin>(mut self, plugin: P) -> Self {
        plugin.register(&mut self);
        self
    }

    pub fn register_plugin<P: Plugin>(&mut self, plugin: P) -> &mut Self {
        plugin.register(self);
        self
    }

    pub fn has_handlers<E: Event>(&self) -> bool {
        !self.handlers.of::<E>().is_empty()
    }

    #[doc(hidden)]
    pub async fn emit<C: Emittable>(&self, ctx: C) {
        ctx.emit_to(&self.handlers).await
    }

    pub async fn intercept_job_insert(&self, ctx: BeforeJobInsertContext) -> JobInsertResult {
        let table = ctx.table;
        let mut job = ctx.job;
        for handler in self.handlers.of::<BeforeJobInsert>() {
            match handler(BeforeJobInsertContext { job, table }).await {
                JobInsertResult::Continue(next) => job = next,
                rejected @ JobInsertResult::Reject(_) => return rejected,
            }
        }
        JobInsertResult::Continue(job)
    }
}
