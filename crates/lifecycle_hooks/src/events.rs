#![allow(private_interfaces)]

use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::{
    BeforeJobInsertContext, ExecutorShutdownContext, ExecutorStartContext,
    ExpiredLocksResetContext, JobCompleteContext, JobDeadLetteredContext, JobFailContext,
    JobRejectedContext, JobScheduledContext, JobStartContext, JobsUnacquiredContext,
    TimerPromotedContext,
};
use crate::event::Event;
use crate::result::JobInsertResult;
use crate::EventHandlers;

/// A context that can be broadcast to the observers of its event.
#[doc(hidden)]
pub trait Emittable: Clone + Send + 'static {
    #[doc(hidden)]
    fn emit_to(self, handlers: &EventHandlers) -> BoxFuture<'_, ()>;
}

macro_rules! observer_event {
    ($event:ident, $context:ty) => {
        pub struct $event;

        impl Event for $event {
            type Context = $context;
            type Output = ();
        }

        impl Emittable for $context {
            fn emit_to(self, handlers: &EventHandlers) -> BoxFuture<'_, ()> {
                Box::pin(async move {
                    let pending = handlers.of::<$event>().iter().map(|h| {
                        let ctx = self.clone();
                        AssertUnwindSafe(async move { h(ctx).await }).catch_unwind()
                    });
                    for outcome in futures::future::join_all(pending).await {
                        if let Err(panic) = outcome {
                            tracing::error!(
                                event = stringify!($event),
                                panic = crate::panic_message(panic.as_ref()),
                                "Lifecycle hook panicked"
                            );
                        }
                    }
                })
            }
        }
    };
}

observer_event!(ExecutorStart, ExecutorStartContext);
observer_event!(ExecutorShutdown, ExecutorShutdownContext);
observer_event!(JobScheduled, JobScheduledContext);
observer_event!(TimerPromoted, TimerPromotedContext);
observer_event!(JobStart, JobStartContext);
observer_event!(JobComplete, JobCompleteContext);
observer_event!(JobFail, JobFailContext);
observer_event!(JobDeadLettered, JobDeadLetteredContext);
observer_event!(JobRejected, JobRejectedContext);
observer_event!(ExpiredLocksReset, ExpiredLocksResetContext);
observer_event!(JobsUnacquired, JobsUnacquiredContext);

/// Runs before a job is written. Interceptors may rewrite the job or veto the insert.
pub struct BeforeJobInsert;

impl Event for BeforeJobInsert {
    type Context = BeforeJobInsertContext;
    type Output = JobInsertResult;
}
