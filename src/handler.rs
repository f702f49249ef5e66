use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use getset::Getters;
use job_executor_job::{Job, JobTable};
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::errors::JobHandlerError;

/// What a handler gets to see of the job it runs.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct JobContext {
    job: Arc<Job>,
    /// The table the job was acquired from
    table: JobTable,
    lock_owner: Arc<str>,
}

impl JobContext {
    pub(crate) fn new(job: Arc<Job>, table: JobTable, lock_owner: Arc<str>) -> Self {
        Self {
            job,
            table,
            lock_owner,
        }
    }
}

/// A handler whose parameters are the job's `handler_configuration`.
///
/// # Example
///
/// ```
/// use job_executor::{JobContext, JobHandler, JobHandlerError};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct SendMail {
///     to: String,
/// }
///
/// impl JobHandler for SendMail {
///     const HANDLER_TYPE: &'static str = "send-mail";
///
///     async fn run(self, _ctx: JobContext) -> Result<(), JobHandlerError> {
///         if self.to.is_empty() {
///             return Err("no recipient".into());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait JobHandler: DeserializeOwned + Send + 'static {
    const HANDLER_TYPE: &'static str;

    fn run(self, ctx: JobContext) -> impl Future<Output = Result<(), JobHandlerError>> + Send;
}

pub(crate) type HandlerFn =
    Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), JobHandlerError>> + Send + Sync>;

/// Handlers keyed by handler type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure. A later registration for the same type replaces the earlier one.
    pub fn register_fn<F, Fut>(&mut self, handler_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobHandlerError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |ctx| handler(ctx).boxed());
        self.handlers.insert(handler_type.into(), handler);
        self
    }

    pub fn define_handler<T: JobHandler>(&mut self) -> &mut Self {
        self.register_fn(T::HANDLER_TYPE, |ctx: JobContext| async move {
            let configuration = ctx
                .job()
                .handler_configuration()
                .clone()
                .unwrap_or(serde_json::Value::Null);
            let handler: T = serde_json::from_value(configuration)?;
            handler.run(ctx).await
        })
    }

    pub fn contains(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    /// Runs the handler registered for the job's type on its own task, so a panicking
    /// handler fails the job instead of the worker.
    pub(crate) async fn run(&self, ctx: JobContext) -> Result<(), JobHandlerError> {
        let Some(handler) = self.handlers.get(ctx.job().handler_type()).cloned() else {
            return Err(JobHandlerError::new(format!(
                "no handler registered for handler type '{}'",
                ctx.job().handler_type()
            )));
        };

        match tokio::spawn(handler(ctx).in_current_span()).await {
            Ok(result) => result,
            Err(join_error) => Err(JobHandlerError::new("job handler panicked")
                .with_details(join_error.to_string())),
        }
    }
}
