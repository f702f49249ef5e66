//! Per-job instrumentation of the lock and execution phases.

use std::error::Error;

use job_executor_job::Job;

/// Closes an observation phase when dropped, whichever way the phase ends.
#[must_use = "the scope closes as soon as it is dropped"]
pub struct ObservationScope {
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ObservationScope {
    pub fn noop() -> Self {
        Self { on_close: None }
    }

    pub fn on_close(close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_close: Some(Box::new(close)),
        }
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

/// Observation of one job execution. Only ever a side channel: nothing it does can change
/// the job's fate.
pub trait JobExecutionObservation: Send {
    fn start(&self);

    fn stop(&self);

    /// From acquisition until the lock is confirmed.
    fn lock_scope(&self) -> ObservationScope;

    fn lock_error(&self, error: &(dyn Error + 'static));

    /// Around the handler invocation.
    fn execution_scope(&self) -> ObservationScope;

    fn execution_error(&self, error: &(dyn Error + 'static));
}

pub trait JobExecutionObservationProvider: Send + Sync {
    fn create(&self, job: &Job) -> Box<dyn JobExecutionObservation>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObservationProvider;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObservation;

impl JobExecutionObservation for NoopObservation {
    fn start(&self) {}

    fn stop(&self) {}

    fn lock_scope(&self) -> ObservationScope {
        ObservationScope::noop()
    }

    fn lock_error(&self, _error: &(dyn Error + 'static)) {}

    fn execution_scope(&self) -> ObservationScope {
        ObservationScope::noop()
    }

    fn execution_error(&self, _error: &(dyn Error + 'static)) {}
}

impl JobExecutionObservationProvider for NoopObservationProvider {
    fn create(&self, _job: &Job) -> Box<dyn JobExecutionObservation> {
        // Boxing a zero-sized type does not allocate.
        Box::new(NoopObservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn scope_closes_on_drop() {
        let closed = Arc::new(AtomicBool::new(false));
        {
            let closed = closed.clone();
            let _scope = ObservationScope::on_close(move || closed.store(true, Ordering::SeqCst));
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn noop_observation_is_zero_sized() {
        assert_eq!(std::mem::size_of::<NoopObservation>(), 0);
        assert_eq!(std::mem::size_of::<NoopObservationProvider>(), 0);
    }
}
