use job_executor_job::Job;

/// Outcome of a `BeforeJobInsert` interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInsertResult {
    /// Insert the (possibly rewritten) job
    Continue(Job),
    /// Abort the insert and the unit of work scheduling it
    Reject(String),
}
