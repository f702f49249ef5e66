use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde_json::Value;
use uuid::Uuid;

/// A request to schedule a job. Everything but the handler type is optional.
#[derive(Getters, Debug, Default, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), default, pattern = "owned")]
pub struct NewJob {
    #[builder(setter(into))]
    pub(crate) handler_type: String,

    #[builder(setter(strip_option))]
    pub(crate) handler_configuration: Option<Value>,

    #[builder(setter(into, strip_option))]
    pub(crate) custom_values: Option<String>,

    /// For timers, when the job becomes executable
    #[builder(setter(strip_option))]
    pub(crate) due_date: Option<DateTime<Utc>>,

    /// Falls back to the configured default retries
    #[builder(setter(strip_option))]
    pub(crate) retries: Option<i32>,

    #[builder(setter(into, strip_option))]
    pub(crate) tenant_id: Option<String>,

    #[builder(setter(into, strip_option))]
    pub(crate) category: Option<String>,

    /// Reuse an existing logical identity instead of minting one
    #[builder(setter(strip_option))]
    pub(crate) correlation_id: Option<Uuid>,
}

impl NewJob {
    pub fn new(handler_type: impl Into<String>) -> Self {
        Self {
            handler_type: handler_type.into(),
            ..Default::default()
        }
    }

    pub fn builder() -> NewJobBuilder {
        NewJobBuilder::new()
    }
}

impl NewJobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> NewJob {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fully_populated_request() {
        let now = Utc::now();
        let new_job = NewJob::builder()
            .handler_type("async-continuation")
            .handler_configuration(serde_json::json!({ "activity": "task1" }))
            .custom_values("trace=1")
            .due_date(now)
            .retries(5)
            .tenant_id("acme")
            .category("billing")
            .build();

        assert_eq!(new_job.handler_type(), "async-continuation");
        assert_eq!(new_job.due_date(), &Some(now));
        assert_eq!(new_job.retries(), &Some(5));
        assert_eq!(new_job.tenant_id(), &Some("acme".to_string()));
        assert_eq!(new_job.category(), &Some("billing".to_string()));
        assert_eq!(new_job.custom_values(), &Some("trace=1".to_string()));
    }

    #[test]
    fn should_build_unset_new_job_without_panic() {
        let _ = NewJobBuilder::new().build();
    }
}
