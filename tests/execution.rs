use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use job_executor::lifecycle_hooks::JobComplete;
use job_executor::{
    ExecutionOutcome, Job, JobContext, JobExecutionObservation, JobExecutionObservationProvider,
    JobHandler, JobHandlerError, JobTable, NewJob, ObservationScope,
};
use serde::Deserialize;
use tokio::sync::watch;

use crate::helpers::{enable_logs, epoch, test_executor, wait_until, RecordingListener};

mod helpers;

fn fast_polling(options: job_executor::AsyncExecutorOptions) -> job_executor::AsyncExecutorOptions {
    options
        .default_async_job_acquire_wait_time(Duration::from_millis(20))
        .default_timer_job_acquire_wait_time(Duration::from_millis(20))
        .default_queue_size_full_wait_time(Duration::from_millis(20))
}

#[tokio::test]
async fn saturated_pool_requeues_instead_of_failing() {
    enable_logs().await;
    let (gate, gate_rx) = watch::channel(false);
    let completed = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(RecordingListener::default());

    let test = test_executor(|options| {
        let completed = completed.clone();
        fast_polling(options)
            .core_pool_size(1)
            .max_pool_size(1)
            .thread_pool_queue_size(1)
            .max_async_jobs_due_per_acquisition(3)
            .rejected_job_requeue_wait_time(Duration::from_secs(1))
            .async_jobs_due_lifecycle_listener(listener.clone())
            .register_fn("blocking", move |_ctx: JobContext| {
                let mut gate = gate_rx.clone();
                let completed = completed.clone();
                async move {
                    if gate.wait_for(|open| *open).await.is_err() {
                        return Err(JobHandlerError::new("gate dropped"));
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
    });

    let job_manager = test.executor.job_manager();
    let mut scheduled = Vec::new();
    for _ in 0..3 {
        scheduled.push(
            job_manager
                .schedule_async_job(NewJob::builder().handler_type("blocking").retries(1).build())
                .await
                .unwrap(),
        );
    }

    test.executor.start().await;

    let t = &test;
    let done_count = &completed;
    let recorded = &listener;
    let requeued = wait_until(Duration::from_secs(5), move || async move {
        t.count(JobTable::Timer).await == 1 && recorded.rejected_total() == 1
    })
    .await;
    assert!(requeued, "the third job should be requeued as a timer");
    assert_eq!(listener.rejected_total(), 1);

    let timer = &test.store.snapshot(JobTable::Timer).await[0];
    assert_eq!(timer.correlation_id(), scheduled[2].correlation_id());
    assert_eq!(timer.due_date(), &Some(epoch() + ChronoDuration::seconds(1)));
    // A rejection is not a failure
    assert_eq!(timer.retries(), &1);
    assert!(!timer.is_locked());

    gate.send_replace(true);
    let drained = wait_until(Duration::from_secs(5), move || async move {
        done_count.load(Ordering::SeqCst) == 2
    })
    .await;
    assert!(drained);

    test.clock.advance(ChronoDuration::seconds(2));
    let all_done = wait_until(Duration::from_secs(5), move || async move {
        done_count.load(Ordering::SeqCst) == 3 && t.total_rows().await == 0
    })
    .await;
    assert!(all_done);
    assert_eq!(listener.rejected_total(), 1);

    test.executor.shutdown().await.unwrap();
    assert!(!test.executor.is_active());
}

#[tokio::test]
async fn exhausted_retries_end_in_the_dead_letter_table() {
    let test = test_executor(|options| {
        options.register_fn("failing", |_ctx| async {
            Err::<(), _>(JobHandlerError::new("boom").with_details("at step 3"))
        })
    });
    let job_manager = test.executor.job_manager();
    let original = job_manager
        .schedule_async_job(NewJob::builder().handler_type("failing").retries(3).build())
        .await
        .unwrap();

    let mut job = original.clone();
    let mut expected_backoff = [10, 20].into_iter();
    let dead = loop {
        match job_manager
            .execute(JobTable::Executable, job.clone())
            .await
            .unwrap()
        {
            ExecutionOutcome::Retried {
                table,
                job: timer,
                error,
            } => {
                assert_eq!(table, JobTable::Timer);
                assert_eq!(error.message(), "boom");
                let backoff = expected_backoff.next().expect("at most two retries");
                assert_eq!(
                    timer.due_date(),
                    &Some(epoch() + ChronoDuration::seconds(backoff))
                );
                assert_eq!(timer.exception_message(), &Some("boom".to_string()));
                assert_eq!(test.count(JobTable::Executable).await, 0);
                job = job_manager
                    .move_timer_to_executable(*timer.id())
                    .await
                    .unwrap();
            }
            ExecutionOutcome::DeadLettered { job: dead, .. } => break dead,
            ExecutionOutcome::Completed => panic!("failing handler completed"),
        }
    };
    assert!(expected_backoff.next().is_none());

    assert_eq!(test.count(JobTable::DeadLetter).await, 1);
    assert_eq!(test.total_rows().await, 1);
    assert_eq!(dead.correlation_id(), original.correlation_id());
    assert_eq!(dead.retries(), &0);
    assert!(!dead.is_locked());
    assert_eq!(dead.exception_message(), &Some("boom".to_string()));
    assert_eq!(dead.exception_stacktrace(), &Some("at step 3".to_string()));

    job_manager.delete_dead_letter_job(*dead.id()).await.unwrap();
    assert_eq!(test.total_rows().await, 0);
}

#[tokio::test]
async fn backoff_grows_with_each_failure_of_a_long_lived_job() {
    let test = test_executor(|options| {
        options
            .default_retries(3)
            .register_fn("flaky", |_ctx| async {
                Err::<(), _>(JobHandlerError::new("flaky"))
            })
    });
    let job_manager = test.executor.job_manager();
    let mut job = job_manager
        .schedule_async_job(NewJob::builder().handler_type("flaky").retries(10).build())
        .await
        .unwrap();

    for (attempt, backoff) in [(1, 10), (2, 20), (3, 40), (4, 80)] {
        let ExecutionOutcome::Retried { job: timer, .. } = job_manager
            .execute(JobTable::Executable, job.clone())
            .await
            .unwrap()
        else {
            panic!("a job with retries left should be retried");
        };
        assert_eq!(timer.attempts(), &attempt);
        assert_eq!(timer.retries(), &(10 - attempt));
        assert_eq!(
            timer.due_date(),
            &Some(epoch() + ChronoDuration::seconds(backoff))
        );
        job = job_manager
            .move_timer_to_executable(*timer.id())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn revived_dead_letter_job_gets_fresh_retries() {
    let test = test_executor(|options| {
        options.register_fn("failing", |_ctx| async {
            Err::<(), _>(JobHandlerError::new("nope"))
        })
    });
    let job_manager = test.executor.job_manager();
    let job = job_manager
        .schedule_async_job(NewJob::builder().handler_type("failing").retries(1).build())
        .await
        .unwrap();

    let ExecutionOutcome::DeadLettered { job: dead, .. } =
        job_manager.execute(JobTable::Executable, job).await.unwrap()
    else {
        panic!("a single retry should dead-letter immediately");
    };

    let revived = job_manager
        .move_dead_letter_job_to_executable(*dead.id(), 5)
        .await
        .unwrap();
    assert_eq!(revived.retries(), &5);
    assert_eq!(revived.exception_message(), &None);
    assert_eq!(revived.correlation_id(), dead.correlation_id());
    assert_eq!(test.count(JobTable::DeadLetter).await, 0);
    assert_eq!(test.count(JobTable::Executable).await, 1);
}

async fn explode(_ctx: JobContext) -> Result<(), JobHandlerError> {
    panic!("handler exploded")
}

#[tokio::test]
async fn panicking_handler_fails_the_job_not_the_worker() {
    let test = test_executor(|options| options.register_fn("panicking", explode));
    let job_manager = test.executor.job_manager();
    let job = job_manager
        .schedule_async_job(NewJob::builder().handler_type("panicking").retries(2).build())
        .await
        .unwrap();

    let outcome = job_manager.execute(JobTable::Executable, job).await.unwrap();
    let error = outcome.handler_error().expect("the job failed");
    assert_eq!(error.message(), "job handler panicked");
    assert!(matches!(outcome, ExecutionOutcome::Retried { .. }));
    assert_eq!(test.count(JobTable::Timer).await, 1);
}

#[tokio::test]
async fn panicking_observer_leaves_the_pool_usable() {
    enable_logs().await;
    let completed = Arc::new(AtomicUsize::new(0));
    let panicked = Arc::new(AtomicBool::new(false));

    let test = test_executor(|options| {
        let completed = completed.clone();
        let panicked = panicked.clone();
        fast_polling(options)
            .core_pool_size(1)
            .max_pool_size(1)
            .thread_pool_queue_size(5)
            .register_fn("ok", move |_ctx| {
                let completed = completed.clone();
                async move {
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), JobHandlerError>(())
                }
            })
            .on(JobComplete, move |_ctx| {
                let panicked = panicked.clone();
                async move {
                    if !panicked.swap(true, Ordering::SeqCst) {
                        panic!("observer bug");
                    }
                }
            })
    });
    let job_manager = test.executor.job_manager();
    job_manager
        .schedule_async_job(NewJob::new("ok"))
        .await
        .unwrap();

    test.executor.start().await;

    let t = &test;
    let done_count = &completed;
    let first = wait_until(Duration::from_secs(5), move || async move {
        done_count.load(Ordering::SeqCst) == 1 && t.total_rows().await == 0
    })
    .await;
    assert!(first);
    assert!(panicked.load(Ordering::SeqCst));

    for _ in 0..2 {
        job_manager
            .schedule_async_job(NewJob::new("ok"))
            .await
            .unwrap();
    }
    let rest = wait_until(Duration::from_secs(5), move || async move {
        done_count.load(Ordering::SeqCst) == 3 && t.total_rows().await == 0
    })
    .await;
    assert!(rest, "jobs after the panicking observer should still run");
    assert_eq!(test.executor.remaining_capacity(), 5);

    test.executor.shutdown().await.unwrap();
}

#[derive(Deserialize)]
struct Greet {
    name: String,
}

static GREETED: Mutex<Vec<String>> = Mutex::new(Vec::new());

impl JobHandler for Greet {
    const HANDLER_TYPE: &'static str = "greet";

    async fn run(self, ctx: JobContext) -> Result<(), JobHandlerError> {
        assert_eq!(ctx.table(), &JobTable::Executable);
        GREETED.lock().unwrap().push(self.name);
        Ok(())
    }
}

#[tokio::test]
async fn started_executor_runs_typed_handlers() {
    let test = test_executor(|options| fast_polling(options).define_handler::<Greet>());
    let job_manager = test.executor.job_manager();
    job_manager
        .schedule_async_job(
            NewJob::builder()
                .handler_type("greet")
                .handler_configuration(serde_json::json!({ "name": "Ada" }))
                .build(),
        )
        .await
        .unwrap();

    test.executor.start().await;
    // Starting twice is a no-op
    test.executor.start().await;

    let t = &test;
    let done = wait_until(Duration::from_secs(5), move || async move {
        t.total_rows().await == 0
    })
    .await;
    assert!(done);
    assert_eq!(GREETED.lock().unwrap().as_slice(), ["Ada".to_string()]);

    test.executor.shutdown().await.unwrap();
    // Shutting down twice is a no-op
    test.executor.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_releases_locks_held_by_this_node() {
    let test = test_executor(|options| options);
    let job_manager = test.executor.job_manager();
    let job = job_manager
        .schedule_async_job(NewJob::new("never-dispatched"))
        .await
        .unwrap();
    job_manager
        .bulk_lock_jobs(JobTable::Executable, &[*job.id()], Duration::from_secs(60))
        .await
        .unwrap();

    test.executor.start().await;
    test.executor.shutdown().await.unwrap();

    let job = job_manager
        .find_job(JobTable::Executable, *job.id())
        .await
        .unwrap()
        .unwrap();
    assert!(!job.is_locked());
}

#[derive(Default)]
struct RecordingObservationProvider {
    events: Arc<Mutex<Vec<String>>>,
}

struct RecordingObservation {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingObservation {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn scope(&self, name: &'static str) -> ObservationScope {
        self.record(format!("{name} open"));
        let events = self.events.clone();
        ObservationScope::on_close(move || events.lock().unwrap().push(format!("{name} close")))
    }
}

impl JobExecutionObservation for RecordingObservation {
    fn start(&self) {
        self.record("start");
    }

    fn stop(&self) {
        self.record("stop");
    }

    fn lock_scope(&self) -> ObservationScope {
        self.scope("lock")
    }

    fn lock_error(&self, error: &(dyn std::error::Error + 'static)) {
        self.record(format!("lock error: {error}"));
    }

    fn execution_scope(&self) -> ObservationScope {
        self.scope("execution")
    }

    fn execution_error(&self, error: &(dyn std::error::Error + 'static)) {
        self.record(format!("execution error: {error}"));
    }
}

impl JobExecutionObservationProvider for RecordingObservationProvider {
    fn create(&self, _job: &Job) -> Box<dyn JobExecutionObservation> {
        Box::new(RecordingObservation {
            events: self.events.clone(),
        })
    }
}

#[tokio::test]
async fn observation_scopes_wrap_lock_and_execution() {
    let provider = Arc::new(RecordingObservationProvider::default());
    let events = provider.events.clone();
    let test = test_executor(|options| {
        fast_polling(options)
            .observation_provider(provider)
            .register_fn("failing", |_ctx| async {
                Err::<(), _>(JobHandlerError::new("kaput"))
            })
    });
    test.executor
        .job_manager()
        .schedule_async_job(NewJob::builder().handler_type("failing").retries(2).build())
        .await
        .unwrap();

    test.executor.start().await;
    let recorded = &events;
    let observed = wait_until(Duration::from_secs(5), move || async move {
        recorded.lock().unwrap().last().map(String::as_str) == Some("stop")
    })
    .await;
    test.executor.shutdown().await.unwrap();
    assert!(observed);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        [
            "start",
            "lock open",
            "lock close",
            "execution open",
            "execution error: kaput",
            "execution close",
            "stop",
        ]
    );
}
