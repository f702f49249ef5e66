#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use job_executor::{
    AcquireJobsLifecycleListener, AsyncExecutor, AsyncExecutorOptions, Job, JobExecutorError,
    JobTable, MemoryJobStore, MockClock,
};
use tokio::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub struct TestExecutor {
    pub executor: AsyncExecutor<MemoryJobStore>,
    pub store: MemoryJobStore,
    pub clock: Arc<MockClock>,
}

impl TestExecutor {
    pub async fn count(&self, table: JobTable) -> usize {
        self.store.snapshot(table).await.len()
    }

    pub async fn total_rows(&self) -> usize {
        let mut total = 0;
        for table in JobTable::ALL {
            total += self.count(table).await;
        }
        total
    }
}

/// Builds an executor over a fresh in-memory store, with the clock frozen at [`epoch`].
pub fn test_executor(
    options: impl FnOnce(AsyncExecutorOptions) -> AsyncExecutorOptions,
) -> TestExecutor {
    test_executor_with_store(MemoryJobStore::new(), options)
}

pub fn test_executor_with_store(
    store: MemoryJobStore,
    options: impl FnOnce(AsyncExecutorOptions) -> AsyncExecutorOptions,
) -> TestExecutor {
    let clock = Arc::new(MockClock::new(epoch()));
    let executor = options(
        AsyncExecutorOptions::default()
            .lock_owner("test-node")
            .clock(clock.clone()),
    )
    .build(store.clone())
    .expect("valid executor options");

    TestExecutor {
        executor,
        store,
        clock,
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn ids(jobs: &[Job]) -> Vec<uuid::Uuid> {
    jobs.iter().map(|job| *job.id()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerCall {
    StartAcquiring(usize),
    Acquired {
        acquired: usize,
        max: usize,
        remaining: usize,
    },
    Rejected {
        rejected: usize,
        acquired: usize,
    },
    OptimisticLocking,
    StartWaiting(u64),
    StopAcquiring,
}

/// Lifecycle listener remembering every call, in order.
#[derive(Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<ListenerCall>>,
}

impl RecordingListener {
    pub fn calls(&self) -> Vec<ListenerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rejected_total(&self) -> usize {
        self.calls()
            .iter()
            .map(|call| match call {
                ListenerCall::Rejected { rejected, .. } => *rejected,
                _ => 0,
            })
            .sum()
    }

    fn record(&self, call: ListenerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl AcquireJobsLifecycleListener for RecordingListener {
    fn start_acquiring(&self, max_jobs: usize) {
        self.record(ListenerCall::StartAcquiring(max_jobs));
    }

    fn acquired_jobs(&self, acquired: usize, max_jobs: usize, remaining_capacity: usize) {
        self.record(ListenerCall::Acquired {
            acquired,
            max: max_jobs,
            remaining: remaining_capacity,
        });
    }

    fn rejected_jobs(
        &self,
        rejected: usize,
        acquired: usize,
        _max_jobs: usize,
        _remaining_capacity: usize,
    ) {
        self.record(ListenerCall::Rejected { rejected, acquired });
    }

    fn optimistic_locking_exception(&self, _max_jobs: usize, _error: &JobExecutorError) {
        self.record(ListenerCall::OptimisticLocking);
    }

    fn start_waiting(&self, millis: u64) {
        self.record(ListenerCall::StartWaiting(millis));
    }

    fn stop_acquiring(&self) {
        self.record(ListenerCall::StopAcquiring);
    }
}
