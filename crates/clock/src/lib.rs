use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Source of "now" for every due-date and lock-expiration comparison.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// A clock that only moves when told to.
    #[derive(Debug)]
    pub struct MockClock {
        current_time: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        pub fn new(initial_time: DateTime<Utc>) -> Self {
            Self {
                current_time: Mutex::new(initial_time),
            }
        }

        pub fn set(&self, time: DateTime<Utc>) {
            *self.lock() = time;
        }

        pub fn advance(&self, duration: Duration) {
            let mut time = self.lock();
            *time += duration;
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
            self.current_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Utc::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.lock()
        }
    }
}
