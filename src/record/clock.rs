//! Timestamp sources for `updated_at`
//!
//! `updated_at` doubles as the conflict token the ledger compares, so every
//! stamp handed out by a clock must be strictly later than the previous one.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of monotonically increasing mutation timestamps.
pub trait Clock: Send + Sync {
    /// A stamp strictly later than any stamp this clock returned before.
    fn now(&self) -> DateTime<Utc>;

    /// A stamp strictly later than both `floor` and any earlier stamp.
    fn now_after(&self, floor: DateTime<Utc>) -> DateTime<Utc>;
}

fn tick() -> Duration {
    Duration::milliseconds(1)
}

/// Wall-clock time, nudged forward when the system clock stalls or steps back.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut stamp = Utc::now();
        for bound in [*last, floor].into_iter().flatten() {
            if stamp <= bound {
                stamp = bound + tick();
            }
        }
        *last = Some(stamp);
        stamp
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        self.issue(None)
    }

    fn now_after(&self, floor: DateTime<Utc>) -> DateTime<Utc> {
        self.issue(Some(floor))
    }
}

/// Deterministic clock for tests and simulations; advances 1ms per stamp.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward without issuing a stamp.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }

    /// The next stamp `now()` would issue.
    pub fn peek(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stamp = *current;
        *current = stamp + tick();
        stamp
    }

    fn now_after(&self, floor: DateTime<Utc>) -> DateTime<Utc> {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *current <= floor {
            *current = floor + tick();
        }
        let stamp = *current;
        *current = stamp + tick();
        stamp
    }
}
