//! Daily send quota tracking.
//!
//! A [`Quota`] caps how many messages a job may send per UTC day. The counters
//! live inside the job record; callers serialize access per job (the registry
//! holds each job behind a mutex), which makes `reserve_and_record`
//! linearizable for that job.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Daily send counters for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum sends per quota window.
    pub daily_limit: u32,
    /// Sends recorded since the current window started.
    pub daily_sent_count: u32,
    /// Sends recorded over the lifetime of the job.
    pub total_sent_count: u64,
    /// Start of the current quota window (00:00 UTC).
    pub window_start: DateTime<Utc>,
}

impl Quota {
    /// Create a fresh quota whose window contains `now`.
    pub fn new(daily_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            daily_limit,
            daily_sent_count: 0,
            total_sent_count: 0,
            window_start: window_boundary(now),
        }
    }

    /// Whether the counters satisfy the quota invariants.
    pub fn is_consistent(&self) -> bool {
        self.daily_limit > 0
            && self.daily_sent_count <= self.daily_limit
            && self.total_sent_count >= u64::from(self.daily_sent_count)
    }

    /// Remaining sends in the current window.
    ///
    /// Fails closed: inconsistent counters report no budget.
    pub fn remaining(&self) -> u32 {
        if !self.is_consistent() {
            return 0;
        }
        self.daily_limit - self.daily_sent_count
    }

    /// Reserve one send, incrementing both counters.
    ///
    /// Returns `false` without touching the counters when no budget remains.
    pub fn reserve_and_record(&mut self) -> bool {
        if self.remaining() == 0 {
            return false;
        }
        self.daily_sent_count += 1;
        self.total_sent_count += 1;
        true
    }

    /// Give back a reservation whose delivery did not go through.
    pub fn release(&mut self) {
        self.daily_sent_count = self.daily_sent_count.saturating_sub(1);
        self.total_sent_count = self.total_sent_count.saturating_sub(1);
    }

    /// Reset the daily counter when `now` lies in a later window than the
    /// stored one. Returns `true` if a reset happened.
    pub fn reset_if_new_window(&mut self, now: DateTime<Utc>) -> bool {
        let boundary = window_boundary(now);
        if boundary <= self.window_start {
            return false;
        }
        self.daily_sent_count = 0;
        self.window_start = boundary;
        true
    }

    /// Change the daily limit. Sends already recorded in this window still
    /// count; when they exceed the new limit the daily counter is capped at it,
    /// leaving no budget until the next window.
    pub fn set_daily_limit(&mut self, limit: u32) {
        self.daily_limit = limit;
        self.daily_sent_count = self.daily_sent_count.min(limit);
    }
}

/// Start of the UTC day containing `now`.
pub fn window_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
