//! Dispatch counters and their serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::handle::TaskResult;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, result: &TaskResult) {
        match result {
            Ok(_) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Occupancy of one bounded pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub capacity: usize,
    /// Running plus queued tasks.
    pub in_flight: usize,
}

/// Point-in-time dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub cooperative_in_flight: usize,
    pub thread_pool: PoolStats,
    pub process_pool: Option<PoolStats>,
}

impl DispatcherStats {
    pub(crate) fn from_counters(
        counters: &Counters,
        cooperative_in_flight: usize,
        thread_pool: PoolStats,
        process_pool: Option<PoolStats>,
    ) -> Self {
        Self {
            submitted: counters.submitted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            cooperative_in_flight,
            thread_pool,
            process_pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        counters.record_submitted();
        counters.record_submitted();
        counters.record_rejected();
        counters.record_outcome(&Ok(serde_json::Value::Null));
        counters.record_outcome(&Err(DispatchError::task_failure("x")));
        counters.record_cancelled();

        let pool = PoolStats {
            size: 2,
            capacity: 4,
            in_flight: 0,
        };
        let stats = DispatcherStats::from_counters(&counters, 0, pool, None);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["thread_pool"]["capacity"], 4);
        assert!(json["process_pool"].is_null());
    }
}
