use super::mem::AccessKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(
    Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum RequestStatus {
    HIT = 0,
    MISS,
    MSHR_HIT,
    RESERVATION_FAIL,
}

#[derive(
    Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ReservationFailure {
    /// all lines of the set are reserved
    LINE_ALLOC_FAIL = 0,
    /// the queue towards DRAM is full
    MISS_QUEUE_FULL,
    MSHR_ENTRY_FAIL,
    MSHR_MERGE_ENTRY_FAIL,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub hits: u64,
    pub misses: u64,
    pub mshr_hits: u64,
    pub reservation_fails: u64,
}

impl std::ops::AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.mshr_hits += other.mshr_hits;
        self.reservation_fails += other.reservation_fails;
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    pub accesses: BTreeMap<AccessKind, Counts>,
    pub reservation_failures: BTreeMap<ReservationFailure, u64>,
    pub num_fills: u64,
    pub num_writebacks: u64,
    /// Lines dropped while flushing pages for migration
    pub num_flushed_lines: u64,
}

impl std::ops::AddAssign for Cache {
    fn add_assign(&mut self, other: Self) {
        for (kind, counts) in other.accesses {
            *self.accesses.entry(kind).or_default() += counts;
        }
        for (failure, count) in other.reservation_failures {
            *self.reservation_failures.entry(failure).or_insert(0) += count;
        }
        self.num_fills += other.num_fills;
        self.num_writebacks += other.num_writebacks;
        self.num_flushed_lines += other.num_flushed_lines;
    }
}

impl Cache {
    #[inline]
    pub fn inc(&mut self, kind: impl Into<AccessKind>, status: RequestStatus) {
        let counts = self.accesses.entry(kind.into()).or_default();
        match status {
            RequestStatus::HIT => counts.hits += 1,
            RequestStatus::MISS => counts.misses += 1,
            RequestStatus::MSHR_HIT => counts.mshr_hits += 1,
            RequestStatus::RESERVATION_FAIL => counts.reservation_fails += 1,
        }
    }

    pub fn inc_failure(&mut self, failure: ReservationFailure) {
        *self.reservation_failures.entry(failure).or_insert(0) += 1;
    }

    #[must_use]
    pub fn total(&self) -> Counts {
        let mut total = Counts::default();
        for counts in self.accesses.values() {
            total += *counts;
        }
        total
    }

    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        let accesses = total.hits + total.misses + total.mshr_hits;
        if accesses == 0 {
            return 0.0;
        }
        total.hits as f64 / accesses as f64
    }
}

#[cfg(test)]
mod tests {
    use super::{Cache, RequestStatus};
    use crate::mem::AccessKind;

    #[test]
    fn hit_rate_ignores_reservation_fails() {
        let mut stats = Cache::default();
        stats.inc(AccessKind::GLOBAL_ACC_R, RequestStatus::HIT);
        stats.inc(AccessKind::GLOBAL_ACC_W, RequestStatus::MISS);
        stats.inc(AccessKind::GLOBAL_ACC_R, RequestStatus::RESERVATION_FAIL);
        assert_eq!(stats.total().reservation_fails, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);

        let mut sum = Cache::default();
        sum += stats.clone();
        sum += stats;
        assert_eq!(sum.total().hits, 2);
    }
}
