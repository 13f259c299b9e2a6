pub mod block;
pub mod event;
pub mod l2;

pub use event::Event;
pub use l2::DataL2;

use crate::{address, mem_fetch::MemFetch};

#[derive(Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq)]
pub enum RequestStatus {
    HIT = 0,
    MISS,
    MSHR_HIT,
    RESERVATION_FAIL,
}

impl From<RequestStatus> for stats::cache::RequestStatus {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::HIT => Self::HIT,
            RequestStatus::MISS => Self::MISS,
            RequestStatus::MSHR_HIT => Self::MSHR_HIT,
            RequestStatus::RESERVATION_FAIL => Self::RESERVATION_FAIL,
        }
    }
}

#[derive(Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ReservationFailure {
    /// all lines of the set are reserved
    LINE_ALLOC_FAIL = 0,
    /// the queue towards DRAM is full
    MISS_QUEUE_FULL,
    MSHR_ENTRY_FAIL,
    MSHR_MERGE_ENTRY_FAIL,
}

impl From<ReservationFailure> for stats::cache::ReservationFailure {
    fn from(failure: ReservationFailure) -> Self {
        match failure {
            ReservationFailure::LINE_ALLOC_FAIL => Self::LINE_ALLOC_FAIL,
            ReservationFailure::MISS_QUEUE_FULL => Self::MISS_QUEUE_FULL,
            ReservationFailure::MSHR_ENTRY_FAIL => Self::MSHR_ENTRY_FAIL,
            ReservationFailure::MSHR_MERGE_ENTRY_FAIL => Self::MSHR_MERGE_ENTRY_FAIL,
        }
    }
}

/// Result of a cache access.
///
/// The fetch is moved back to the caller unless the cache keeps it.
#[derive(Debug)]
pub enum Outcome {
    /// Served by the cache, the fetch can be replied to
    Done(RequestStatus, MemFetch),
    /// A miss that must be sent to DRAM, its fill is awaited
    Forward(MemFetch),
    /// Merged into an outstanding miss
    Merged,
    /// Not accepted, retry later
    Retry(ReservationFailure, MemFetch),
}

impl Outcome {
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Done(status, _) => *status,
            Self::Forward(_) => RequestStatus::MISS,
            Self::Merged => RequestStatus::MSHR_HIT,
            Self::Retry(..) => RequestStatus::RESERVATION_FAIL,
        }
    }
}

pub trait Component {
    fn cycle(&mut self);
}

pub trait Bandwidth {
    fn has_free_data_port(&self) -> bool;

    fn has_free_fill_port(&self) -> bool;
}

pub trait Cache: std::fmt::Debug + Send + Sync + Component + Bandwidth + 'static {
    fn stats(&self) -> &stats::Cache;

    fn access(&mut self, fetch: MemFetch, events: &mut Vec<Event>, time: u64) -> Outcome;

    fn has_ready_accesses(&self) -> bool;

    fn next_access(&mut self) -> Option<MemFetch>;

    /// Fill the line a forwarded miss was waiting for.
    fn fill(&mut self, fetch: MemFetch, time: u64);

    #[must_use]
    fn waiting_for_fill(&self, fetch: &MemFetch) -> bool;

    /// Drop all lines of a page, writing back at most `max_writebacks` dirty lines.
    ///
    /// Returns `true` once no line of the page is cached or pending.
    fn flush_page(
        &mut self,
        page: address,
        page_size: u64,
        max_writebacks: usize,
        events: &mut Vec<Event>,
    ) -> bool;

    /// Number of forwarded misses awaiting their fill.
    #[must_use]
    fn num_pending_fills(&self) -> usize;
}
