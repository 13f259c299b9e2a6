use super::Request;
use crate::config;
use std::collections::VecDeque;

/// Selection of the next request each bank services.
pub trait Policy: std::fmt::Debug {
    /// Whether another request can be buffered.
    fn can_accept(&self) -> bool;

    fn enqueue(&mut self, request: Request);

    /// The request `bank` would service next.
    fn peek_next(&self, bank: usize, open_row: Option<u64>) -> Option<&Request>;

    /// Remove the request `bank` services next.
    fn dequeue(&mut self, bank: usize, open_row: Option<u64>) -> Option<Request>;

    fn num_pending(&self) -> usize;

    /// Buffered requests in no particular order.
    fn pending(&self) -> Box<dyn Iterator<Item = &Request> + '_>;
}

/// Strict arrival order.
///
/// Only the oldest request is visible, a busy bank blocks all others.
#[derive(Debug, Default)]
pub struct Fifo {
    head: Option<Request>,
}

impl Policy for Fifo {
    fn can_accept(&self) -> bool {
        self.head.is_none()
    }

    fn enqueue(&mut self, request: Request) {
        assert!(self.head.is_none(), "fifo scheduler holds a single request");
        self.head = Some(request);
    }

    fn peek_next(&self, bank: usize, _open_row: Option<u64>) -> Option<&Request> {
        self.head.as_ref().filter(|request| request.bank == bank)
    }

    fn dequeue(&mut self, bank: usize, open_row: Option<u64>) -> Option<Request> {
        self.peek_next(bank, open_row)?;
        self.head.take()
    }

    fn num_pending(&self) -> usize {
        usize::from(self.head.is_some())
    }

    fn pending(&self) -> Box<dyn Iterator<Item = &Request> + '_> {
        Box::new(self.head.iter())
    }
}

/// First ready, first come first serve.
///
/// Requests hitting the row that is currently served are preferred.
/// The number of consecutive row hits that overtake the oldest request
/// of a bank is bounded by `max_promotions` (0 = unbounded).
#[derive(Debug)]
pub struct FrFcfs {
    /// Per bank requests, oldest first
    queues: Vec<VecDeque<Request>>,
    /// Row of the current streak of each bank
    last_row: Vec<Option<u64>>,
    promotions: Vec<usize>,
    max_promotions: usize,
    capacity: Option<usize>,
    num_pending: usize,
}

impl FrFcfs {
    #[must_use]
    pub fn new(num_banks: usize, capacity: Option<usize>, max_promotions: usize) -> Self {
        Self {
            queues: (0..num_banks).map(|_| VecDeque::new()).collect(),
            last_row: vec![None; num_banks],
            promotions: vec![0; num_banks],
            max_promotions,
            capacity,
            num_pending: 0,
        }
    }

    fn select(&self, bank: usize, open_row: Option<u64>) -> Option<usize> {
        let queue = &self.queues[bank];
        let oldest = queue.front()?;
        if self.max_promotions > 0 && self.promotions[bank] >= self.max_promotions {
            return Some(0);
        }
        let position_of = |row: u64| queue.iter().position(|request| request.row == row);
        let streak = self.last_row[bank].and_then(position_of);
        let hit = open_row.and_then(position_of);
        streak.or(hit).or_else(|| position_of(oldest.row))
    }
}

impl Policy for FrFcfs {
    fn can_accept(&self) -> bool {
        self.capacity
            .map_or(true, |capacity| self.num_pending < capacity)
    }

    fn enqueue(&mut self, request: Request) {
        self.num_pending += 1;
        self.queues[request.bank].push_back(request);
    }

    fn peek_next(&self, bank: usize, open_row: Option<u64>) -> Option<&Request> {
        let idx = self.select(bank, open_row)?;
        self.queues[bank].get(idx)
    }

    fn dequeue(&mut self, bank: usize, open_row: Option<u64>) -> Option<Request> {
        let idx = self.select(bank, open_row)?;
        if idx == 0 {
            self.promotions[bank] = 0;
        } else {
            self.promotions[bank] += 1;
        }
        let queue = &mut self.queues[bank];
        let request = queue.remove(idx)?;
        self.num_pending -= 1;

        let streak_continues = queue.iter().any(|pending| pending.row == request.row);
        self.last_row[bank] = streak_continues.then_some(request.row);
        Some(request)
    }

    fn num_pending(&self) -> usize {
        self.num_pending
    }

    fn pending(&self) -> Box<dyn Iterator<Item = &Request> + '_> {
        Box::new(self.queues.iter().flatten())
    }
}

#[derive(Debug)]
pub enum Scheduler {
    Fifo(Fifo),
    FrFcfs(FrFcfs),
}

impl Scheduler {
    #[must_use]
    pub fn new(config: &config::Tier) -> Self {
        match config.scheduler {
            config::DRAMSchedulerKind::FIFO => Self::Fifo(Fifo::default()),
            config::DRAMSchedulerKind::FrFcfs => {
                let capacity = match config.frfcfs_sched_queue_size {
                    0 => None,
                    size => Some(size),
                };
                Self::FrFcfs(FrFcfs::new(
                    config.timing.nbk,
                    capacity,
                    config.frfcfs_max_promotions,
                ))
            }
        }
    }

    /// Whether bank priority rotates after a request was scheduled.
    #[must_use]
    pub fn rotates_priority(&self) -> bool {
        matches!(self, Self::FrFcfs(_))
    }

    /// Whether the buffered requests count towards admission control.
    #[must_use]
    pub fn is_full(&self) -> bool {
        match self {
            Self::Fifo(_) => false,
            Self::FrFcfs(s) => !s.can_accept(),
        }
    }

    fn inner(&self) -> &dyn Policy {
        match self {
            Self::Fifo(s) => s,
            Self::FrFcfs(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Policy {
        match self {
            Self::Fifo(s) => s,
            Self::FrFcfs(s) => s,
        }
    }
}

impl Policy for Scheduler {
    fn can_accept(&self) -> bool {
        self.inner().can_accept()
    }

    fn enqueue(&mut self, request: Request) {
        self.inner_mut().enqueue(request);
    }

    fn peek_next(&self, bank: usize, open_row: Option<u64>) -> Option<&Request> {
        self.inner().peek_next(bank, open_row)
    }

    fn dequeue(&mut self, bank: usize, open_row: Option<u64>) -> Option<Request> {
        self.inner_mut().dequeue(bank, open_row)
    }

    fn num_pending(&self) -> usize {
        self.inner().num_pending()
    }

    fn pending(&self) -> Box<dyn Iterator<Item = &Request> + '_> {
        self.inner().pending()
    }
}

#[cfg(test)]
mod tests {
    use super::{Fifo, FrFcfs, Policy};
    use crate::dram::{tests::request, Request};

    fn rows(requests: impl IntoIterator<Item = Request>) -> Vec<u64> {
        requests.into_iter().map(|request| request.row).collect()
    }

    #[test]
    fn fifo_blocks_on_the_head() {
        let mut fifo = Fifo::default();
        assert!(fifo.can_accept());
        fifo.enqueue(request(1, 3));
        assert!(!fifo.can_accept());
        assert!(fifo.peek_next(0, None).is_none());
        assert!(fifo.dequeue(0, None).is_none());
        assert_eq!(fifo.dequeue(1, None).map(|r| r.row), Some(3));
        assert_eq!(fifo.num_pending(), 0);
    }

    #[test]
    fn frfcfs_prefers_open_row() {
        let mut frfcfs = FrFcfs::new(2, None, 0);
        for row in [1, 2, 1, 2] {
            frfcfs.enqueue(request(0, row));
        }
        assert_eq!(frfcfs.peek_next(0, Some(2)).map(|r| r.row), Some(2));
        let order: Vec<_> = std::iter::from_fn(|| frfcfs.dequeue(0, Some(2))).collect();
        // the streak on row 2 is served before the older row 1 requests
        assert_eq!(rows(order), vec![2, 2, 1, 1]);
        assert_eq!(frfcfs.num_pending(), 0);
    }

    #[test]
    fn frfcfs_serves_oldest_without_open_row() {
        let mut frfcfs = FrFcfs::new(1, Some(8), 0);
        for row in [5, 6, 5] {
            frfcfs.enqueue(request(0, row));
        }
        let order: Vec<_> = std::iter::from_fn(|| frfcfs.dequeue(0, None)).collect();
        assert_eq!(rows(order), vec![5, 5, 6]);
    }

    #[test]
    fn frfcfs_bounds_promotions() {
        let mut frfcfs = FrFcfs::new(1, None, 2);
        frfcfs.enqueue(request(0, 9));
        for _ in 0..4 {
            frfcfs.enqueue(request(0, 1));
        }
        let order: Vec<_> = std::iter::from_fn(|| frfcfs.dequeue(0, Some(1))).collect();
        // two row hits may overtake the oldest request before it is served
        assert_eq!(rows(order), vec![1, 1, 9, 1, 1]);
    }

    #[test]
    fn frfcfs_capacity() {
        let mut frfcfs = FrFcfs::new(4, Some(2), 0);
        frfcfs.enqueue(request(0, 0));
        assert!(frfcfs.can_accept());
        frfcfs.enqueue(request(3, 0));
        assert!(!frfcfs.can_accept());
        assert_eq!(frfcfs.pending().count(), 2);
        assert!(frfcfs.dequeue(3, None).is_some());
        assert!(frfcfs.can_accept());
    }
}
