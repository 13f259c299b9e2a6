use super::{
    block::{self, Line},
    event::{EvictedBlock, Event},
    Outcome, RequestStatus, ReservationFailure,
};
use crate::{
    address, config,
    mem_fetch::{self, MemFetch},
    mshr::{self, MSHR},
};
use std::collections::{HashMap, VecDeque};

/// Write-back L2 data cache slice of a sub partition.
///
/// Writes allocate without fetching the line, reads that miss reserve
/// a line and are forwarded to DRAM.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct DataL2 {
    /// Global sub partition id
    pub id: usize,
    config: config::L2Cache,
    lines: Vec<Line>,
    mshrs: mshr::Table<MemFetch>,
    /// Forwarded misses by uid
    pending_fills: HashMap<u64, address>,
    ready: VecDeque<MemFetch>,
    data_port_free: bool,
    fill_port_free: bool,
    stats: stats::Cache,
}

impl DataL2 {
    #[must_use]
    pub fn new(id: usize, config: config::L2Cache) -> Self {
        let num_lines = config.num_sets * config.associativity;
        Self {
            id,
            lines: vec![Line::default(); num_lines],
            mshrs: mshr::Table::new(config.mshr_entries, config.mshr_max_merge),
            pending_fills: HashMap::new(),
            ready: VecDeque::new(),
            data_port_free: true,
            fill_port_free: true,
            stats: stats::Cache::default(),
            config,
        }
    }

    #[must_use]
    pub fn block_addr(&self, addr: address) -> address {
        addr & !(u64::from(self.config.line_size) - 1)
    }

    fn set_index(&self, block_addr: address) -> usize {
        ((block_addr / u64::from(self.config.line_size)) % self.config.num_sets as u64) as usize
    }

    fn set(&self, block_addr: address) -> std::ops::Range<usize> {
        let start = self.set_index(block_addr) * self.config.associativity;
        start..start + self.config.associativity
    }

    fn probe(&self, block_addr: address) -> Option<usize> {
        self.set(block_addr)
            .find(|&way| self.lines[way].holds(block_addr))
    }

    /// Invalid line first, then the least recently used line that is not reserved.
    fn victim(&self, block_addr: address) -> Option<usize> {
        let set = self.set(block_addr);
        if let Some(way) = set.clone().find(|&way| self.lines[way].is_invalid()) {
            return Some(way);
        }
        set.filter(|&way| !self.lines[way].is_reserved())
            .min_by_key(|&way| self.lines[way].last_access_time)
    }

    fn evict(&mut self, way: usize, events: &mut Vec<Event>) {
        let line = &mut self.lines[way];
        if line.is_modified() {
            events.push(Event::WriteBackRequestSent {
                evicted_block: EvictedBlock {
                    block_addr: line.block_addr,
                    size: self.config.line_size,
                },
            });
            self.stats.num_writebacks += 1;
        }
        line.invalidate();
    }

    fn record(&mut self, fetch: &MemFetch, outcome: &Outcome) {
        self.stats.inc(fetch.access_kind(), outcome.status().into());
        if let Outcome::Retry(failure, _) = outcome {
            self.stats.inc_failure((*failure).into());
        }
    }

    fn access_write(&mut self, fetch: MemFetch, events: &mut Vec<Event>, time: u64) -> Outcome {
        let block_addr = self.block_addr(fetch.addr());
        match self.probe(block_addr) {
            Some(way) if self.lines[way].is_reserved() => {
                // a read of this line is in flight
                Outcome::Retry(ReservationFailure::MSHR_MERGE_ENTRY_FAIL, fetch)
            }
            Some(way) => {
                let line = &mut self.lines[way];
                line.status = block::Status::MODIFIED;
                line.last_access_time = time;
                Outcome::Done(RequestStatus::HIT, fetch)
            }
            None => {
                let Some(way) = self.victim(block_addr) else {
                    return Outcome::Retry(ReservationFailure::LINE_ALLOC_FAIL, fetch);
                };
                self.evict(way, events);
                self.lines[way].allocate(block_addr, block::Status::MODIFIED, time);
                Outcome::Done(RequestStatus::MISS, fetch)
            }
        }
    }

    fn access_read(&mut self, fetch: MemFetch, events: &mut Vec<Event>, time: u64) -> Outcome {
        let block_addr = self.block_addr(fetch.addr());
        match self.probe(block_addr) {
            Some(way) if self.lines[way].is_reserved() => {
                if self.mshrs.full(block_addr) {
                    return Outcome::Retry(ReservationFailure::MSHR_MERGE_ENTRY_FAIL, fetch);
                }
                self.mshrs.merge(block_addr, fetch);
                Outcome::Merged
            }
            Some(way) => {
                self.lines[way].last_access_time = time;
                Outcome::Done(RequestStatus::HIT, fetch)
            }
            None => {
                if self.mshrs.full(block_addr) {
                    return Outcome::Retry(ReservationFailure::MSHR_ENTRY_FAIL, fetch);
                }
                let Some(way) = self.victim(block_addr) else {
                    return Outcome::Retry(ReservationFailure::LINE_ALLOC_FAIL, fetch);
                };
                self.evict(way, events);
                self.lines[way].allocate(block_addr, block::Status::RESERVED, time);
                self.mshrs.allocate(block_addr);
                self.pending_fills.insert(fetch.uid, block_addr);
                events.push(Event::ReadRequestSent);
                Outcome::Forward(fetch)
            }
        }
    }
}

impl super::Component for DataL2 {
    fn cycle(&mut self) {
        self.data_port_free = true;
        self.fill_port_free = true;
    }
}

impl super::Bandwidth for DataL2 {
    fn has_free_data_port(&self) -> bool {
        self.data_port_free
    }

    fn has_free_fill_port(&self) -> bool {
        self.fill_port_free
    }
}

impl super::Cache for DataL2 {
    fn stats(&self) -> &stats::Cache {
        &self.stats
    }

    fn access(&mut self, fetch: MemFetch, events: &mut Vec<Event>, time: u64) -> Outcome {
        assert!(
            !fetch.is_migration(),
            "{fetch}: migration requests bypass the l2"
        );
        self.data_port_free = false;
        let uid = fetch.uid;
        let kind = fetch.access_kind();
        let outcome = if fetch.is_write() {
            self.access_write(fetch, events, time)
        } else {
            self.access_read(fetch, events, time)
        };
        match &outcome {
            Outcome::Done(_, fetch) | Outcome::Forward(fetch) | Outcome::Retry(_, fetch) => {
                self.record(fetch, &outcome);
            }
            Outcome::Merged => {
                self.stats.inc(kind, RequestStatus::MSHR_HIT.into());
            }
        }
        log::trace!(
            "l2[{}]: access uid={} {:?} => {:?}",
            self.id,
            uid,
            kind,
            outcome.status()
        );
        outcome
    }

    fn has_ready_accesses(&self) -> bool {
        !self.ready.is_empty()
    }

    fn next_access(&mut self) -> Option<MemFetch> {
        self.ready.pop_front()
    }

    fn fill(&mut self, mut fetch: MemFetch, time: u64) {
        let Some(block_addr) = self.pending_fills.remove(&fetch.uid) else {
            panic!("l2[{}]: fill of {fetch} that was never forwarded", self.id);
        };
        self.fill_port_free = false;
        self.stats.num_fills += 1;
        let Some(way) = self.probe(block_addr) else {
            panic!("l2[{}]: reserved line of {fetch} got lost", self.id);
        };
        self.lines[way].fill(time);

        fetch.set_status(mem_fetch::Status::IN_PARTITION_L2_FILL_QUEUE, time);
        self.ready.push_back(fetch);
        for mut merged in self.mshrs.remove(block_addr).into_iter().flatten() {
            merged.set_status(mem_fetch::Status::IN_PARTITION_L2_FILL_QUEUE, time);
            self.ready.push_back(merged);
        }
    }

    fn waiting_for_fill(&self, fetch: &MemFetch) -> bool {
        self.pending_fills.contains_key(&fetch.uid)
    }

    fn flush_page(
        &mut self,
        page: address,
        page_size: u64,
        max_writebacks: usize,
        events: &mut Vec<Event>,
    ) -> bool {
        let line_size = u64::from(self.config.line_size);
        let mut writebacks = 0;
        let mut clean = true;
        let lines = (0..page_size).step_by(line_size as usize).map(|offset| page + offset);
        for block_addr in lines {
            if self.mshrs.get(block_addr).is_some() {
                clean = false;
                continue;
            }
            let Some(way) = self.probe(block_addr) else {
                continue;
            };
            let status = self.lines[way].status;
            match status {
                block::Status::RESERVED => clean = false,
                block::Status::MODIFIED if writebacks >= max_writebacks => clean = false,
                block::Status::MODIFIED => {
                    writebacks += 1;
                    self.stats.num_flushed_lines += 1;
                    self.evict(way, events);
                }
                block::Status::VALID => {
                    self.stats.num_flushed_lines += 1;
                    self.lines[way].invalidate();
                }
                block::Status::INVALID => {}
            }
        }
        clean
    }

    fn num_pending_fills(&self) -> usize {
        self.pending_fills.len()
    }
}

#[cfg(test)]
mod tests {
    use super::DataL2;
    use crate::cache::{event, Bandwidth, Cache, Component, Outcome, RequestStatus};
    use crate::{config, mcu, mem_fetch};

    fn l2() -> DataL2 {
        DataL2::new(
            0,
            config::L2Cache {
                num_sets: 2,
                associativity: 2,
                line_size: 128,
                mshr_entries: 2,
                mshr_max_merge: 1,
            },
        )
    }

    fn access(kind: mem_fetch::access::Kind, addr: u64) -> mem_fetch::MemFetch {
        mem_fetch::tests::fetch(kind, addr, mcu::PhysicalAddress::default())
    }

    #[test]
    fn read_miss_then_fill_then_hit() {
        let mut cache = l2();
        let mut events = vec![];
        let outcome = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_R, 0x100), &mut events, 1);
        assert!(!cache.has_free_data_port());
        let Outcome::Forward(miss) = outcome else {
            panic!("expected a miss, got {outcome:?}");
        };
        assert!(event::was_read_sent(&events));
        assert!(cache.waiting_for_fill(&miss));

        cache.cycle();
        let merged = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_R, 0x140), &mut events, 2);
        assert!(matches!(merged, Outcome::Merged));
        // the merge limit is reached
        let retry = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_R, 0x120), &mut events, 3);
        assert_eq!(retry.status(), RequestStatus::RESERVATION_FAIL);

        cache.fill(miss, 10);
        assert_eq!(cache.num_pending_fills(), 0);
        let ready: Vec<_> = std::iter::from_fn(|| cache.next_access())
            .map(|fetch| fetch.addr())
            .collect();
        assert_eq!(ready, vec![0x100, 0x140]);

        let hit = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_R, 0x110), &mut events, 11);
        assert_eq!(hit.status(), RequestStatus::HIT);
        assert_eq!(cache.stats().total().mshr_hits, 1);
    }

    #[test]
    fn dirty_eviction_writes_back() {
        let mut cache = l2();
        let mut events = vec![];
        // blocks 0x000, 0x100 and 0x200 share set 0 of two ways
        for (time, addr) in [0x000, 0x100].into_iter().enumerate() {
            let outcome = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_W, addr), &mut events, time as u64);
            assert!(matches!(outcome, Outcome::Done(RequestStatus::MISS, _)));
        }
        assert!(events.is_empty());
        let outcome = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_W, 0x200), &mut events, 5);
        assert!(matches!(outcome, Outcome::Done(..)));
        let evicted = event::was_writeback_sent(&events).expect("writeback");
        assert_eq!(evicted.block_addr, 0x000);
        assert_eq!(evicted.size, 128);
    }

    #[test]
    fn flush_last_page_of_address_space() {
        let mut cache = DataL2::new(0, config::L2Cache::default());
        let mut events = vec![];
        let last_line = u64::MAX & !0x7f;
        let _ = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_W, last_line), &mut events, 0);
        events.clear();
        assert!(cache.flush_page(u64::MAX & !0xfff, 4096, usize::MAX, &mut events));
        let evicted = event::was_writeback_sent(&events).expect("writeback");
        assert_eq!(evicted.block_addr, last_line);
    }

    #[test]
    fn flush_page_drops_all_lines() {
        let mut cache = DataL2::new(0, config::L2Cache::default());
        let mut events = vec![];
        for addr in [0x1000, 0x1080, 0x1100] {
            let _ = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_W, addr), &mut events, 0);
        }
        let Outcome::Forward(miss) = cache.access(access(mem_fetch::access::Kind::GLOBAL_ACC_R, 0x1800), &mut events, 1) else {
            panic!("expected a miss");
        };
        // two writebacks per call, a pending fill blocks the flush
        assert!(!cache.flush_page(0x1000, 4096, 2, &mut events));
        assert_eq!(events.len(), 3);
        assert!(!cache.flush_page(0x1000, 4096, 2, &mut events));
        assert_eq!(events.len(), 4);
        cache.fill(miss, 2);
        while cache.next_access().is_some() {}
        assert!(cache.flush_page(0x1000, 4096, 2, &mut events));
        // untouched pages are clean
        assert!(cache.flush_page(0x8000, 4096, 0, &mut events));
    }
}
