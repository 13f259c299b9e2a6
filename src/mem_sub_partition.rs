use crate::{
    address,
    cache::{self, Bandwidth as _, Cache as _, Component as _},
    config,
    fifo::Fifo,
    mcu,
    mem_fetch::{self, MemFetch},
};
use console::style;
use std::collections::VecDeque;
use std::sync::Arc;

/// L2 slice with its queues between the interconnect and the DRAM channel.
pub struct MemorySubPartition {
    /// Global sub partition id
    pub global_id: usize,
    /// Id within the channel
    pub local_id: usize,
    /// Global channel id
    pub partition_id: usize,
    pub config: Arc<config::Tier>,
    mem_controller: Arc<mcu::MemoryControllerUnit>,

    pub interconn_to_l2_queue: Fifo<MemFetch>,
    pub l2_to_dram_queue: Fifo<MemFetch>,
    pub dram_to_l2_queue: Fifo<MemFetch>,
    /// L2 cache hit response queue
    pub l2_to_interconn_queue: Fifo<MemFetch>,
    rop_queue: VecDeque<(u64, MemFetch)>,

    pub l2_cache: Option<Box<dyn cache::Cache>>,
}

impl std::fmt::Debug for MemorySubPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubPartition")
            .field("global_id", &self.global_id)
            .field("partition_id", &self.partition_id)
            .finish()
    }
}

fn queue(size: usize) -> Fifo<MemFetch> {
    Fifo::new(Some(0), Some(size))
}

impl MemorySubPartition {
    pub fn new(
        global_id: usize,
        local_id: usize,
        partition_id: usize,
        config: Arc<config::Tier>,
        mem_controller: Arc<mcu::MemoryControllerUnit>,
    ) -> Self {
        let l2_cache: Option<Box<dyn cache::Cache>> = config
            .l2
            .clone()
            .map(|l2_config| Box::new(cache::DataL2::new(global_id, l2_config)) as Box<_>);
        Self {
            global_id,
            local_id,
            partition_id,
            interconn_to_l2_queue: queue(config.interconn_to_l2_queue_size),
            l2_to_dram_queue: queue(config.l2_to_dram_queue_size),
            dram_to_l2_queue: queue(config.dram_to_l2_queue_size),
            l2_to_interconn_queue: queue(config.l2_to_interconn_queue_size),
            rop_queue: VecDeque::new(),
            l2_cache,
            mem_controller,
            config,
        }
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.interconn_to_l2_queue.full()
    }

    pub fn push(&mut self, mut fetch: MemFetch, time: u64) {
        assert_eq!(
            fetch.sub_partition_id(),
            self.global_id,
            "address/config inconsistency: {fetch} pushed to sub partition {}",
            self.global_id
        );
        let ready_cycle = time + self.config.l2_rop_latency;
        fetch.set_status(mem_fetch::Status::IN_PARTITION_ROP_DELAY, time);
        log::debug!("{}: {fetch}", style("PUSH TO ROP").red());
        self.rop_queue.push_back((ready_cycle, fetch));
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        !self.rop_queue.is_empty()
            || !self.interconn_to_l2_queue.is_empty()
            || !self.l2_to_dram_queue.is_empty()
            || !self.dram_to_l2_queue.is_empty()
            || !self.l2_to_interconn_queue.is_empty()
            || self
                .l2_cache
                .as_ref()
                .is_some_and(|l2| l2.num_pending_fills() > 0 || l2.has_ready_accesses())
    }

    #[must_use]
    pub fn top(&self) -> Option<&MemFetch> {
        self.l2_to_interconn_queue.first()
    }

    pub fn pop(&mut self) -> Option<MemFetch> {
        self.l2_to_interconn_queue.dequeue()
    }

    #[must_use]
    pub fn stats(&self) -> Option<&stats::Cache> {
        self.l2_cache.as_ref().map(|l2| l2.stats())
    }

    /// Whether an ordinary request for `page` still waits before the L2.
    #[must_use]
    pub fn has_pending_input(&self, page: address, page_size: u64) -> bool {
        self.rop_queue
            .iter()
            .map(|(_, fetch)| fetch)
            .chain(self.interconn_to_l2_queue.iter())
            .any(|fetch| fetch.page(page_size) == page)
    }

    /// Whether a request for `page` waits to be sent to DRAM.
    #[must_use]
    pub fn has_pending_to_dram(&self, page: address, page_size: u64) -> bool {
        self.l2_to_dram_queue
            .iter()
            .any(|fetch| fetch.page(page_size) == page)
    }

    /// Evict all lines of `page` from the L2.
    ///
    /// Dirty lines are written back as long as the queue to DRAM has room.
    /// Returns `true` once the L2 holds no line of the page.
    pub fn flush_page_for_migration(&mut self, page: address, page_size: u64, time: u64) -> bool {
        let Some(l2) = self.l2_cache.as_mut() else {
            return true;
        };
        let max_writebacks = self
            .l2_to_dram_queue
            .max_size()
            .map_or(usize::MAX, |max| max.saturating_sub(self.l2_to_dram_queue.len()));
        let mut events = Vec::new();
        let clean = l2.flush_page(page, page_size, max_writebacks, &mut events);
        self.send_writebacks(&events, time);
        log::trace!(
            "sub partition {}: flush page {:#x} clean={} writebacks={}",
            self.global_id,
            page,
            clean,
            events.len()
        );
        clean
    }

    fn send_writebacks(&mut self, events: &[cache::Event], time: u64) {
        for event in events {
            let cache::Event::WriteBackRequestSent { evicted_block } = event else {
                continue;
            };
            let access = mem_fetch::access::Builder {
                kind: mem_fetch::access::Kind::L2_WRBK_ACC,
                addr: evicted_block.block_addr,
                req_size_bytes: evicted_block.size,
                source: 0,
            }
            .build();
            let physical_addr = self.mem_controller.to_physical_address(access.addr);
            let mut writeback = mem_fetch::Builder {
                access,
                physical_addr,
            }
            .build();
            assert_eq!(
                writeback.sub_partition_id(),
                self.global_id,
                "address/config inconsistency: writeback {writeback} evicted by sub partition {}",
                self.global_id
            );
            writeback.set_status(mem_fetch::Status::IN_PARTITION_L2_TO_DRAM_QUEUE, time);
            log::debug!("{}: {writeback}", style("L2 WRITEBACK").yellow());
            self.l2_to_dram_queue.enqueue(writeback);
        }
    }

    #[tracing::instrument(skip_all, fields(id = self.global_id))]
    pub fn cache_cycle(&mut self, time: u64) {
        use mem_fetch::Status;

        let log_line = style(format!(
            " => memory sub partition[{}] cache cycle {}",
            self.global_id, time
        ))
        .blue();

        // L2 fill responses
        if let Some(ref mut l2_cache) = self.l2_cache {
            let queue_full = self.l2_to_interconn_queue.full();
            log::trace!(
                "{}: l2 has ready accesses={} l2 to icnt queue full={}",
                log_line,
                l2_cache.has_ready_accesses(),
                queue_full,
            );
            if !queue_full {
                if let Some(mut fetch) = l2_cache.next_access() {
                    fetch.set_reply();
                    fetch.set_status(Status::IN_PARTITION_L2_TO_ICNT_QUEUE, time);
                    self.l2_to_interconn_queue.enqueue(fetch);
                }
            }
        }

        // DRAM to L2 fill or directly to the interconnect
        let waiting_for_fill = self.dram_to_l2_queue.first().map(|reply| {
            self.l2_cache
                .as_ref()
                .is_some_and(|l2| l2.waiting_for_fill(reply))
        });
        match waiting_for_fill {
            Some(true) => {
                if let Some(l2_cache) = self.l2_cache.as_mut() {
                    if l2_cache.has_free_fill_port() {
                        if let Some(reply) = self.dram_to_l2_queue.dequeue() {
                            log::debug!("{}: filling L2 with {}", log_line, &reply);
                            l2_cache.fill(reply, time);
                        }
                    }
                }
            }
            Some(false) if !self.l2_to_interconn_queue.full() => {
                if let Some(mut reply) = self.dram_to_l2_queue.dequeue() {
                    reply.set_status(Status::IN_PARTITION_L2_TO_ICNT_QUEUE, time);
                    log::debug!("{}: pushing {} to interconn queue", log_line, &reply);
                    self.l2_to_interconn_queue.enqueue(reply);
                }
            }
            Some(false) | None => {}
        }

        if let Some(ref mut l2_cache) = self.l2_cache {
            l2_cache.cycle();
        }

        // new L2 accesses
        if let Some(ref mut l2_cache) = self.l2_cache {
            let can_access = !self.interconn_to_l2_queue.is_empty()
                // room for the miss and the writeback of a dirty victim
                && self.l2_to_dram_queue.can_fit(2)
                && !self.l2_to_interconn_queue.full()
                && l2_cache.has_free_data_port();
            if can_access {
                if let Some(fetch) = self.interconn_to_l2_queue.dequeue() {
                    let mut events = Vec::new();
                    let outcome = l2_cache.access(fetch, &mut events, time);
                    log::debug!("{}: l2 access => {:?}", log_line, outcome.status());
                    match outcome {
                        cache::Outcome::Done(_, fetch)
                            if fetch.access_kind() == mem_fetch::access::Kind::L1_WRBK_ACC =>
                        {
                            log::trace!("{}: {} absorbed by the l2", log_line, fetch);
                        }
                        cache::Outcome::Done(_, mut fetch) => {
                            fetch.set_reply();
                            fetch.set_status(Status::IN_PARTITION_L2_TO_ICNT_QUEUE, time);
                            self.l2_to_interconn_queue.enqueue(fetch);
                        }
                        cache::Outcome::Forward(mut fetch) => {
                            fetch.set_status(Status::IN_PARTITION_L2_MISS_QUEUE, time);
                            fetch.set_status(Status::IN_PARTITION_L2_TO_DRAM_QUEUE, time);
                            self.l2_to_dram_queue.enqueue(fetch);
                        }
                        cache::Outcome::Merged => {}
                        cache::Outcome::Retry(failure, fetch) => {
                            // L2 cache lock-up: will try again next cycle
                            log::trace!("{}: {} retries after {:?}", log_line, fetch, failure);
                            self.interconn_to_l2_queue.enqueue_front(fetch);
                        }
                    }
                    self.send_writebacks(&events, time);
                }
            }
        } else if !self.l2_to_dram_queue.full() {
            if let Some(mut fetch) = self.interconn_to_l2_queue.dequeue() {
                fetch.set_status(Status::IN_PARTITION_L2_TO_DRAM_QUEUE, time);
                self.l2_to_dram_queue.enqueue(fetch);
            }
        }

        // rop delay queue
        if !self.interconn_to_l2_queue.full() {
            match self.rop_queue.front() {
                Some((ready_cycle, _)) if time >= *ready_cycle => {
                    if let Some((_, mut fetch)) = self.rop_queue.pop_front() {
                        log::debug!("{}: {fetch}", style("POP FROM ROP").red());
                        fetch.set_status(Status::IN_PARTITION_ICNT_TO_L2_QUEUE, time);
                        self.interconn_to_l2_queue.enqueue(fetch);
                    }
                }
                _ => {}
            }
        }
    }
}
