use crate::{
    address, arbitration, config, dram, mcu,
    mem_fetch::{self, MemFetch},
    mem_sub_partition::MemorySubPartition,
};
use console::style;
use std::collections::VecDeque;
use std::sync::Arc;

/// A request handed from the L2 to the DRAM channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedAccess {
    pub addr: address,
    pub kind: mem_fetch::access::Kind,
    pub tier: usize,
}

/// A DRAM channel and the sub partitions sharing it.
pub struct MemoryPartitionUnit {
    /// Global channel id
    pub id: usize,
    pub tier: usize,
    pub config: Arc<config::Tier>,
    pub dram: dram::DRAM,

    pub sub_partitions: Box<[MemorySubPartition]>,

    pub dram_latency_queue: VecDeque<(u64, MemFetch)>,
    pub arbiter: Box<dyn arbitration::Arbiter>,
}

impl std::fmt::Debug for MemoryPartitionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPartitionUnit")
            .field("id", &self.id)
            .field("tier", &self.tier)
            .finish()
    }
}

impl MemoryPartitionUnit {
    /// Create channel `local_id` of the tier decoded by `mem_controller`.
    pub fn new(
        local_id: usize,
        config: Arc<config::Tier>,
        mem_controller: Arc<mcu::MemoryControllerUnit>,
    ) -> Self {
        let tier = mem_controller.tier;
        let id = mem_controller.channel_offset + local_id;
        let num_sub_partitions = config.num_sub_partitions_per_channel;
        let sub_partitions: Box<[_]> = (0..num_sub_partitions)
            .map(|local_sub_id| {
                let global_sub_id = mem_controller.sub_partition_offset
                    + local_id * num_sub_partitions
                    + local_sub_id;
                MemorySubPartition::new(
                    global_sub_id,
                    local_sub_id,
                    id,
                    Arc::clone(&config),
                    Arc::clone(&mem_controller),
                )
            })
            .collect();

        let dram = dram::DRAM::new(id, tier, &config);
        let arb_config = arbitration::Config::from(&*config);
        let arbiter = Box::new(arbitration::ArbitrationUnit::new(&arb_config));
        Self {
            id,
            tier,
            config,
            dram,
            dram_latency_queue: VecDeque::new(),
            arbiter,
            sub_partitions,
        }
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        self.sub_partitions.iter().any(MemorySubPartition::busy)
            || !self.dram_latency_queue.is_empty()
            || !self.dram.is_idle()
    }

    #[must_use]
    fn global_sub_partition_id_to_local_id(&self, global_sub_partition_id: usize) -> usize {
        let first = self.sub_partitions[0].global_id;
        let local_id = global_sub_partition_id
            .checked_sub(first)
            .filter(|&local_id| local_id < self.sub_partitions.len());
        match local_id {
            Some(local_id) => local_id,
            None => panic!(
                "address/config inconsistency: sub partition {global_sub_partition_id} is not served by channel {}",
                self.id
            ),
        }
    }

    #[must_use]
    pub fn sub_partition(&self, global_sub_partition_id: usize) -> &MemorySubPartition {
        &self.sub_partitions[self.global_sub_partition_id_to_local_id(global_sub_partition_id)]
    }

    pub fn sub_partition_mut(&mut self, global_sub_partition_id: usize) -> &mut MemorySubPartition {
        let local_id = self.global_sub_partition_id_to_local_id(global_sub_partition_id);
        &mut self.sub_partitions[local_id]
    }

    /// Whether sub partition `local_id` may send its next request to DRAM.
    #[must_use]
    pub fn can_issue_to_channel(&self, local_id: usize) -> bool {
        !self.sub_partitions[local_id].l2_to_dram_queue.is_empty()
            && !self.dram.full()
            && self.arbiter.has_credits(local_id)
    }

    /// Push a migration request directly into the DRAM channel.
    ///
    /// Migration requests bypass the L2 and the credit arbitration.
    /// The fetch is handed back if the channel is full.
    pub fn push_migration(&mut self, fetch: MemFetch, time: u64) -> Result<(), MemFetch> {
        debug_assert!(fetch.is_migration());
        if self.dram.full() {
            return Err(fetch);
        }
        self.dram.push(fetch, time);
        Ok(())
    }

    /// Whether an ordinary request for `page` waits between the L2 and the banks.
    #[must_use]
    pub fn has_pending_to_dram(&self, page: address, page_size: u64) -> bool {
        self.sub_partitions
            .iter()
            .any(|sub| sub.has_pending_to_dram(page, page_size))
            || self
                .dram_latency_queue
                .iter()
                .any(|(_, fetch)| fetch.page(page_size) == page)
    }

    pub fn stats(&self) -> stats::DRAM {
        self.dram.stats.clone()
    }

    /// Advance the channel by one DRAM cycle.
    ///
    /// Finished migration requests are moved into `migrations`.
    /// Returns the request that left the L2 in this cycle.
    #[tracing::instrument(skip_all, fields(id = self.id))]
    pub fn dram_cycle(&mut self, time: u64, migrations: &mut Vec<MemFetch>) -> Option<IssuedAccess> {
        log::debug!("{} ...", style(format!("dram cycle[{}]", self.id)).red());

        // pop completed memory request from dram and push it to the dram-to-L2 queue
        // of the original sub partition
        if let Some(returned) = self.dram.return_queue_top() {
            let dest_sub_id = self.global_sub_partition_id_to_local_id(returned.sub_partition_id());
            let sub = &mut self.sub_partitions[dest_sub_id];
            if sub.dram_to_l2_queue.full() {
                log::trace!("dram[{}]: dram to l2 queue of {} full", self.id, sub.global_id);
            } else if let Some(mut returned) = self.dram.return_queue_pop() {
                debug_assert!(returned.is_reply());
                returned.set_status(mem_fetch::Status::IN_PARTITION_DRAM_TO_L2_QUEUE, time);
                self.arbiter.return_credit(dest_sub_id);
                log::debug!(
                    "mem_fetch request {} return from dram to sub partition {}",
                    returned,
                    sub.global_id
                );
                sub.dram_to_l2_queue.enqueue(returned);
            }
        }

        self.dram.cycle(time);

        for done in self.dram.drain_completed() {
            if done.is_migration() {
                migrations.push(done);
            } else {
                debug_assert!(done.is_writeback());
                let sub_id = self.global_sub_partition_id_to_local_id(done.sub_partition_id());
                self.arbiter.return_credit(sub_id);
                log::trace!("dram[{}]: writeback {} retired", self.id, done);
            }
        }

        // L2->DRAM queue to DRAM latency queue
        // Arbitrate among multiple L2 subpartitions
        let mut issued = None;
        let last_issued_partition = self.arbiter.last_borrower();
        let num_sub_partitions = self.sub_partitions.len();
        for sub_id in 0..num_sub_partitions {
            let spid = (sub_id + last_issued_partition + 1) % num_sub_partitions;
            let sub = &self.sub_partitions[spid];
            let sub_partition_contention = sub.dram_to_l2_queue.full();
            let can_issue_to_dram = self.can_issue_to_channel(spid) && !sub_partition_contention;

            if log::log_enabled!(log::Level::Trace) {
                log::trace!(
                    "checking sub partition[{}]: l2 to dram queue={} dram to l2 queue={} can issue={}",
                    sub.global_id,
                    sub.l2_to_dram_queue.len(),
                    sub.dram_to_l2_queue.len(),
                    can_issue_to_dram,
                );
            }

            if can_issue_to_dram {
                let sub = &mut self.sub_partitions[spid];
                if let Some(mut fetch) = sub.l2_to_dram_queue.dequeue() {
                    log::debug!(
                        "issue {} from sub partition {} to DRAM",
                        &fetch,
                        sub.global_id
                    );
                    let ready_cycle = time + self.config.dram_latency;
                    fetch.set_status(mem_fetch::Status::IN_PARTITION_DRAM_LATENCY_QUEUE, time);
                    issued = Some(IssuedAccess {
                        addr: fetch.addr(),
                        kind: fetch.access_kind(),
                        tier: self.tier,
                    });
                    self.dram_latency_queue.push_back((ready_cycle, fetch));
                    self.arbiter.borrow_credit(spid);

                    // DRAM should only accept one request per cycle
                    break;
                }
            }
        }

        // DRAM latency queue to DRAM
        match self.dram_latency_queue.front() {
            Some((ready_cycle, _)) if time >= *ready_cycle && !self.dram.full() => {
                if let Some((_, fetch)) = self.dram_latency_queue.pop_front() {
                    self.dram.push(fetch, time);
                }
            }
            _ => {}
        }
        issued
    }
}
