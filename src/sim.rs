use crate::{
    clock, config,
    interconn::{Interconnect, ToyInterconnect},
    mcu,
    mem_fetch::{self, access::MemAccess, MemFetch},
    mem_partition_unit::MemoryPartitionUnit,
    migration,
};
use color_eyre::eyre::{self, WrapErr};
use console::style;
use std::collections::VecDeque;
use std::sync::Arc;

/// Heterogeneous memory system driven by independent clock domains.
///
/// Time stamps of all components are core cycles.
#[derive(Debug)]
pub struct MemorySystem {
    pub config: Arc<config::MemorySystem>,
    pub mem_controllers: Vec<Arc<mcu::MemoryControllerUnit>>,
    /// Partition units by global channel id
    pub partitions: Vec<MemoryPartitionUnit>,
    pub interconn: ToyInterconnect<MemFetch>,
    pub migration: migration::Engine,
    clocks: clock::Clocks,

    /// Submitted accesses not yet injected into the interconnect
    pending: VecDeque<MemAccess>,
    replies: VecDeque<MemFetch>,
    completed_migrations: Vec<MemFetch>,
    num_in_flight: u64,

    cycle: u64,
    next_epoch: u64,
    stats: stats::Sim,
    accesses: stats::Accesses,
}

impl MemorySystem {
    pub fn new(config: config::MemorySystem) -> eyre::Result<Self> {
        config.validate().wrap_err("invalid memory system config")?;
        let config = Arc::new(config);
        let mem_controllers = mcu::for_tiers(&config)?;

        let mut partitions = Vec::with_capacity(config.total_channels());
        for (tier, mem_controller) in config.tiers.iter().zip(mem_controllers.iter()) {
            let tier_config = Arc::new(tier.clone());
            for local_id in 0..tier.num_channels {
                let partition = MemoryPartitionUnit::new(
                    local_id,
                    Arc::clone(&tier_config),
                    Arc::clone(mem_controller),
                );
                debug_assert_eq!(partition.id, partitions.len());
                partitions.push(partition);
            }
        }

        let interconn = ToyInterconnect::new(
            config.num_requesters,
            config.total_sub_partitions(),
            config.interconn_latency,
            config.interconn_buffer_size,
        );
        let stats = stats::Sim {
            dram_cycles: vec![0; config.tiers.len()],
            ..stats::Sim::default()
        };
        Ok(Self {
            migration: migration::Engine::new(&config, mem_controllers.clone()),
            clocks: clock::Clocks::new(&config),
            mem_controllers,
            partitions,
            interconn,
            pending: VecDeque::new(),
            replies: VecDeque::new(),
            completed_migrations: Vec::new(),
            num_in_flight: 0,
            cycle: 0,
            next_epoch: config.stats_epoch_cycles,
            stats,
            accesses: stats::Accesses::default(),
            config,
        })
    }

    /// Current core cycle.
    #[must_use]
    pub fn time(&self) -> u64 {
        self.cycle
    }

    /// Submit an access for injection.
    ///
    /// Accesses to a page that is being migrated are held until the page
    /// lives on its new tier, the address is decoded only once injected.
    pub fn submit(&mut self, access: MemAccess) {
        assert!(
            !access.kind.is_migration(),
            "{access}: migration requests are issued by the memory system"
        );
        assert!(
            access.source < self.config.num_requesters,
            "{access}: unknown requester {}",
            access.source
        );
        log::trace!("{}: {access}", style("SUBMIT").green());
        self.stats.num_submitted += 1;
        self.pending.push_back(access);
    }

    /// Take the next reply delivered to a requester.
    pub fn pop_reply(&mut self) -> Option<MemFetch> {
        let mut reply = self.replies.pop_front()?;
        reply.set_status(mem_fetch::Status::DELIVERED, self.cycle);
        reply.return_cycle = Some(self.cycle);
        self.stats.num_delivered += 1;
        Some(reply)
    }

    /// Accesses submitted but not yet injected.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether any access or migration is outstanding.
    ///
    /// Delivered replies waiting for [`Self::pop_reply`] do not count.
    #[must_use]
    pub fn busy(&self) -> bool {
        !self.pending.is_empty()
            || self.num_in_flight > 0
            || !self.migration.is_idle()
            || self.interconn.busy()
            || self.partitions.iter().any(MemoryPartitionUnit::busy)
    }

    /// Queue the page of `addr` for migration to `tier`.
    pub fn migrate(&mut self, addr: crate::address, tier: usize) -> Result<(), migration::Error> {
        self.migration.mark(addr, tier, self.cycle)
    }

    /// Advance the clock domains that are due.
    pub fn cycle(&mut self) -> clock::Mask {
        #[cfg(feature = "timings")]
        let start = std::time::Instant::now();

        let mask = self.clocks.next();
        let time = self.cycle;

        if mask.interconn {
            self.interconn_cycle(time);
        }
        for (tier, &ticked) in mask.dram.iter().enumerate() {
            if ticked {
                self.dram_cycle(tier, time);
            }
        }
        if mask.l2 {
            self.l2_cycle(time);
        }
        if mask.core {
            self.core_cycle(time);
        }

        #[cfg(feature = "timings")]
        crate::record_timing("cycle", start.elapsed());
        mask
    }

    /// Run until all outstanding work is done or `max_cycles` core cycles passed.
    ///
    /// Returns the number of core cycles simulated.
    #[tracing::instrument(skip(self))]
    pub fn run_to_completion(&mut self, max_cycles: Option<u64>) -> u64 {
        while self.busy() && max_cycles.map_or(true, |max| self.cycle < max) {
            self.cycle();
        }
        if self.busy() {
            log::warn!(
                "memory system still busy after {} cycles ({} pending, {} in flight)",
                self.cycle,
                self.pending.len(),
                self.num_in_flight
            );
        }
        self.cycle
    }

    /// Run exactly `cycles` core cycles.
    pub fn run_for(&mut self, cycles: u64) {
        let until = self.cycle + cycles;
        while self.cycle < until {
            self.cycle();
        }
    }

    /// Move replies from the sub partitions into the interconnect.
    fn interconn_cycle(&mut self, time: u64) {
        self.stats.interconn_cycles += 1;
        for partition in &mut self.partitions {
            for sub in partition.sub_partitions.iter_mut() {
                let Some(reply) = sub.top() else {
                    continue;
                };
                let size = reply.packet_size();
                let node = self.interconn.mem_node(sub.global_id);
                if !self.interconn.has_buffer(node, size) {
                    self.stats.stall_interconn_to_core += 1;
                    continue;
                }
                if let Some(mut reply) = sub.pop() {
                    reply.set_status(mem_fetch::Status::IN_ICNT_TO_SHADER, time);
                    let dest = reply.access.source;
                    self.interconn.push(node, dest, reply, size, time);
                }
            }
        }
    }

    fn dram_cycle(&mut self, tier: usize, time: u64) {
        self.stats.dram_cycles[tier] += 1;
        for partition in self.partitions.iter_mut().filter(|partition| partition.tier == tier) {
            if let Some(issued) = partition.dram_cycle(time, &mut self.completed_migrations) {
                self.migration.observe(&issued, time);
            }
        }
        for fetch in self.completed_migrations.drain(..) {
            self.migration.complete(fetch, time);
        }
    }

    /// Move requests from the interconnect into the sub partitions and cycle the L2s.
    fn l2_cycle(&mut self, time: u64) {
        self.stats.l2_cycles += 1;
        for partition in &mut self.partitions {
            for sub in partition.sub_partitions.iter_mut() {
                let node = self.interconn.mem_node(sub.global_id);
                if sub.full() {
                    if self.interconn.pending(node).next().is_some() {
                        self.stats.stall_dram_full += 1;
                    }
                } else if let Some(fetch) = self.interconn.pop(node, time) {
                    sub.push(fetch, time);
                }
                sub.cache_cycle(time);
            }
        }
    }

    fn core_cycle(&mut self, time: u64) {
        // deliver replies
        for requester in 0..self.config.num_requesters {
            while let Some(reply) = self.interconn.pop(requester, time) {
                log::debug!("{}: {reply}", style("REPLY").green());
                self.num_in_flight -= 1;
                self.replies.push_back(reply);
            }
        }

        self.migration.cycle(time, &mut self.partitions, &self.interconn);
        self.inject(time);

        self.cycle += 1;
        self.stats.cycles = self.cycle;
        if self.config.stats_epoch_cycles > 0 && self.cycle >= self.next_epoch {
            self.end_epoch();
            self.next_epoch += self.config.stats_epoch_cycles;
        }
    }

    /// Inject submitted accesses into the interconnect.
    fn inject(&mut self, time: u64) {
        let mut num_injected = 0;
        let mut held = false;
        let mut i = 0;
        while i < self.pending.len() && num_injected < self.config.injection_width {
            let access = &self.pending[i];
            if self.migration.is_blocked(access.addr) {
                held = true;
                i += 1;
                continue;
            }
            let size = access.control_size() + if access.is_write { access.req_size_bytes } else { 0 };
            if !self.interconn.has_buffer(access.source, size) {
                break;
            }
            let Some(access) = self.pending.remove(i) else {
                break;
            };
            let physical_addr = self.migration.to_physical_address(access.addr);
            let mut fetch = mem_fetch::Builder {
                access,
                physical_addr,
            }
            .build();
            debug_assert_eq!(fetch.packet_size(), size);
            fetch.inject_cycle = Some(time);
            fetch.set_status(mem_fetch::Status::IN_ICNT_TO_MEM, time);
            self.accesses.inc(fetch.access_kind().into(), 1);

            let dest = self.interconn.mem_node(fetch.sub_partition_id());
            let src = fetch.access.source;
            // writebacks are never answered
            if !fetch.is_writeback() {
                self.num_in_flight += 1;
            }
            self.interconn.push(src, dest, fetch, size, time);
            num_injected += 1;
        }
        if held {
            self.migration.stats.page_blocking_stalls += 1;
        }
    }

    fn end_epoch(&mut self) {
        let mut requests_per_tier = vec![0; self.config.tiers.len()];
        for partition in &mut self.partitions {
            if let Some(epoch) = partition.dram.stats.epochs.last() {
                requests_per_tier[partition.tier] +=
                    epoch.ordinary + epoch.migration_reads + epoch.migration_writes;
            }
            partition.dram.stats.next_epoch();
        }
        log::debug!(
            "epoch ending at cycle {}: requests per tier {:?}",
            self.cycle,
            requests_per_tier
        );
        self.migration.end_epoch(&requests_per_tier);
    }

    /// Statistics of the whole memory system.
    #[must_use]
    pub fn stats(&self) -> stats::Stats {
        let mut l2 = stats::Cache::default();
        for partition in &self.partitions {
            for sub in partition.sub_partitions.iter() {
                if let Some(cache_stats) = sub.stats() {
                    l2 += cache_stats.clone();
                }
            }
        }
        let mut migration = self.migration.stats.clone();
        migration.num_tier_flips = self.migration.tier_map.num_flips();
        stats::Stats {
            accesses: self.accesses.clone(),
            sim: self.stats.clone(),
            dram: self.partitions.iter().map(MemoryPartitionUnit::stats).collect(),
            l2,
            migration,
        }
    }

    /// Power model counters of every channel.
    #[must_use]
    pub fn power_stats(&self) -> Vec<stats::dram::PowerCounters> {
        self.partitions
            .iter()
            .map(|partition| partition.dram.stats.power_counters())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySystem;
    use crate::{config, mem_fetch, testing};
    use color_eyre::eyre;

    #[test]
    fn single_read_is_delivered() -> eyre::Result<()> {
        testing::init_logging();
        let mut sim = MemorySystem::new(testing::small_config())?;
        sim.submit(testing::access(mem_fetch::access::Kind::GLOBAL_ACC_R, 0x1000));
        let cycles = sim.run_to_completion(Some(10_000));
        assert!(!sim.busy(), "busy after {cycles} cycles");
        let reply = sim.pop_reply().expect("reply");
        assert_eq!(reply.kind, mem_fetch::Kind::READ_REPLY);
        assert_eq!(reply.status, mem_fetch::Status::DELIVERED);
        assert!(reply.return_cycle > reply.inject_cycle);
        assert_eq!(sim.stats().sim.num_delivered, 1);
        Ok(())
    }

    #[test]
    fn injection_width_limits_admissions() -> eyre::Result<()> {
        let mut sim = MemorySystem::new(config::MemorySystem {
            injection_width: 2,
            ..testing::small_config()
        })?;
        for i in 0..6 {
            sim.submit(testing::access(mem_fetch::access::Kind::GLOBAL_ACC_R, i * 0x80));
        }
        // the first step ticks the core domain
        assert!(sim.cycle().core);
        assert_eq!(sim.num_pending(), 4);
        Ok(())
    }

    #[test]
    fn epochs_advance_dram_statistics() -> eyre::Result<()> {
        let mut sim = MemorySystem::new(config::MemorySystem {
            stats_epoch_cycles: 100,
            ..testing::small_config()
        })?;
        sim.run_for(350);
        for dram in sim.stats().dram {
            assert_eq!(dram.epochs.len(), 4);
        }
        Ok(())
    }
}
