pub mod entry;
pub mod monitor;

pub use entry::{DrainStatus, Entry, State};
pub use monitor::Monitor;

use crate::{
    address, config,
    interconn::ToyInterconnect,
    mcu,
    mem_fetch::{self, MemFetch},
    mem_partition_unit::{IssuedAccess, MemoryPartitionUnit},
    tier::TierMap,
};
use console::style;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("page {0:#x} is not queued for migration")]
    NotFound(address),
    #[error("page {0:#x} is already being migrated and cannot be abandoned")]
    InFlight(address),
    #[error("page {0:#x} is already queued for migration")]
    AlreadyQueued(address),
    #[error("page {page:#x} already lives on tier {tier}")]
    SameTier { page: address, tier: usize },
    #[error("tier {0} is not configured")]
    UnknownTier(usize),
}

/// Relocation of pages between memory tiers.
///
/// Owns the address to tier map and publishes a new location only once
/// all synthetic traffic of the page completed.
#[derive(Debug)]
pub struct Engine {
    config: config::Migration,
    pub tier_map: TierMap,
    mem_controllers: Vec<Arc<mcu::MemoryControllerUnit>>,
    entries: IndexMap<address, Entry>,
    /// Pages queued per global source channel
    queues: Vec<VecDeque<address>>,
    paused: bool,
    pub monitor: Monitor,
    pub stats: stats::Migration,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: &config::MemorySystem,
        mem_controllers: Vec<Arc<mcu::MemoryControllerUnit>>,
    ) -> Self {
        let migration = config.migration.clone();
        Self {
            tier_map: TierMap::new(
                migration.page_size,
                config.placement.clone(),
                config.tiers.len(),
            ),
            queues: vec![VecDeque::new(); config.total_channels()],
            entries: IndexMap::new(),
            paused: false,
            monitor: Monitor::new(&migration),
            stats: stats::Migration::default(),
            mem_controllers,
            config: migration,
        }
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.config.page_size
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entry(&self, addr: address) -> Option<&Entry> {
        self.entries.get(&self.tier_map.page_of(addr))
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.entries.values()
    }

    /// Whether ordinary accesses to the page of `addr` are held back.
    #[must_use]
    pub fn is_blocked(&self, addr: address) -> bool {
        self.entry(addr)
            .is_some_and(|entry| entry.state.blocks_accesses())
    }

    #[must_use]
    pub fn mem_controller(&self, tier: usize) -> &mcu::MemoryControllerUnit {
        &self.mem_controllers[tier]
    }

    /// Decode `addr` on the tier currently hosting it.
    #[must_use]
    pub fn to_physical_address(&self, addr: address) -> mcu::PhysicalAddress {
        let tier = self.tier_map.tier_of(addr);
        self.mem_controllers[tier].to_physical_address(addr)
    }

    /// Queue the page of `addr` for migration to `destination_tier`.
    pub fn mark(&mut self, addr: address, destination_tier: usize, time: u64) -> Result<(), Error> {
        let page = self.tier_map.page_of(addr);
        if destination_tier >= self.mem_controllers.len() {
            return Err(Error::UnknownTier(destination_tier));
        }
        if self.entries.contains_key(&page) {
            return Err(Error::AlreadyQueued(page));
        }
        let source_tier = self.tier_map.tier_of(page);
        if source_tier == destination_tier {
            return Err(Error::SameTier {
                page,
                tier: source_tier,
            });
        }
        let source_channel = self.mem_controllers[source_tier]
            .to_physical_address(page)
            .chip as usize;
        let entry = Entry::new(page, source_tier, destination_tier, source_channel);
        log::debug!("{}: {}", style("MIGRATION MARKED").cyan(), entry);
        self.entries.insert(page, entry);
        self.queues[source_channel].push_back(page);
        self.stats.num_marked += 1;
        self.stats.pages.entry(page).or_default().marked = Some(time);
        Ok(())
    }

    /// Drop a migration that did not issue synthetic traffic yet.
    pub fn abandon(&mut self, addr: address) -> Result<(), Error> {
        let page = self.tier_map.page_of(addr);
        let entry = self.entries.get(&page).ok_or(Error::NotFound(page))?;
        if !entry.state.is_abandonable() {
            return Err(Error::InFlight(page));
        }
        let source_channel = entry.source_channel;
        self.entries.shift_remove(&page);
        self.queues[source_channel].retain(|&queued| queued != page);
        self.stats.num_abandoned += 1;
        log::debug!("{}: {:#x}", style("MIGRATION ABANDONED").cyan(), page);
        Ok(())
    }

    /// Feed a request that left an L2 towards DRAM to the monitor.
    pub fn observe(&mut self, issued: &IssuedAccess, time: u64) {
        if !self.config.enabled || self.paused {
            return;
        }
        let entries = &self.entries;
        let tier_map = &self.tier_map;
        let source_tier = self.config.source_tier;
        let marked = self.monitor.observe(issued, |page| {
            !entries.contains_key(&page)
                && !tier_map.was_migrated(page)
                && tier_map.tier_of(page) == source_tier
        });
        for page in marked {
            if let Err(err) = self.mark(page, self.config.destination_tier, time) {
                log::warn!("monitor: {err}");
            }
        }
    }

    /// Stop migrating if the bandwidth tier already serves enough requests.
    ///
    /// Called at the end of every statistics epoch with the requests each
    /// tier served in that epoch.
    pub fn end_epoch(&mut self, requests_per_tier: &[u64]) {
        if !self.config.limit_rate {
            return;
        }
        let total: u64 = requests_per_tier.iter().sum();
        let served = requests_per_tier
            .get(self.config.destination_tier)
            .copied()
            .unwrap_or(0);
        let share = if total == 0 { 0 } else { served * 100 / total };
        let paused = share > self.config.pause_above;
        if paused != self.paused {
            log::info!(
                "migration {} at {}% of requests on tier {}",
                if paused { "paused" } else { "resumed" },
                share,
                self.config.destination_tier
            );
        }
        self.paused = paused;
        if paused {
            let marked: Vec<address> = self
                .entries
                .values()
                .filter(|entry| entry.state == State::Marked)
                .map(|entry| entry.page)
                .collect();
            for page in marked {
                if let Err(err) = self.abandon(page) {
                    log::warn!("rate limiting: {err}");
                }
            }
        }
    }

    /// Handle a finished migration request.
    pub fn complete(&mut self, fetch: MemFetch, time: u64) {
        let page = fetch.page(self.config.page_size);
        let requests_per_page = self.config.requests_per_page;
        let Some(entry) = self.entries.get_mut(&page) else {
            panic!("migration: {fetch} completed for page {page:#x} that is not migrating");
        };
        match fetch.access_kind() {
            mem_fetch::access::Kind::MIGRATE_R => {
                assert_eq!(entry.state, State::Migrating, "{entry}: unexpected {fetch}");
                entry.reads.num_done += 1;
                assert!(entry.reads.num_done <= entry.reads.num_sent);
                if entry.reads.num_done == requests_per_page {
                    log::debug!("{}: {}", style("MIGRATION READS DONE").cyan(), entry);
                    entry.state = State::Completing;
                }
            }
            mem_fetch::access::Kind::MIGRATE_W => {
                assert_eq!(entry.state, State::Completing, "{entry}: unexpected {fetch}");
                entry.writes.num_done += 1;
                assert!(entry.writes.num_done <= entry.writes.num_sent);
                if entry.writes.num_done == requests_per_page {
                    let destination_tier = entry.destination_tier;
                    self.finish(page, destination_tier, time);
                }
            }
            kind => panic!("migration: {fetch} of kind {kind:?} is not a migration request"),
        }
    }

    /// Publish the new location of a page.
    fn finish(&mut self, page: address, destination_tier: usize, time: u64) {
        let Some(entry) = self.entries.shift_remove(&page) else {
            return;
        };
        let queue = &mut self.queues[entry.source_channel];
        assert_eq!(
            queue.front(),
            Some(&page),
            "migration: finished page {page:#x} is not at the head of channel {}",
            entry.source_channel
        );
        queue.pop_front();
        self.tier_map.flip(page, destination_tier);
        self.stats.num_tier_flips = self.tier_map.num_flips();
        self.stats.num_completed += 1;
        self.stats.pages.entry(page).or_default().completed = Some(time);
        log::debug!("{}: {}", style("MIGRATION DONE").cyan(), entry);
    }

    /// Advance the head migration of every source channel.
    pub fn cycle(
        &mut self,
        time: u64,
        partitions: &mut [MemoryPartitionUnit],
        interconn: &ToyInterconnect<MemFetch>,
    ) {
        for channel in 0..self.queues.len() {
            let Some(&page) = self.queues[channel].front() else {
                continue;
            };
            let Some(state) = self.entries.get(&page).map(|entry| entry.state) else {
                continue;
            };
            match state {
                State::Marked if self.paused => {}
                State::Marked => {
                    if let Some(entry) = self.entries.get_mut(&page) {
                        entry.state = State::Draining;
                        log::debug!("{}: {}", style("MIGRATION DRAINING").cyan(), entry);
                    }
                    self.stats.pages.entry(page).or_default().blocked = Some(time);
                }
                State::Draining => self.drain(page, time, partitions, interconn),
                State::Migrating => self.issue(page, mem_fetch::access::Kind::MIGRATE_R, time, partitions),
                State::Completing => self.issue(page, mem_fetch::access::Kind::MIGRATE_W, time, partitions),
            }
        }
    }

    fn drain(
        &mut self,
        page: address,
        time: u64,
        partitions: &mut [MemoryPartitionUnit],
        interconn: &ToyInterconnect<MemFetch>,
    ) {
        let page_size = self.config.page_size;
        let Some(entry) = self.entries.get_mut(&page) else {
            return;
        };
        entry.wait_cycles += 1;
        let drain = &mut entry.drain;
        if !drain.interconn {
            drain.interconn = !interconn
                .pending_to_mems()
                .any(|fetch| fetch.page(page_size) == page);
        }
        if drain.interconn && !drain.sub_partition_input {
            drain.sub_partition_input = !partitions.iter().any(|partition| {
                partition
                    .sub_partitions
                    .iter()
                    .any(|sub| sub.has_pending_input(page, page_size))
            });
        }
        if drain.sub_partition_input && !drain.cache_flush {
            let mut clean = true;
            for partition in partitions
                .iter_mut()
                .filter(|partition| partition.tier == entry.source_tier)
            {
                for sub in partition.sub_partitions.iter_mut() {
                    clean &= sub.flush_page_for_migration(page, page_size, time);
                }
            }
            drain.cache_flush = clean;
        }
        if drain.cache_flush && !drain.cache_to_dram {
            drain.cache_to_dram = !partitions
                .iter()
                .any(|partition| partition.has_pending_to_dram(page, page_size));
        }
        if drain.cache_to_dram && !drain.controller {
            drain.controller = !partitions
                .iter()
                .any(|partition| partition.dram.has_pending(page, page_size));
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("migration: {} drain={:?}", entry, entry.drain);
        }
        if !entry.drain.is_drained() || entry.wait_cycles < self.config.migration_cost {
            return;
        }

        if self.config.magical {
            let destination_tier = entry.destination_tier;
            self.stats.num_magical += 1;
            self.finish(page, destination_tier, time);
        } else {
            entry.state = State::Migrating;
            self.stats.pages.entry(page).or_default().issued = Some(time);
            self.issue(page, mem_fetch::access::Kind::MIGRATE_R, time, partitions);
        }
    }

    /// Send the remaining synthetic requests of the current phase.
    fn issue(
        &mut self,
        page: address,
        kind: mem_fetch::access::Kind,
        time: u64,
        partitions: &mut [MemoryPartitionUnit],
    ) {
        let requests_per_page = self.config.requests_per_page;
        let request_size = self.config.request_size;
        let Some(entry) = self.entries.get_mut(&page) else {
            return;
        };
        let (tier, progress) = match kind {
            mem_fetch::access::Kind::MIGRATE_R => (entry.source_tier, &mut entry.reads),
            _ => (entry.destination_tier, &mut entry.writes),
        };
        let mem_controller = &self.mem_controllers[tier];
        while progress.num_sent < requests_per_page {
            let addr = page + progress.num_sent as u64 * u64::from(request_size);
            let physical_addr = mem_controller.to_physical_address(addr);
            let fetch = mem_fetch::Builder {
                access: mem_fetch::access::Builder {
                    kind,
                    addr,
                    req_size_bytes: request_size,
                    source: 0,
                }
                .build(),
                physical_addr,
            }
            .build();
            let channel = physical_addr.chip as usize;
            if let Err(refused) = partitions[channel].push_migration(fetch, time) {
                // resume in a later cycle
                log::trace!("migration: channel {channel} refused {refused}");
                self.stats.num_issue_retries += 1;
                break;
            }
            progress.num_sent += 1;
            match kind {
                mem_fetch::access::Kind::MIGRATE_R => self.stats.num_read_requests += 1,
                _ => self.stats.num_write_requests += 1,
            }
        }
    }
}
