pub mod bank;
pub mod scheduler;

pub use bank::{Bank, BankGroupTimers, BankTimers, ChannelTimers};
pub use scheduler::{Policy, Scheduler};

use crate::{
    address, config,
    fifo::{Fifo, Pipeline},
    mem_fetch::{self, MemFetch},
};
use console::style;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    READ,
    WRITE,
}

/// A fetch as seen by the DRAM channel.
#[derive(Debug)]
pub struct Request {
    pub bank: usize,
    pub row: u64,
    pub col: u64,
    /// Bytes to transfer over the data bus
    pub nbytes: u32,
    pub direction: Direction,
    /// Cycle the request was admitted
    pub arrival: u64,
    pub fetch: MemFetch,
}

impl Request {
    #[must_use]
    pub fn new(fetch: MemFetch, time: u64) -> Self {
        let direction = if fetch.is_write() {
            Direction::WRITE
        } else {
            Direction::READ
        };
        Self {
            bank: fetch.physical_addr.bank as usize,
            row: fetch.physical_addr.row,
            col: fetch.physical_addr.col,
            nbytes: fetch.data_size(),
            direction,
            arrival: time,
            fetch,
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[bank={} row={} col={}]",
            self.fetch, self.bank, self.row, self.col
        )
    }
}

/// A single burst on the data bus.
#[derive(Debug)]
enum DataAtom {
    Partial { uid: u64, bytes: u32 },
    /// The final burst hands the request on
    Last { bytes: u32, request: Request },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ACTIVATE,
    PRECHARGE,
    READ,
    WRITE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub kind: CommandKind,
    pub bank: usize,
    pub row: u64,
}

/// Resolved timing constants of a channel in DRAM command cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub nbk: usize,
    pub nbkgrp: usize,
    pub t_ccd: u64,
    pub t_rrd: u64,
    pub t_rcd: u64,
    pub t_rcdwr: u64,
    pub t_ras: u64,
    pub t_rp: u64,
    pub t_rc: u64,
    pub cl: u64,
    pub wl: u64,
    pub t_rtw: u64,
    pub t_wtr: u64,
    pub t_wtp: u64,
    pub t_ccdl: u64,
    pub t_rtpl: u64,
    pub burst_cycles: u64,
    pub atom_size: u32,
}

impl From<&config::Tier> for Timings {
    fn from(config: &config::Tier) -> Self {
        let timing = &config.timing;
        Self {
            nbk: timing.nbk,
            nbkgrp: timing.nbkgrp,
            t_ccd: timing.t_ccd,
            t_rrd: timing.t_rrd,
            t_rcd: timing.t_rcd,
            t_rcdwr: config.t_rcdwr(),
            t_ras: timing.t_ras,
            t_rp: timing.t_rp,
            t_rc: timing.t_rc,
            cl: timing.cl,
            wl: timing.wl,
            t_rtw: config.t_rtw(),
            t_wtr: config.t_wtr(),
            t_wtp: config.t_wtp(),
            t_ccdl: timing.t_ccdl,
            t_rtpl: timing.t_rtpl,
            burst_cycles: config.burst_cycles(),
            atom_size: config.dram_atom_size() as u32,
        }
    }
}

impl Timings {
    /// Configured values in the order of [`ChannelTimers::to_array`].
    #[must_use]
    pub fn channel(&self) -> [u64; 4] {
        [self.t_ccd, self.t_rrd, self.t_rtw, self.t_wtr]
    }

    /// Configured values in the order of [`BankTimers::to_array`].
    #[must_use]
    pub fn bank(&self) -> [u64; 7] {
        [
            self.t_rcd,
            self.t_rcdwr,
            self.t_ras,
            self.t_rp,
            self.t_rc,
            self.t_wtp,
            self.burst_cycles,
        ]
    }

    /// Configured values in the order of [`BankGroupTimers::to_array`].
    #[must_use]
    pub fn bank_group(&self) -> [u64; 2] {
        [self.t_ccdl, self.t_rtpl]
    }

    #[must_use]
    pub fn bank_group_of(&self, bank: usize) -> usize {
        bank / (self.nbk / self.nbkgrp)
    }
}

/// Snapshot of all countdown timers of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub channel: ChannelTimers,
    pub banks: Vec<BankTimers>,
    pub bank_groups: Vec<BankGroupTimers>,
}

/// A single DRAM channel.
#[derive(Debug)]
pub struct DRAM {
    /// Global channel id
    pub id: usize,
    pub tier: usize,
    timings: Timings,
    banks: Vec<Bank>,
    bank_groups: Vec<BankGroupTimers>,
    timers: ChannelTimers,
    /// Bank with the highest priority
    prio: usize,
    /// Current direction of the data bus
    direction: Direction,

    /// Admission queue
    mrqq: Fifo<Request>,
    scheduler: Scheduler,
    /// Data bus
    rwq: Pipeline<DataAtom>,
    returnq: Fifo<MemFetch>,
    partial_bytes: HashMap<u64, u32>,
    /// Finished requests without a reply
    completed: Vec<MemFetch>,

    num_admitted: u64,
    num_retired: u64,
    pub stats: stats::DRAM,
}

impl std::fmt::Display for DRAM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DRAM[{}](tier={} pending={} returnq={})",
            self.id,
            self.tier,
            self.num_pending(),
            self.returnq.len()
        )
    }
}

impl DRAM {
    #[must_use]
    pub fn new(id: usize, tier: usize, config: &config::Tier) -> Self {
        let timings = Timings::from(config);
        let num_banks = timings.nbk;
        let input_queue_size = match config.input_queue_size {
            0 => None,
            size => Some(size),
        };
        Self {
            id,
            tier,
            banks: (0..num_banks).map(|_| Bank::default()).collect(),
            bank_groups: vec![BankGroupTimers::default(); timings.nbkgrp],
            timers: ChannelTimers::default(),
            prio: 0,
            direction: Direction::READ,
            mrqq: Fifo::new(None, input_queue_size),
            scheduler: Scheduler::new(config),
            rwq: Pipeline::new(timings.cl as usize),
            returnq: Fifo::new(None, Some(config.return_queue_capacity())),
            partial_bytes: HashMap::new(),
            completed: Vec::new(),
            num_admitted: 0,
            num_retired: 0,
            stats: stats::DRAM::new(id, num_banks),
            timings,
        }
    }

    #[must_use]
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Whether the channel refuses new requests.
    #[must_use]
    pub fn full(&self) -> bool {
        self.mrqq.full() || self.scheduler.is_full()
    }

    /// Requests waiting for a bank.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.mrqq.len() + self.scheduler.num_pending()
    }

    /// Requests admitted but not yet handed back.
    #[must_use]
    pub fn num_resident(&self) -> usize {
        let in_banks = self.banks.iter().filter(|bank| bank.mrq.is_some()).count();
        let on_bus = self
            .rwq
            .iter()
            .filter(|atom| matches!(atom, DataAtom::Last { .. }))
            .count();
        self.num_pending() + in_banks + on_bus + self.returnq.len() + self.completed.len()
    }

    #[must_use]
    pub fn num_admitted(&self) -> u64 {
        self.num_admitted
    }

    #[must_use]
    pub fn num_retired(&self) -> u64 {
        self.num_retired
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.num_resident() == 0
    }

    /// Whether an ordinary request for `page` waits in the channel.
    #[must_use]
    pub fn has_pending(&self, page: address, page_size: u64) -> bool {
        let in_banks = self.banks.iter().filter_map(|bank| bank.mrq.as_ref());
        self.mrqq
            .iter()
            .chain(self.scheduler.pending())
            .chain(in_banks)
            .any(|request| !request.fetch.is_migration() && request.fetch.page(page_size) == page)
    }

    #[must_use]
    pub fn timers(&self) -> TimerSnapshot {
        TimerSnapshot {
            channel: self.timers,
            banks: self.banks.iter().map(|bank| bank.timers).collect(),
            bank_groups: self.bank_groups.clone(),
        }
    }

    #[must_use]
    pub fn bank(&self, bank: usize) -> &Bank {
        &self.banks[bank]
    }

    /// Admit a fetch.
    ///
    /// # Panics
    /// If the channel is full or the fetch was decoded for another channel.
    pub fn push(&mut self, mut fetch: MemFetch, time: u64) {
        assert_eq!(
            (fetch.channel_id(), fetch.physical_addr.tier),
            (self.id, self.tier),
            "address/config inconsistency: {fetch} pushed to channel {} of tier {}",
            self.id,
            self.tier,
        );
        assert!(!self.full(), "{self}: push while full");
        let bank = fetch.physical_addr.bank;
        assert!(
            (bank as usize) < self.timings.nbk,
            "address/config inconsistency: {fetch} decoded to bank {bank} of {}",
            self.timings.nbk
        );

        fetch.set_status(mem_fetch::Status::IN_PARTITION_MC_INTERFACE_QUEUE, time);
        self.stats
            .record_request(fetch.access_kind().into(), bank, fetch.physical_addr.row);
        let request = Request::new(fetch, time);
        log::trace!("{}: push {}", self, request);
        self.mrqq.enqueue(request);
        self.num_admitted += 1;

        let pending = self.num_pending() as u64;
        self.stats.max_mrqs_temp = self.stats.max_mrqs_temp.max(pending);
    }

    #[must_use]
    pub fn return_queue_top(&self) -> Option<&MemFetch> {
        self.returnq.first()
    }

    pub fn return_queue_pop(&mut self) -> Option<MemFetch> {
        let fetch = self.returnq.dequeue()?;
        self.num_retired += 1;
        Some(fetch)
    }

    /// Take finished writebacks and migration requests.
    pub fn drain_completed(&mut self) -> Vec<MemFetch> {
        self.num_retired += self.completed.len() as u64;
        std::mem::take(&mut self.completed)
    }

    /// Advance the channel by one DRAM command cycle.
    ///
    /// Returns the command issued in this cycle.
    #[tracing::instrument(name = "dram_cycle", skip_all, fields(id = self.id))]
    pub fn cycle(&mut self, time: u64) -> Option<Command> {
        self.complete_data(time);
        self.schedule(time);

        let command = self.issue(time);
        let active = !self.timers.is_zero()
            || self
                .banks
                .iter()
                .any(|bank| bank.mrq.is_some() || !bank.timers.is_zero());

        self.stats.num_cmd += 1;
        if command.is_none() {
            self.stats.num_nop += 1;
        }
        if active {
            self.stats.num_activity += 1;
        }

        self.timers.decrement();
        for bank in &mut self.banks {
            bank.timers.decrement();
        }
        for group in &mut self.bank_groups {
            group.decrement();
        }

        if let Some(command) = command {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "{}: {:?} bank={} row={}",
                    style(format!("DRAM[{}]", self.id)).magenta(),
                    command.kind,
                    command.bank,
                    command.row
                );
            }
        }
        command
    }

    /// Move the head of the data bus into the return queue.
    fn complete_data(&mut self, time: u64) {
        if self.returnq.full() {
            // the data bus stalls
            return;
        }
        match self.rwq.pop() {
            None => {}
            Some(DataAtom::Partial { uid, bytes }) => {
                *self.partial_bytes.entry(uid).or_insert(0) += bytes;
            }
            Some(DataAtom::Last { bytes, request }) => {
                let mut fetch = request.fetch;
                fetch.bytes_received = self.partial_bytes.remove(&fetch.uid).unwrap_or(0) + bytes;
                debug_assert!(fetch.bytes_received >= request.nbytes);
                if fetch.is_writeback() || fetch.is_migration() {
                    log::trace!("{}: completed {} without reply", self, fetch);
                    self.completed.push(fetch);
                } else {
                    fetch.set_reply();
                    fetch.set_status(mem_fetch::Status::IN_PARTITION_MC_RETURNQ, time);
                    self.returnq.enqueue(fetch);
                }
            }
        }
    }

    /// Hand admitted requests to the scheduler and fill a free bank.
    fn schedule(&mut self, time: u64) {
        while self.scheduler.can_accept() {
            let Some(mut request) = self.mrqq.dequeue() else {
                break;
            };
            request
                .fetch
                .set_status(mem_fetch::Status::IN_PARTITION_MC_INPUT_QUEUE, time);
            self.scheduler.enqueue(request);
        }

        let nbk = self.timings.nbk;
        for i in 0..nbk {
            let b = (i + self.prio) % nbk;
            let bank = &mut self.banks[b];
            if bank.mrq.is_some() {
                continue;
            }
            if let Some(mut request) = self.scheduler.dequeue(b, bank.open_row()) {
                request
                    .fetch
                    .set_status(mem_fetch::Status::IN_PARTITION_MC_BANK_ARB_QUEUE, time);
                bank.mrq = Some(request);
                if self.scheduler.rotates_priority() {
                    self.prio = (self.prio + 1) % nbk;
                }
                break;
            }
        }

        let pending = self.num_pending() as u64;
        self.stats.max_mrqs = self.stats.max_mrqs.max(pending);
        self.stats.total_mrqs += pending;
    }

    /// Issue at most one command over all banks.
    fn issue(&mut self, time: u64) -> Option<Command> {
        let nbk = self.timings.nbk;
        let mut issued = None;
        for i in 0..nbk {
            let b = (i + self.prio) % nbk;
            if issued.is_none() {
                issued = self.try_issue(b, time);
                if issued.is_some() {
                    continue;
                }
            }
            self.banks[b].num_idle += 1;
            self.stats.banks[b].num_idle += 1;
        }
        issued
    }

    fn try_issue(&mut self, b: usize, time: u64) -> Option<Command> {
        let t = &self.timings;
        let grp = t.bank_group_of(b);
        let bank = &self.banks[b];
        let request = bank.mrq.as_ref()?;
        let row_hit = bank.state == bank::State::ACTIVE && bank.curr_row == request.row;
        let column_ready = self.timers.ccd == 0 && self.bank_groups[grp].ccdl == 0 && !self.rwq.full();

        if row_hit && request.direction == Direction::READ {
            if column_ready && bank.timers.rcd == 0 && self.timers.wtr == 0 {
                if self.direction == Direction::WRITE {
                    self.direction = Direction::READ;
                    self.rwq.set_latency(t.cl as usize);
                }
                self.timers.ccd = t.t_ccd;
                self.timers.rtw = t.t_rtw;
                self.bank_groups[grp].ccdl = t.t_ccdl;
                self.bank_groups[grp].rtpl = t.t_rtpl;
                self.banks[b].timers.rtp = t.burst_cycles;
                self.stats.num_read += 1;
                return Some(self.transfer(b, CommandKind::READ, time));
            }
        } else if row_hit && request.direction == Direction::WRITE {
            if column_ready && bank.timers.rcdwr == 0 && self.timers.rtw == 0 {
                if self.direction == Direction::READ {
                    self.direction = Direction::WRITE;
                    self.rwq.set_latency(t.wl as usize);
                }
                self.timers.ccd = t.t_ccd;
                self.timers.wtr = t.t_wtr;
                self.bank_groups[grp].ccdl = t.t_ccdl;
                self.banks[b].timers.wtp = t.t_wtp;
                self.stats.num_write += 1;
                return Some(self.transfer(b, CommandKind::WRITE, time));
            }
        } else if bank.state == bank::State::IDLE {
            if self.timers.rrd == 0 && bank.timers.rp == 0 && bank.timers.rc == 0 {
                let row = request.row;
                let bank = &mut self.banks[b];
                bank.curr_row = row;
                bank.state = bank::State::ACTIVE;
                bank.timers.rcd = t.t_rcd;
                bank.timers.rcdwr = t.t_rcdwr;
                bank.timers.ras = t.t_ras;
                bank.timers.rc = t.t_rc;
                self.timers.rrd = t.t_rrd;
                self.prio = (b + 1) % t.nbk;
                self.stats.num_activate += 1;
                return Some(Command {
                    kind: CommandKind::ACTIVATE,
                    bank: b,
                    row,
                });
            }
        } else if bank.timers.ras == 0
            && bank.timers.wtp == 0
            && bank.timers.rtp == 0
            && self.bank_groups[grp].rtpl == 0
        {
            // a different row is open
            let row = bank.curr_row;
            let bank = &mut self.banks[b];
            bank.state = bank::State::IDLE;
            bank.timers.rp = t.t_rp;
            self.prio = (b + 1) % t.nbk;
            self.stats.num_precharge += 1;
            return Some(Command {
                kind: CommandKind::PRECHARGE,
                bank: b,
                row,
            });
        }
        None
    }

    /// Put the next burst of the request serviced by bank `b` on the data bus.
    fn transfer(&mut self, b: usize, kind: CommandKind, time: u64) -> Command {
        let atom_size = self.timings.atom_size;
        let burst_cycles = self.timings.burst_cycles;
        let bank = &mut self.banks[b];
        bank.num_accesses += 1;
        self.stats.banks[b].num_accesses += 1;
        self.stats.bwutil += burst_cycles;

        let Some(request) = bank.mrq.as_mut() else {
            unreachable!("transfer without request");
        };
        let command = Command {
            kind,
            bank: b,
            row: request.row,
        };
        if request.fetch.bytes_sent == 0 {
            request
                .fetch
                .set_status(mem_fetch::Status::IN_PARTITION_DRAM, time);
        }
        request.fetch.bytes_sent += atom_size;
        let atom = if request.fetch.bytes_sent >= request.nbytes {
            let Some(request) = bank.mrq.take() else {
                unreachable!("transfer without request");
            };
            DataAtom::Last {
                bytes: atom_size,
                request,
            }
        } else {
            DataAtom::Partial {
                uid: request.fetch.uid,
                bytes: atom_size,
            }
        };
        self.rwq.push(atom);
        command
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{CommandKind, Request, DRAM};
    use crate::{config, mcu, mem_fetch};
    use pretty_assertions_sorted as diff;

    pub(crate) fn fetch(
        kind: mem_fetch::access::Kind,
        bank: u64,
        row: u64,
        req_size_bytes: u32,
    ) -> mem_fetch::MemFetch {
        mem_fetch::Builder {
            access: mem_fetch::access::Builder {
                kind,
                addr: row << 16 | bank << 8,
                req_size_bytes,
                source: 0,
            }
            .build(),
            physical_addr: mcu::PhysicalAddress {
                bank,
                row,
                ..mcu::PhysicalAddress::default()
            },
        }
        .build()
    }

    pub(crate) fn request(bank: usize, row: u64) -> Request {
        Request::new(
            fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, bank as u64, row, 32),
            0,
        )
    }

    pub(crate) fn small_tier(scheduler: config::DRAMSchedulerKind) -> config::Tier {
        let mut tier = config::Tier {
            scheduler,
            ..config::Tier::default()
        };
        tier.timing.nbk = 4;
        tier.timing.nbkgrp = 1;
        tier.timing.t_rcd = 12;
        tier.timing.t_ras = 21;
        tier.timing.t_rp = 13;
        tier.timing.t_rc = 34;
        tier.timing.cl = 9;
        tier
    }

    /// Run the channel, collecting `(cycle, command)` pairs.
    fn run(dram: &mut DRAM, cycles: std::ops::RangeInclusive<u64>) -> Vec<(u64, CommandKind, usize)> {
        cycles
            .filter_map(|cycle| dram.cycle(cycle).map(|cmd| (cycle, cmd.kind, cmd.bank)))
            .collect()
    }

    /// Two bank groups of two banks with long intra-group delays.
    pub(crate) fn grouped_tier(scheduler: config::DRAMSchedulerKind) -> config::Tier {
        let mut tier = small_tier(scheduler);
        tier.timing.nbkgrp = 2;
        tier.timing.t_ccdl = 10;
        tier.timing.t_rtpl = 3;
        tier
    }

    /// Feed random traffic and check every timer either counts down or is
    /// reset to its configured value by the issued command.
    fn random_traffic_keeps_timer_invariants(tier: &config::Tier) {
        let mut dram = DRAM::new(0, 0, tier);
        let timings = dram.timings().clone();
        let mut seed = 7u64;
        let mut replies = 0;
        for cycle in 1..6000u64 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            if cycle < 1000 && !dram.full() && seed >> 60 == 0 {
                let bank = (seed >> 20) % 4;
                let row = (seed >> 30) % 3;
                let kind = if (seed >> 40) % 3 == 0 {
                    mem_fetch::access::Kind::GLOBAL_ACC_W
                } else {
                    mem_fetch::access::Kind::GLOBAL_ACC_R
                };
                dram.push(fetch(kind, bank, row, 64), cycle);
            }

            let before = dram.timers();
            let command = dram.cycle(cycle);
            let after = dram.timers();

            let check = |before: &[u64], after: &[u64], configured: &[u64]| {
                for ((before, after), configured) in
                    before.iter().zip(after).zip(configured)
                {
                    let counted_down = *after == before.saturating_sub(1);
                    let reset = command.is_some() && *after == configured.saturating_sub(1);
                    assert!(
                        counted_down || reset,
                        "cycle {cycle}: timer went from {before} to {after} (configured {configured})"
                    );
                }
            };
            check(&before.channel.to_array()[..], &after.channel.to_array()[..], &timings.channel()[..]);
            for (before, after) in before.banks.iter().zip(&after.banks) {
                check(&before.to_array()[..], &after.to_array()[..], &timings.bank()[..]);
            }
            for (before, after) in before.bank_groups.iter().zip(&after.bank_groups) {
                check(&before.to_array()[..], &after.to_array()[..], &timings.bank_group()[..]);
            }

            while dram.return_queue_pop().is_some() {
                replies += 1;
            }
            assert_eq!(
                dram.num_admitted() - dram.num_retired(),
                dram.num_resident() as u64
            );
        }
        assert!(replies > 0);
        assert_eq!(dram.num_resident(), 0);
        assert_eq!(dram.num_admitted(), replies);
        assert!(dram.stats.is_consistent());
        assert_eq!(mem_fetch::total_live_fetches(), 0);
    }

    macro_rules! scheduler_tests {
        ($($name:ident: $kind:expr,)*) => {
            $(
                paste::paste! {
                    #[test]
                    fn [<activate_then_read_after_rcd_ $name>]() {
                        crate::testing::init_logging();
                        let mut dram = DRAM::new(0, 0, &small_tier($kind));
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 1, 32), 1);

                        let commands = run(&mut dram, 1..=21);
                        diff::assert_eq!(
                            commands,
                            vec![(1, CommandKind::ACTIVATE, 0), (13, CommandKind::READ, 0)]
                        );
                        // data arrives CL cycles after the read
                        assert!(dram.return_queue_top().is_none());
                        assert_eq!(dram.cycle(22), None);
                        let reply = dram.return_queue_pop().expect("read reply");
                        assert_eq!(reply.kind, mem_fetch::Kind::READ_REPLY);
                        assert_eq!(reply.status, mem_fetch::Status::IN_PARTITION_MC_RETURNQ);
                        assert_eq!(reply.bytes_received, 32);
                        assert_eq!(dram.num_resident(), 0);
                    }

                    #[test]
                    fn [<row_conflict_precharges_ $name>]() {
                        crate::testing::init_logging();
                        let mut dram = DRAM::new(0, 0, &small_tier($kind));
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 1, 32), 1);
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 2, 32), 1);

                        let commands = run(&mut dram, 1..=60);
                        diff::assert_eq!(
                            commands,
                            vec![
                                (1, CommandKind::ACTIVATE, 0),
                                (13, CommandKind::READ, 0),
                                // tRAS after the activate
                                (22, CommandKind::PRECHARGE, 0),
                                // tRP after the precharge and tRC after the first activate
                                (35, CommandKind::ACTIVATE, 0),
                                (47, CommandKind::READ, 0),
                            ]
                        );
                        assert_eq!(dram.stats.num_activate, 2);
                        assert_eq!(dram.stats.num_precharge, 1);
                        assert_eq!(dram.stats.num_read, 2);
                    }

                    #[test]
                    fn [<timers_count_down_or_reset_ $name>]() {
                        random_traffic_keeps_timer_invariants(&small_tier($kind));
                    }

                    #[test]
                    fn [<bank_group_timers_count_down_or_reset_ $name>]() {
                        random_traffic_keeps_timer_invariants(&grouped_tier($kind));
                    }

                    #[test]
                    fn [<same_group_reads_are_spaced_by_ccdl_ $name>]() {
                        let mut dram = DRAM::new(0, 0, &grouped_tier($kind));
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 1, 32), 1);
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 1, 1, 32), 1);
                        let commands = run(&mut dram, 1..=30);
                        diff::assert_eq!(
                            commands,
                            vec![
                                (1, CommandKind::ACTIVATE, 0),
                                // tRRD after the first activate
                                (7, CommandKind::ACTIVATE, 1),
                                (13, CommandKind::READ, 0),
                                // tCCDL after the first read, tRCD alone would allow cycle 19
                                (23, CommandKind::READ, 1),
                            ]
                        );
                    }

                    #[test]
                    fn [<other_group_reads_are_spaced_by_ccd_ $name>]() {
                        let mut dram = DRAM::new(0, 0, &grouped_tier($kind));
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 1, 32), 1);
                        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 2, 1, 32), 1);
                        let commands = run(&mut dram, 1..=30);
                        diff::assert_eq!(
                            commands,
                            vec![
                                (1, CommandKind::ACTIVATE, 0),
                                (7, CommandKind::ACTIVATE, 2),
                                (13, CommandKind::READ, 0),
                                (19, CommandKind::READ, 2),
                            ]
                        );
                    }

                    #[test]
                    fn [<writebacks_complete_without_reply_ $name>]() {
                        let mut dram = DRAM::new(0, 0, &small_tier($kind));
                        dram.push(fetch(mem_fetch::access::Kind::L2_WRBK_ACC, 2, 0, 128), 1);
                        let mut completed = vec![];
                        for cycle in 1..100 {
                            dram.cycle(cycle);
                            completed.extend(dram.drain_completed());
                        }
                        assert!(dram.return_queue_top().is_none());
                        assert_eq!(completed.len(), 1);
                        assert_eq!(completed[0].bytes_received, 128);
                        assert_eq!(dram.stats.num_write, 4);
                        assert_eq!(dram.num_admitted(), dram.num_retired());
                    }
                }
            )*
        }
    }

    scheduler_tests! {
        fifo: config::DRAMSchedulerKind::FIFO,
        frfcfs: config::DRAMSchedulerKind::FrFcfs,
    }

    #[test]
    fn admission_is_refused_when_full() {
        let mut tier = small_tier(config::DRAMSchedulerKind::FrFcfs);
        tier.input_queue_size = 2;
        let mut dram = DRAM::new(0, 0, &tier);
        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 0, 32), 0);
        assert!(!dram.full());
        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 1, 0, 32), 0);
        assert!(dram.full());
        dram.cycle(1);
        assert!(!dram.full());
        assert_eq!(dram.stats.max_mrqs_temp, 2);
    }

    #[test]
    #[should_panic(expected = "address/config inconsistency")]
    fn push_to_wrong_channel_panics() {
        let mut dram = DRAM::new(3, 0, &small_tier(config::DRAMSchedulerKind::FIFO));
        dram.push(fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 0, 0, 32), 0);
    }

    #[test]
    fn pending_page_scan() {
        let mut dram = DRAM::new(0, 0, &small_tier(config::DRAMSchedulerKind::FrFcfs));
        let fetch = fetch(mem_fetch::access::Kind::GLOBAL_ACC_R, 1, 3, 32);
        let page = fetch.page(4096);
        dram.push(fetch, 0);
        assert!(dram.has_pending(page, 4096));
        assert!(!dram.has_pending(page + 4096, 4096));
        for cycle in 1..50 {
            dram.cycle(cycle);
        }
        assert!(!dram.has_pending(page, 4096));
    }
}
