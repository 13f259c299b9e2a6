use super::mem::AccessKind;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters handed to a power model.
///
/// Read-only snapshot, nothing in the simulator depends on it.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerCounters {
    pub cmd: u64,
    pub activity: u64,
    pub nop: u64,
    pub act: u64,
    pub pre: u64,
    pub rd: u64,
    pub wr: u64,
    pub req: u64,
}

/// Number of requests per epoch, split by origin.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub migration_reads: u64,
    pub migration_writes: u64,
    pub ordinary: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub num_accesses: u64,
    pub num_idle: u64,
}

/// DRAM statistics of a single channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DRAM {
    pub channel_id: usize,
    pub num_cmd: u64,
    pub num_nop: u64,
    pub num_activate: u64,
    pub num_precharge: u64,
    pub num_req: u64,
    pub num_read: u64,
    pub num_write: u64,
    pub num_activity: u64,
    /// Data bus cycles spent transferring data
    pub bwutil: u64,
    pub max_mrqs: u64,
    pub total_mrqs: u64,
    /// Maximum number of pending requests since the last report
    pub max_mrqs_temp: u64,
    pub num_migration_reads: u64,
    pub num_migration_writes: u64,
    pub num_ordinary: u64,
    pub epochs: Vec<Epoch>,
    pub banks: Vec<Bank>,
    /// Requests per bank and row
    pub request_dist: BTreeMap<u64, BTreeMap<u64, u64>>,
    /// Bank accesses per access kind
    pub bank_accesses: ndarray::Array2<u64>,
}

impl DRAM {
    #[must_use]
    pub fn new(channel_id: usize, num_banks: usize) -> Self {
        Self {
            channel_id,
            num_cmd: 0,
            num_nop: 0,
            num_activate: 0,
            num_precharge: 0,
            num_req: 0,
            num_read: 0,
            num_write: 0,
            num_activity: 0,
            bwutil: 0,
            max_mrqs: 0,
            total_mrqs: 0,
            max_mrqs_temp: 0,
            num_migration_reads: 0,
            num_migration_writes: 0,
            num_ordinary: 0,
            epochs: vec![Epoch::default()],
            banks: vec![
                Bank {
                    num_accesses: 0,
                    num_idle: 0
                };
                num_banks
            ],
            request_dist: BTreeMap::new(),
            bank_accesses: ndarray::Array2::zeros((num_banks, AccessKind::count())),
        }
    }

    pub fn record_request(&mut self, kind: AccessKind, bank: u64, row: u64) {
        self.num_req += 1;
        let epoch = self
            .epochs
            .last_mut()
            .expect("dram stats always have an epoch");
        match kind {
            AccessKind::MIGRATE_R => {
                self.num_migration_reads += 1;
                epoch.migration_reads += 1;
            }
            AccessKind::MIGRATE_W => {
                self.num_migration_writes += 1;
                epoch.migration_writes += 1;
            }
            _ => {
                self.num_ordinary += 1;
                epoch.ordinary += 1;
            }
        }
        *self
            .request_dist
            .entry(bank)
            .or_default()
            .entry(row)
            .or_insert(0) += 1;
        self.bank_accesses[[bank as usize, kind as usize]] += 1;
    }

    pub fn next_epoch(&mut self) {
        self.epochs.push(Epoch::default());
    }

    /// Requests are split consistently into migration and ordinary traffic.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.num_migration_reads + self.num_migration_writes + self.num_ordinary == self.num_req
    }

    #[must_use]
    pub fn bandwidth_utilization(&self) -> f64 {
        if self.num_cmd == 0 {
            return 0.0;
        }
        self.bwutil as f64 / self.num_cmd as f64
    }

    #[must_use]
    pub fn efficiency(&self) -> f64 {
        if self.num_activity == 0 {
            return 0.0;
        }
        self.bwutil as f64 / self.num_activity as f64
    }

    #[must_use]
    pub fn average_mrqs(&self) -> f64 {
        if self.num_cmd == 0 {
            return 0.0;
        }
        self.total_mrqs as f64 / self.num_cmd as f64
    }

    #[must_use]
    pub fn power_counters(&self) -> PowerCounters {
        PowerCounters {
            cmd: self.num_cmd,
            activity: self.num_activity,
            nop: self.num_nop,
            act: self.num_activate,
            pre: self.num_precharge,
            rd: self.num_read,
            wr: self.num_write,
            req: self.num_req,
        }
    }

    #[must_use]
    pub fn accesses_of_kind(&self, kind: AccessKind) -> u64 {
        self.bank_accesses.slice(s![.., kind as usize]).sum()
    }
}

impl std::fmt::Display for DRAM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "DRAM[{}]: n_cmd={} n_nop={} n_act={} n_pre={} n_req={} n_rd={} n_write={} bw_util={:.4}",
            self.channel_id,
            self.num_cmd,
            self.num_nop,
            self.num_activate,
            self.num_precharge,
            self.num_req,
            self.num_read,
            self.num_write,
            self.bandwidth_utilization(),
        )?;
        writeln!(
            f,
            "DRAM[{}]: n_migration_read={} n_migration_write={} n_actual={}",
            self.channel_id, self.num_migration_reads, self.num_migration_writes, self.num_ordinary,
        )?;
        if !self.is_consistent() {
            writeln!(f, "DRAM[{}]: ERROR request counts are inconsistent", self.channel_id)?;
        }
        writeln!(
            f,
            "DRAM[{}]: n_activity={} dram_eff={:.4} mrqq_max={} mrqq_avg={:.4}",
            self.channel_id,
            self.num_activity,
            self.efficiency(),
            self.max_mrqs,
            self.average_mrqs(),
        )?;
        for (bank_id, bank) in self.banks.iter().enumerate() {
            write!(f, "bk{}: {}a {}i ", bank_id, bank.num_accesses, bank.num_idle)?;
        }
        writeln!(f)?;
        for (i, epoch) in self.epochs.iter().enumerate() {
            writeln!(
                f,
                "DRAM[{}]: epoch={} migration_reads={} migration_writes={} actual={}",
                self.channel_id, i, epoch.migration_reads, epoch.migration_writes, epoch.ordinary
            )?;
        }
        Ok(())
    }
}
