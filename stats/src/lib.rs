#![allow(non_camel_case_types, clippy::upper_case_acronyms)]

pub mod cache;
pub mod dram;
pub mod mem;
pub mod migration;
pub mod sim;

pub use cache::Cache;
pub use dram::DRAM;
pub use mem::Accesses;
pub use migration::Migration;
pub use sim::Sim;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub accesses: Accesses,
    pub sim: Sim,
    pub dram: Vec<DRAM>,
    pub l2: Cache,
    pub migration: Migration,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sim_cycles = {}", self.sim.cycles)?;
        writeln!(f, "l2_cycles = {}", self.sim.l2_cycles)?;
        writeln!(f, "interconn_cycles = {}", self.sim.interconn_cycles)?;
        for (tier, cycles) in self.sim.dram_cycles.iter().enumerate() {
            writeln!(f, "dram_cycles[{tier}] = {cycles}")?;
        }
        writeln!(f, "num_submitted = {}", self.sim.num_submitted)?;
        writeln!(f, "num_delivered = {}", self.sim.num_delivered)?;
        writeln!(f, "stall_icnt2sh = {}", self.sim.stall_interconn_to_core)?;
        writeln!(f, "stall_dramfull = {}", self.sim.stall_dram_full)?;
        writeln!(f, "num_reads = {}", self.accesses.num_reads())?;
        writeln!(f, "num_writes = {}", self.accesses.num_writes())?;
        let l2 = self.l2.total();
        writeln!(
            f,
            "l2: hits={} misses={} mshr_hits={} reservation_fails={} hit_rate={:.4}",
            l2.hits,
            l2.misses,
            l2.mshr_hits,
            l2.reservation_fails,
            self.l2.hit_rate()
        )?;
        for dram in &self.dram {
            write!(f, "{dram}")?;
        }
        write!(f, "{}", self.migration)
    }
}
