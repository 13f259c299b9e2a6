use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sim {
    /// Cycles of the outermost loop
    pub cycles: u64,
    pub l2_cycles: u64,
    pub interconn_cycles: u64,
    pub dram_cycles: Vec<u64>,
    pub num_submitted: u64,
    pub num_delivered: u64,
    /// Cycles where the interconnect could not take a reply
    pub stall_interconn_to_core: u64,
    /// Cycles where a sub partition could not accept a request
    pub stall_dram_full: u64,
}
