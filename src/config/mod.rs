pub mod timing;

pub use timing::Timing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid dram timing {0:?}")]
    Timing(String),

    #[error("invalid address mapping {mapping:?}: {reason}")]
    AddressMapping { mapping: String, reason: String },

    #[error("tier {tier}: {reason}")]
    InvalidTier { tier: usize, reason: String },

    #[error("tier {tier}: private credits ({private}) exceed the channel capacity ({capacity})")]
    InconsistentQueueSizes {
        tier: usize,
        private: usize,
        capacity: usize,
    },

    #[error(
        "tier {tier}: pages of {page_size} bytes straddle channels (channel bits start at bit {chip_start})"
    )]
    PageStraddlesChannels {
        tier: usize,
        page_size: u64,
        chip_start: usize,
    },

    #[error(
        "tier {tier}: {bank_bits} bank address bits need at most {nbk} banks and select {sub_partitions} sub partitions"
    )]
    BankBits {
        tier: usize,
        bank_bits: u32,
        nbk: usize,
        sub_partitions: usize,
    },

    #[error("invalid migration config: {0}")]
    Migration(String),

    #[error("failed to read config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// DRAM scheduler kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DRAMSchedulerKind {
    FIFO,
    FrFcfs,
}

/// Unified L2 cache slice of a sub partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Cache {
    pub num_sets: usize,
    pub associativity: usize,
    pub line_size: u32,
    pub mshr_entries: usize,
    pub mshr_max_merge: usize,
}

impl Default for L2Cache {
    fn default() -> Self {
        Self {
            num_sets: 64,
            associativity: 16,
            line_size: 128,
            mshr_entries: 32,
            mshr_max_merge: 4,
        }
    }
}

impl L2Cache {
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.line_size as usize * self.num_sets * self.associativity
    }
}

/// A memory technology with its own channels and timing.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier {
    pub name: String,
    /// Number of memory channels (controllers)
    pub num_channels: usize,
    /// Number of L2 sub partitions per channel
    pub num_sub_partitions_per_channel: usize,
    /// Number of DRAM chips per channel
    pub num_chips_per_channel: usize,
    #[serde(deserialize_with = "timing::deserialize")]
    pub timing: Timing,
    /// Bus width of a single chip in bytes
    pub bus_width: usize,
    /// Burst length of each DRAM request
    pub burst_length: usize,
    /// Frequency ratio between the DRAM data bus and the command bus
    pub data_command_freq_ratio: usize,
    pub scheduler: DRAMSchedulerKind,
    /// Requests buffered in the scheduler (0 = unlimited)
    pub frfcfs_sched_queue_size: usize,
    /// Row hits served ahead of the oldest request of a bank (0 = unbounded)
    pub frfcfs_max_promotions: usize,
    /// Depth of the admission queue of the channel (0 = unlimited)
    pub input_queue_size: usize,
    /// Completed requests buffered in the return queue (0 = 1024)
    pub return_queue_size: usize,
    /// Additional latency between the L2 and the memory controller
    pub dram_latency: u64,
    /// Latency of the raster operations pipeline in front of the L2
    pub l2_rop_latency: u64,
    pub interconn_to_l2_queue_size: usize,
    pub l2_to_dram_queue_size: usize,
    pub dram_to_l2_queue_size: usize,
    pub l2_to_interconn_queue_size: usize,
    /// Address mapping in the `dramid@<start>;<64 bit map>` syntax
    pub address_mapping: String,
    /// DRAM command clock frequency in MHz
    pub clock_frequency_mhz: f64,
    pub l2: Option<L2Cache>,
}

impl Default for Tier {
    fn default() -> Self {
        Self {
            name: "capacity".to_string(),
            num_channels: 4,
            num_sub_partitions_per_channel: 2,
            num_chips_per_channel: 1,
            timing: Timing::default(),
            bus_width: 4,
            burst_length: 8,
            data_command_freq_ratio: 4,
            scheduler: DRAMSchedulerKind::FrFcfs,
            frfcfs_sched_queue_size: 64,
            frfcfs_max_promotions: 16,
            input_queue_size: 64,
            return_queue_size: 116,
            dram_latency: 100,
            l2_rop_latency: 120,
            interconn_to_l2_queue_size: 8,
            l2_to_dram_queue_size: 8,
            dram_to_l2_queue_size: 8,
            l2_to_interconn_queue_size: 8,
            address_mapping:
                "dramid@12;00000000.00000000.00000000.00000000.0000RRRR.RRRRRRRR.RBBBCCCC.BCCSSSSS"
                    .to_string(),
            clock_frequency_mhz: 924.0,
            l2: Some(L2Cache::default()),
        }
    }
}

impl Tier {
    /// The bandwidth tier of the default configuration.
    #[must_use]
    pub fn bandwidth() -> Self {
        Self {
            name: "bandwidth".to_string(),
            num_channels: 8,
            timing: Timing {
                nbk: 16,
                t_ccd: 1,
                t_rrd: 3,
                t_rcd: 12,
                t_ras: 28,
                t_rp: 12,
                t_rc: 40,
                cl: 12,
                wl: 2,
                t_cdlr: 3,
                t_wr: 10,
                nbkgrp: 4,
                t_ccdl: 2,
                t_rtpl: 3,
            },
            bus_width: 16,
            burst_length: 2,
            data_command_freq_ratio: 2,
            dram_latency: 60,
            clock_frequency_mhz: 1000.0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn num_sub_partitions(&self) -> usize {
        self.num_channels * self.num_sub_partitions_per_channel
    }

    /// Bytes transferred per data burst.
    #[must_use]
    pub fn dram_atom_size(&self) -> usize {
        self.burst_length * self.bus_width * self.num_chips_per_channel
    }

    /// Data bus cycles per burst in command clock cycles.
    #[must_use]
    pub fn burst_cycles(&self) -> u64 {
        (self.burst_length / self.data_command_freq_ratio) as u64
    }

    /// Read to write turnaround.
    #[must_use]
    pub fn t_rtw(&self) -> u64 {
        (self.timing.cl + self.burst_cycles() + 2).saturating_sub(self.timing.wl)
    }

    /// Write to read turnaround.
    #[must_use]
    pub fn t_wtr(&self) -> u64 {
        self.timing.wl + self.burst_cycles() + self.timing.t_cdlr
    }

    /// Write to precharge delay.
    #[must_use]
    pub fn t_wtp(&self) -> u64 {
        self.timing.wl + self.burst_cycles() + self.timing.t_wr
    }

    /// Row to column delay for writes.
    #[must_use]
    pub fn t_rcdwr(&self) -> u64 {
        self.timing.t_rcd.saturating_sub(self.timing.wl + 1)
    }

    #[must_use]
    pub fn return_queue_capacity(&self) -> usize {
        if self.return_queue_size == 0 {
            1024
        } else {
            self.return_queue_size
        }
    }

    fn validate(&self, tier: usize, migration: &Migration) -> Result<(), Error> {
        let invalid = |reason: &str| Error::InvalidTier {
            tier,
            reason: reason.to_string(),
        };
        if self.num_channels == 0 {
            return Err(invalid("at least one channel is required"));
        }
        if !self.num_sub_partitions_per_channel.is_power_of_two() {
            return Err(invalid("sub partitions per channel must be a power of two"));
        }
        if self.timing.nbk == 0 || self.timing.nbkgrp == 0 || self.timing.nbk % self.timing.nbkgrp != 0
        {
            return Err(invalid("banks must divide evenly into bank groups"));
        }
        if self.timing.cl == 0 || self.timing.wl == 0 {
            return Err(invalid("CL and WL must be at least one cycle"));
        }
        if self.data_command_freq_ratio == 0 || self.burst_length < self.data_command_freq_ratio {
            return Err(invalid("burst length must cover the data/command frequency ratio"));
        }
        if self.dram_atom_size() == 0 {
            return Err(invalid("dram atom size must be non-zero"));
        }
        if self.clock_frequency_mhz <= 0.0 {
            return Err(invalid("clock frequency must be positive"));
        }
        if let Some(l2) = &self.l2 {
            if l2.num_sets == 0 || l2.associativity == 0 || !l2.line_size.is_power_of_two() {
                return Err(invalid("invalid l2 geometry"));
            }
            if l2.mshr_entries == 0 {
                return Err(invalid("l2 needs at least one mshr entry"));
            }
        }
        for size in [
            self.interconn_to_l2_queue_size,
            self.l2_to_dram_queue_size,
            self.dram_to_l2_queue_size,
            self.l2_to_interconn_queue_size,
        ] {
            if size < 2 {
                return Err(invalid("partition queues must hold at least two entries"));
            }
        }

        let private = self.num_sub_partitions_per_channel;
        if self.frfcfs_sched_queue_size > 0 && self.return_queue_size > 0 {
            let capacity = self.frfcfs_sched_queue_size + self.return_queue_size;
            if private > capacity {
                return Err(Error::InconsistentQueueSizes {
                    tier,
                    private,
                    capacity,
                });
            }
        }

        let mapping = crate::mcu::Config::parse_accelsim_config(&self.address_mapping)?;
        let chip_start = mapping.addr_chip_start.ok_or_else(|| Error::AddressMapping {
            mapping: self.address_mapping.clone(),
            reason: "missing dramid@<start>".to_string(),
        })?;
        if (chip_start as u32) < migration.page_size.ilog2() {
            return Err(Error::PageStraddlesChannels {
                tier,
                page_size: migration.page_size,
                chip_start,
            });
        }

        let mem_controller = crate::mcu::MemoryControllerUnit::new(tier, self, 0, 0)?;
        let bank_bits = mem_controller.decode_config().bank.mask.count_ones();
        let sub_partition_bits = self.num_sub_partitions_per_channel.ilog2();
        if bank_bits >= usize::BITS
            || 1usize << bank_bits > self.timing.nbk
            || bank_bits < sub_partition_bits
        {
            return Err(Error::BankBits {
                tier,
                bank_bits,
                nbk: self.timing.nbk,
                sub_partitions: self.num_sub_partitions_per_channel,
            });
        }
        Ok(())
    }
}

/// Page migration between the tiers.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Migration {
    pub enabled: bool,
    /// Accesses to a page on the L2 to DRAM path before it is marked
    pub threshold: u64,
    /// Neighbouring pages marked on each side of a hot page
    pub range_expansion: u64,
    /// Pages marked per trigger
    pub max_migrations: usize,
    /// Minimum cycles a drained page waits before migration is issued
    pub migration_cost: u64,
    pub page_size: u64,
    pub requests_per_page: usize,
    pub request_size: u32,
    /// Flip the tier of a page without synthetic traffic
    pub magical: bool,
    pub limit_rate: bool,
    /// Share of requests (in percent) served by the bandwidth tier above which
    /// migration is paused
    pub pause_above: u64,
    /// Tier the monitor migrates pages away from
    pub source_tier: usize,
    /// Tier the monitor migrates pages to
    pub destination_tier: usize,
}

impl Default for Migration {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 128,
            range_expansion: 0,
            max_migrations: 1,
            migration_cost: 0,
            page_size: 4096,
            requests_per_page: 32,
            request_size: 128,
            magical: false,
            limit_rate: false,
            pause_above: 65,
            source_tier: 0,
            destination_tier: 1,
        }
    }
}

/// Initial placement of pages that were never migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub default_tier: usize,
    /// Percentage of pages placed on the default tier, the remaining pages
    /// are placed on the next tier
    pub default_tier_percent: Option<u8>,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            default_tier: 0,
            default_tier_percent: None,
        }
    }
}

/// Clock frequencies of the non-DRAM domains in MHz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clock {
    pub core_mhz: f64,
    pub interconn_mhz: f64,
    pub l2_mhz: f64,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            core_mhz: 1417.0,
            interconn_mhz: 1417.0,
            l2_mhz: 1417.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySystem {
    pub tiers: Vec<Tier>,
    pub clock: Clock,
    pub migration: Migration,
    pub placement: Placement,
    /// Number of requesters attached to the interconnect
    pub num_requesters: usize,
    /// Buffer size of each interconnect destination (unlimited if `None`)
    pub interconn_buffer_size: Option<usize>,
    pub interconn_latency: u64,
    /// Accesses injected into the interconnect per core cycle
    pub injection_width: usize,
    pub stats_epoch_cycles: u64,
    /// Start logging per cycle debug output after this cycle
    pub log_after_cycle: Option<u64>,
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self {
            tiers: vec![Tier::default(), Tier::bandwidth()],
            clock: Clock::default(),
            migration: Migration::default(),
            placement: Placement::default(),
            num_requesters: 1,
            interconn_buffer_size: Some(64),
            interconn_latency: 0,
            injection_width: 1,
            stats_epoch_cycles: 100_000,
            log_after_cycle: None,
        }
    }
}

impl MemorySystem {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_reader(std::io::BufReader::new(reader))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tiers.is_empty() {
            return Err(Error::InvalidTier {
                tier: 0,
                reason: "at least one tier is required".to_string(),
            });
        }
        let migration = &self.migration;
        if !migration.page_size.is_power_of_two() {
            return Err(Error::Migration("page size must be a power of two".to_string()));
        }
        if migration.requests_per_page as u64 * u64::from(migration.request_size)
            != migration.page_size
        {
            return Err(Error::Migration(format!(
                "{} requests of {} bytes do not cover a page of {} bytes",
                migration.requests_per_page, migration.request_size, migration.page_size
            )));
        }
        let num_tiers = self.tiers.len();
        if migration.enabled
            && (migration.source_tier >= num_tiers
                || migration.destination_tier >= num_tiers
                || migration.source_tier == migration.destination_tier)
        {
            return Err(Error::Migration(
                "migration needs two distinct configured tiers".to_string(),
            ));
        }
        if self.placement.default_tier >= num_tiers {
            return Err(Error::Migration(format!(
                "default tier {} is not configured",
                self.placement.default_tier
            )));
        }
        if matches!(self.placement.default_tier_percent, Some(p) if p > 100) {
            return Err(Error::Migration(
                "placement percentage exceeds 100".to_string(),
            ));
        }
        if self.num_requesters == 0 || self.injection_width == 0 {
            return Err(Error::Migration(
                "at least one requester injecting one access per cycle is required".to_string(),
            ));
        }
        if self.clock.core_mhz <= 0.0 || self.clock.interconn_mhz <= 0.0 || self.clock.l2_mhz <= 0.0
        {
            return Err(Error::Migration("clock frequencies must be positive".to_string()));
        }
        for (tier_id, tier) in self.tiers.iter().enumerate() {
            tier.validate(tier_id, migration)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn total_sub_partitions(&self) -> usize {
        self.tiers.iter().map(Tier::num_sub_partitions).sum()
    }

    #[must_use]
    pub fn total_channels(&self) -> usize {
        self.tiers.iter().map(|tier| tier.num_channels).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, MemorySystem};
    use color_eyre::eyre;

    #[test]
    fn default_config_is_valid() -> eyre::Result<()> {
        let config = MemorySystem::default();
        config.validate()?;
        assert_eq!(config.total_channels(), 12);
        assert_eq!(config.total_sub_partitions(), 24);
        Ok(())
    }

    #[test]
    fn derived_timing() {
        let tier = super::Tier::default();
        assert_eq!(tier.burst_cycles(), 2);
        assert_eq!(tier.t_rtw(), 12 + 2 + 2 - 4);
        assert_eq!(tier.t_wtr(), 4 + 2 + 5);
        assert_eq!(tier.t_wtp(), 4 + 2 + 12);
        assert_eq!(tier.dram_atom_size(), 32);
    }

    #[test]
    fn parse_yaml_with_timing_string() -> eyre::Result<()> {
        let config = MemorySystem::from_yaml(
            r#"
tiers:
  - name: capacity
    num_channels: 2
    timing: "nbk=4:CCD=2:RRD=6:RCD=12:RAS=21:RP=13:RC=34:CL=9:WL=4:CDLR=5:WR=12:nbkgrp=1:CCDL=0:RTPL=0"
    address_mapping: "dramid@12;00000000.00000000.00000000.00000000.0000RRRR.RRRRRRRR.RRRBCCCC.BCCSSSSS"
    scheduler: FIFO
"#,
        )?;
        assert_eq!(config.tiers.len(), 1);
        assert_eq!(config.tiers[0].timing.nbk, 4);
        assert_eq!(config.tiers[0].timing.cl, 9);
        Ok(())
    }

    #[test]
    fn reject_page_straddling_channels() {
        let mut config = MemorySystem::default();
        config.tiers[0].address_mapping =
            "dramid@8;00000000.00000000.00000000.00000000.0000RRRR.RRRRRRRR.RBBBCCCC.BCCSSSSS"
                .to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::PageStraddlesChannels { tier: 0, .. })
        ));
    }

    #[test]
    fn reject_more_bank_bits_than_banks() {
        let yaml = r#"
tiers:
  - name: capacity
    num_channels: 2
    timing: "nbk=4:CCD=2:RRD=6:RCD=12:RAS=21:RP=13:RC=34:CL=9:WL=4:CDLR=5:WR=12:nbkgrp=1:CCDL=0:RTPL=0"
"#;
        assert!(matches!(
            MemorySystem::from_yaml(yaml),
            Err(Error::BankBits {
                tier: 0,
                bank_bits: 4,
                nbk: 4,
                ..
            })
        ));
    }

    #[test]
    fn reject_too_few_bank_bits_for_sub_partitions() {
        let mut config = MemorySystem::default();
        config.tiers[0].num_sub_partitions_per_channel = 4;
        config.tiers[0].address_mapping =
            "dramid@12;00000000.00000000.00000000.00000000.0000RRRR.RRRRRRRR.RRRRCCCC.BCCSSSSS"
                .to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::BankBits { bank_bits: 1, sub_partitions: 4, .. })
        ));
    }

    #[test]
    fn reject_inconsistent_migration_granularity() {
        let mut config = MemorySystem::default();
        config.migration.requests_per_page = 16;
        assert!(matches!(config.validate(), Err(Error::Migration(_))));
    }
}
