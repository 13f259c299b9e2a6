use crate::address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    /// Selected for migration, ordinary traffic still flows
    Marked,
    /// Waiting for outstanding traffic of the page to clear
    Draining,
    /// Migration reads issued to the source channel
    Migrating,
    /// Migration writes issued to the destination channels
    Completing,
}

impl State {
    /// Whether ordinary accesses to the page are held back.
    #[must_use]
    pub fn blocks_accesses(self) -> bool {
        !matches!(self, Self::Marked)
    }

    /// Whether the migration can still be abandoned.
    #[must_use]
    pub fn is_abandonable(self) -> bool {
        matches!(self, Self::Marked | Self::Draining)
    }
}

/// Conditions that clear before a page is migrated.
///
/// Conditions clear in declaration order.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DrainStatus {
    /// No request for the page in the interconnect
    pub interconn: bool,
    /// No request for the page before any L2
    pub sub_partition_input: bool,
    /// No line of the page cached or pending in any L2
    pub cache_flush: bool,
    /// No request for the page between the L2 and the DRAM banks
    pub cache_to_dram: bool,
    /// No request for the page pending in the DRAM controller
    pub controller: bool,
}

impl DrainStatus {
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.interconn
            && self.sub_partition_input
            && self.cache_flush
            && self.cache_to_dram
            && self.controller
    }
}

/// Synthetic requests of one migration phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Progress {
    /// Requests issued so far
    pub num_sent: usize,
    /// Requests observed complete
    pub num_done: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub page: address,
    pub source_tier: usize,
    pub destination_tier: usize,
    /// Global id of the channel hosting the page on the source tier
    pub source_channel: usize,
    pub state: State,
    pub drain: DrainStatus,
    /// Cycles spent draining
    pub wait_cycles: u64,
    pub reads: Progress,
    pub writes: Progress,
}

impl Entry {
    #[must_use]
    pub fn new(page: address, source_tier: usize, destination_tier: usize, source_channel: usize) -> Self {
        Self {
            page,
            source_tier,
            destination_tier,
            source_channel,
            state: State::Marked,
            drain: DrainStatus::default(),
            wait_cycles: 0,
            reads: Progress::default(),
            writes: Progress::default(),
        }
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Migration({:#x} tier {}->{} {:?} reads={}/{} writes={}/{})",
            self.page,
            self.source_tier,
            self.destination_tier,
            self.state,
            self.reads.num_done,
            self.reads.num_sent,
            self.writes.num_done,
            self.writes.num_sent,
        )
    }
}
