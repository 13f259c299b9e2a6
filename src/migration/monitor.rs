use crate::{address, config, mem_fetch::access, mem_partition_unit::IssuedAccess};
use std::collections::HashMap;

/// Detection of hot pages on the capacity tier.
///
/// Counts the requests leaving the L2 towards DRAM per page.
#[derive(Debug, Clone)]
pub struct Monitor {
    threshold: u64,
    range_expansion: u64,
    max_migrations: usize,
    page_size: u64,
    source_tier: usize,
    counts: HashMap<address, u64>,
}

impl Monitor {
    #[must_use]
    pub fn new(config: &config::Migration) -> Self {
        Self {
            threshold: config.threshold.max(1),
            range_expansion: config.range_expansion,
            max_migrations: config.max_migrations,
            page_size: config.page_size,
            source_tier: config.source_tier,
            counts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn count(&self, page: address) -> u64 {
        self.counts.get(&page).copied().unwrap_or(0)
    }

    /// Record an access and return the pages to mark.
    ///
    /// `is_candidate` rejects pages that are queued, migrated or not hosted
    /// on the source tier.
    pub fn observe(
        &mut self,
        issued: &IssuedAccess,
        mut is_candidate: impl FnMut(address) -> bool,
    ) -> Vec<address> {
        if issued.tier != self.source_tier
            || issued.kind == access::Kind::INST_ACC_R
            || issued.kind.is_migration()
        {
            return Vec::new();
        }
        let page = issued.addr & !(self.page_size - 1);
        let count = self.counts.entry(page).or_insert(0);
        *count += 1;
        if *count < self.threshold {
            return Vec::new();
        }
        self.counts.remove(&page);

        let neighbours = (1..=self.range_expansion).flat_map(|distance| {
            let offset = distance * self.page_size;
            [page.checked_add(offset), page.checked_sub(offset)]
                .into_iter()
                .flatten()
        });
        let marked: Vec<address> = std::iter::once(page)
            .chain(neighbours)
            .filter(|&page| is_candidate(page))
            .take(self.max_migrations)
            .collect();
        log::debug!(
            "monitor: page {:#x} reached {} accesses, marking {:x?}",
            page,
            self.threshold,
            marked
        );
        marked
    }
}
