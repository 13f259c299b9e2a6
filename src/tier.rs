use crate::{address, config};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Mapping from page address to the tier hosting it.
///
/// Pages that were never migrated live on their initial placement,
/// which is a pure function of the page address.
#[derive(Debug, Clone)]
pub struct TierMap {
    page_size: u64,
    placement: config::Placement,
    num_tiers: usize,
    migrated: HashMap<address, usize>,
    num_flips: u64,
}

impl TierMap {
    #[must_use]
    pub fn new(page_size: u64, placement: config::Placement, num_tiers: usize) -> Self {
        Self {
            page_size,
            placement,
            num_tiers,
            migrated: HashMap::new(),
            num_flips: 0,
        }
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[must_use]
    pub fn page_of(&self, addr: address) -> address {
        addr & !(self.page_size - 1)
    }

    #[must_use]
    pub fn initial_tier(&self, page: address) -> usize {
        let default_tier = self.placement.default_tier;
        match self.placement.default_tier_percent {
            Some(percent) if self.num_tiers > 1 => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                (page / self.page_size).hash(&mut hasher);
                if hasher.finish() % 100 < u64::from(percent) {
                    default_tier
                } else {
                    (default_tier + 1) % self.num_tiers
                }
            }
            _ => default_tier,
        }
    }

    /// Tier currently hosting the page of `addr`.
    #[must_use]
    pub fn tier_of(&self, addr: address) -> usize {
        let page = self.page_of(addr);
        self.migrated
            .get(&page)
            .copied()
            .unwrap_or_else(|| self.initial_tier(page))
    }

    #[must_use]
    pub fn was_migrated(&self, addr: address) -> bool {
        self.migrated.contains_key(&self.page_of(addr))
    }

    /// Publish the new location of a page.
    pub fn flip(&mut self, page: address, tier: usize) {
        assert_eq!(page, self.page_of(page), "flip of unaligned page {page:#x}");
        assert!(tier < self.num_tiers, "flip to unknown tier {tier}");
        let previous = self.tier_of(page);
        assert_ne!(previous, tier, "page {page:#x} already lives on tier {tier}");
        log::debug!("tier map: page {:#x} moves {} -> {}", page, previous, tier);
        self.migrated.insert(page, tier);
        self.num_flips += 1;
    }

    #[must_use]
    pub fn num_flips(&self) -> u64 {
        self.num_flips
    }
}

#[cfg(test)]
mod tests {
    use super::TierMap;
    use crate::config;

    #[test]
    fn default_placement_and_flip() {
        let mut map = TierMap::new(4096, config::Placement::default(), 2);
        assert_eq!(map.tier_of(0x1234), 0);
        map.flip(0x1000, 1);
        assert_eq!(map.tier_of(0x1234), 1);
        assert_eq!(map.tier_of(0x1fff), 1);
        assert_eq!(map.tier_of(0x2000), 0);
        assert!(map.was_migrated(0x1abc));
        assert_eq!(map.num_flips(), 1);
    }

    #[test]
    fn ratio_placement_is_stable() {
        let placement = config::Placement {
            default_tier: 0,
            default_tier_percent: Some(50),
        };
        let map = TierMap::new(4096, placement, 2);
        let tiers: Vec<usize> = (0..256).map(|page| map.tier_of(page * 4096)).collect();
        let again: Vec<usize> = (0..256).map(|page| map.tier_of(page * 4096 + 100)).collect();
        assert_eq!(tiers, again);
        assert!(tiers.contains(&0));
        assert!(tiers.contains(&1));
    }

    #[test]
    #[should_panic(expected = "already lives on tier")]
    fn flip_to_same_tier_panics() {
        let mut map = TierMap::new(4096, config::Placement::default(), 2);
        map.flip(0x1000, 0);
    }
}
