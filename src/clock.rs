use crate::config;
use smallvec::SmallVec;

/// Clock domains that advance in one step of the simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mask {
    pub core: bool,
    pub interconn: bool,
    pub l2: bool,
    /// One entry per memory tier
    pub dram: SmallVec<[bool; 2]>,
}

impl Mask {
    #[must_use]
    pub fn any(&self) -> bool {
        self.core || self.interconn || self.l2 || self.dram.iter().any(|&dram| dram)
    }
}

/// Independent clock domains of the memory system.
///
/// Each step advances the domains with the smallest accumulated time
/// by one of their periods.
#[derive(Debug, Clone)]
pub struct Clocks {
    core_period: f64,
    interconn_period: f64,
    l2_period: f64,
    dram_periods: SmallVec<[f64; 2]>,

    core_time: f64,
    interconn_time: f64,
    l2_time: f64,
    dram_times: SmallVec<[f64; 2]>,
}

fn period(mhz: f64) -> f64 {
    1.0 / (mhz * 1e6)
}

impl Clocks {
    #[must_use]
    pub fn new(config: &config::MemorySystem) -> Self {
        let dram_periods: SmallVec<[f64; 2]> = config
            .tiers
            .iter()
            .map(|tier| period(tier.clock_frequency_mhz))
            .collect();
        Self {
            core_period: period(config.clock.core_mhz),
            interconn_period: period(config.clock.interconn_mhz),
            l2_period: period(config.clock.l2_mhz),
            core_time: 0.0,
            interconn_time: 0.0,
            l2_time: 0.0,
            dram_times: smallvec::smallvec![0.0; dram_periods.len()],
            dram_periods,
        }
    }

    /// Select and advance the next clock domains.
    pub fn next(&mut self) -> Mask {
        let mut smallest = self
            .dram_times
            .iter()
            .copied()
            .fold(self.core_time.min(self.interconn_time), f64::min);
        let mut mask = Mask {
            dram: smallvec::smallvec![false; self.dram_times.len()],
            ..Mask::default()
        };
        if self.l2_time <= smallest {
            smallest = self.l2_time;
            mask.l2 = true;
            self.l2_time += self.l2_period;
        }
        if self.interconn_time <= smallest {
            mask.interconn = true;
            self.interconn_time += self.interconn_period;
        }
        for (tier, time) in self.dram_times.iter_mut().enumerate() {
            if *time <= smallest {
                mask.dram[tier] = true;
                *time += self.dram_periods[tier];
            }
        }
        if self.core_time <= smallest {
            mask.core = true;
            self.core_time += self.core_period;
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::Clocks;
    use crate::config;

    #[test]
    fn domains_advance_at_their_rates() {
        let mut config = config::MemorySystem::default();
        config.clock = config::Clock {
            core_mhz: 2000.0,
            interconn_mhz: 2000.0,
            l2_mhz: 1000.0,
        };
        config.tiers[0].clock_frequency_mhz = 500.0;
        config.tiers[1].clock_frequency_mhz = 1000.0;
        let mut clocks = Clocks::new(&config);

        let (mut core, mut l2, mut dram) = (0, 0, [0, 0]);
        for _ in 0..4000 {
            let mask = clocks.next();
            assert!(mask.any());
            core += u64::from(mask.core);
            l2 += u64::from(mask.l2);
            for (count, &ticked) in dram.iter_mut().zip(mask.dram.iter()) {
                *count += u64::from(ticked);
            }
        }
        // rounding of the accumulated times may split a tick into two steps
        assert!((3990..=4000).contains(&core), "core={core}");
        assert!(core.abs_diff(2 * l2) <= 4, "core={core} l2={l2}");
        assert!(l2.abs_diff(2 * dram[0]) <= 4, "l2={l2} dram={dram:?}");
        assert!(l2.abs_diff(dram[1]) <= 2, "l2={l2} dram={dram:?}");
    }

    #[test]
    fn all_domains_tick_first() {
        let mut clocks = Clocks::new(&config::MemorySystem::default());
        let mask = clocks.next();
        assert!(mask.core && mask.interconn && mask.l2);
        assert!(mask.dram.iter().all(|&dram| dram));
    }
}
