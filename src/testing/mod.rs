use crate::{config, mem_fetch::access};

static LOGGER: std::sync::Once = std::sync::Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

/// Two small tiers of two channels each.
///
/// Tier 0 is the capacity tier, tier 1 the bandwidth tier.
#[must_use]
pub fn small_config() -> config::MemorySystem {
    let capacity = config::Tier {
        num_channels: 2,
        l2_rop_latency: 8,
        dram_latency: 10,
        ..config::Tier::default()
    };
    let bandwidth = config::Tier {
        num_channels: 2,
        l2_rop_latency: 8,
        dram_latency: 10,
        ..config::Tier::bandwidth()
    };
    config::MemorySystem {
        tiers: vec![capacity, bandwidth],
        stats_epoch_cycles: 1000,
        ..config::MemorySystem::default()
    }
}

/// A full line access of requester 0.
#[must_use]
pub fn access(kind: access::Kind, addr: crate::address) -> access::MemAccess {
    access::Builder {
        kind,
        addr,
        req_size_bytes: 32,
        source: 0,
    }
    .build()
}
