use color_eyre::eyre;
use memsim::{config, mem_fetch, testing, MemorySystem};
use pretty_assertions_sorted as diff;

fn stream(sim: &mut MemorySystem, base: u64, count: u64, write_every: u64) {
    for i in 0..count {
        let kind = if write_every > 0 && i % write_every == 0 {
            mem_fetch::access::Kind::GLOBAL_ACC_W
        } else {
            mem_fetch::access::Kind::GLOBAL_ACC_R
        };
        sim.submit(testing::access(kind, base + i * 128));
    }
}

#[test]
fn every_access_is_answered_once() -> eyre::Result<()> {
    testing::init_logging();
    let mut sim = MemorySystem::new(testing::small_config())?;
    stream(&mut sim, 0, 256, 4);
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());

    let mut uids = std::collections::HashSet::new();
    let mut num_acks = 0;
    while let Some(reply) = sim.pop_reply() {
        assert!(reply.is_reply());
        if reply.kind == mem_fetch::Kind::WRITE_ACK {
            num_acks += 1;
        }
        assert!(uids.insert(reply.uid), "duplicate reply {reply}");
    }
    assert_eq!(uids.len(), 256);
    assert_eq!(num_acks, 64);
    assert_eq!(mem_fetch::total_live_fetches(), 0);

    let stats = sim.stats();
    assert_eq!(stats.sim.num_submitted, 256);
    assert_eq!(stats.sim.num_delivered, 256);
    assert_eq!(stats.accesses.num_reads(), 192);
    assert_eq!(stats.accesses.num_writes(), 64);
    assert!(stats.dram.iter().all(stats::DRAM::is_consistent));
    Ok(())
}

#[test]
fn repeated_reads_hit_in_l2() -> eyre::Result<()> {
    let mut sim = MemorySystem::new(testing::small_config())?;
    stream(&mut sim, 0x4000, 16, 0);
    sim.run_to_completion(Some(100_000));
    let num_dram_requests: u64 = sim.stats().dram.iter().map(|dram| dram.num_req).sum();
    assert_eq!(num_dram_requests, 16);

    stream(&mut sim, 0x4000, 16, 0);
    sim.run_to_completion(Some(200_000));
    let stats = sim.stats();
    let num_dram_requests: u64 = stats.dram.iter().map(|dram| dram.num_req).sum();
    assert_eq!(num_dram_requests, 16);
    assert_eq!(stats.l2.total().hits, 16);
    assert_eq!(stats.sim.num_delivered, 0);
    while sim.pop_reply().is_some() {}
    assert_eq!(sim.stats().sim.num_delivered, 32);
    Ok(())
}

#[test]
fn addresses_decode_into_their_tier() -> eyre::Result<()> {
    let config = testing::small_config();
    let sim = MemorySystem::new(config.clone())?;
    let per_channel = config.tiers[0].num_sub_partitions_per_channel as u64;
    for (tier, mem_controller) in sim.mem_controllers.iter().enumerate() {
        let first_channel: usize = config.tiers[..tier].iter().map(|tier| tier.num_channels).sum();
        let channels = first_channel..first_channel + config.tiers[tier].num_channels;
        for addr in (0..1 << 20).step_by(96) {
            let physical = mem_controller.to_physical_address(addr);
            assert_eq!(physical.tier, tier);
            assert!(channels.contains(&(physical.chip as usize)), "{addr:#x}: {physical:?}");
            assert_eq!(physical.sub_partition / per_channel, physical.chip);
            // a page never straddles channels
            let page = mem_controller.to_physical_address(addr & !0xfff);
            assert_eq!(page.chip, physical.chip);
        }
    }
    Ok(())
}

#[test]
fn load_example_config() -> eyre::Result<()> {
    let manifest_dir = std::path::PathBuf::from(std::env!("CARGO_MANIFEST_DIR"));
    let config = config::MemorySystem::from_file(manifest_dir.join("configs/hetero.yaml"))?;
    diff::assert_eq!(
        config.tiers.iter().map(|tier| tier.name.as_str()).collect::<Vec<_>>(),
        vec!["capacity", "bandwidth"]
    );
    assert_eq!(config.total_channels(), 12);
    assert!(config.migration.enabled);
    assert_eq!(config.migration.page_size, 4096);

    let mut sim = MemorySystem::new(config)?;
    stream(&mut sim, 0, 64, 0);
    sim.run_to_completion(Some(100_000));
    assert!(!sim.busy());
    Ok(())
}
