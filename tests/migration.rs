use color_eyre::eyre;
use memsim::{mem_fetch, migration, testing, MemorySystem};
use migration::State;

const PAGE: u64 = 0x2_0000;
const OTHER_PAGE: u64 = 0x3_0000;

fn read(addr: u64) -> mem_fetch::access::MemAccess {
    testing::access(mem_fetch::access::Kind::GLOBAL_ACC_R, addr)
}

fn write(addr: u64) -> mem_fetch::access::MemAccess {
    testing::access(mem_fetch::access::Kind::GLOBAL_ACC_W, addr)
}

fn drain_replies(sim: &mut MemorySystem) -> Vec<mem_fetch::MemFetch> {
    std::iter::from_fn(|| sim.pop_reply()).collect()
}

#[test]
fn page_moves_after_all_synthetic_requests() -> eyre::Result<()> {
    testing::init_logging();
    let mut sim = MemorySystem::new(testing::small_config())?;
    assert_eq!(sim.migration.tier_map.tier_of(PAGE), 0);

    // leave dirty lines of the page in the source tier L2
    for line in 0..8 {
        sim.submit(write(PAGE + line * 128));
    }
    sim.run_to_completion(Some(100_000));
    assert_eq!(drain_replies(&mut sim).len(), 8);

    sim.migrate(PAGE, 1)?;
    assert_eq!(sim.migrate(PAGE + 0x40, 1), Err(migration::Error::AlreadyQueued(PAGE)));
    for line in 0..8 {
        sim.submit(read(PAGE + line * 128));
    }
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());

    let stats = sim.stats();
    assert_eq!(stats.migration.num_completed, 1);
    assert_eq!(stats.migration.num_read_requests, 32);
    assert_eq!(stats.migration.num_write_requests, 32);
    assert_eq!(stats.migration.num_tier_flips, 1);
    assert_eq!(sim.migration.tier_map.tier_of(PAGE), 1);

    let migration_reads: u64 = stats.dram.iter().map(|dram| dram.num_migration_reads).sum();
    let migration_writes: u64 = stats.dram.iter().map(|dram| dram.num_migration_writes).sum();
    assert_eq!((migration_reads, migration_writes), (32, 32));
    // every migration read hit the source channel, every write the destination tier
    let first_bandwidth_channel = testing::small_config().tiers[0].num_channels;
    for dram in &stats.dram {
        if dram.channel_id >= first_bandwidth_channel {
            assert_eq!(dram.num_migration_reads, 0);
        } else {
            assert_eq!(dram.num_migration_writes, 0);
        }
    }
    // dirty lines were written back before the page was copied
    assert!(stats.l2.num_flushed_lines >= 8);

    let milestones = &stats.migration.pages[&PAGE];
    let completed = milestones.completed.expect("migration completed");
    let replies = drain_replies(&mut sim);
    assert_eq!(replies.len(), 8);
    for reply in &replies {
        assert_eq!(reply.physical_addr.tier, 1, "{reply} decoded before the page moved");
        assert!(reply.inject_cycle >= Some(completed));
    }
    assert!(stats.migration.page_blocking_stalls > 0);
    assert_eq!(mem_fetch::total_live_fetches(), 0);
    Ok(())
}

#[test]
fn other_pages_flow_while_a_page_is_held() -> eyre::Result<()> {
    let mut sim = MemorySystem::new(testing::small_config())?;
    sim.migrate(PAGE, 1)?;
    for line in 0..4 {
        sim.submit(read(PAGE + line * 128));
        sim.submit(read(OTHER_PAGE + line * 128));
    }
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());

    let completed = sim.stats().migration.pages[&PAGE]
        .completed
        .expect("migration completed");
    let replies = drain_replies(&mut sim);
    assert_eq!(replies.len(), 8);
    let (held, other): (Vec<_>, Vec<_>) = replies
        .iter()
        .partition(|reply| reply.page(4096) == PAGE);
    assert_eq!(held.len(), 4);
    for reply in other {
        assert_eq!(reply.physical_addr.tier, 0);
        assert!(reply.inject_cycle < Some(completed));
    }
    for reply in held {
        assert_eq!(reply.physical_addr.tier, 1);
    }
    // accesses to a page keep their submission order
    let held_addrs: Vec<_> = replies
        .iter()
        .filter(|reply| reply.page(4096) == PAGE)
        .map(|reply| reply.inject_cycle)
        .collect();
    assert!(held_addrs.windows(2).all(|pair| pair[0] <= pair[1]));
    Ok(())
}

#[test]
fn hot_pages_are_detected_and_migrated() -> eyre::Result<()> {
    let mut config = testing::small_config();
    config.migration.enabled = true;
    config.migration.threshold = 4;
    let mut sim = MemorySystem::new(config)?;

    for line in 0..16 {
        sim.submit(read(PAGE + line * 128));
    }
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());
    assert_eq!(drain_replies(&mut sim).len(), 16);

    let stats = sim.stats();
    assert_eq!(stats.migration.num_marked, 1);
    assert_eq!(stats.migration.num_completed, 1);
    assert_eq!(sim.migration.tier_map.tier_of(PAGE), 1);
    assert!(sim.migration.tier_map.was_migrated(PAGE));
    Ok(())
}

#[test]
fn magical_migration_issues_no_requests() -> eyre::Result<()> {
    let mut config = testing::small_config();
    config.migration.magical = true;
    config.migration.migration_cost = 50;
    let mut sim = MemorySystem::new(config)?;

    sim.migrate(PAGE, 1)?;
    sim.submit(read(PAGE));
    sim.run_to_completion(Some(100_000));

    let stats = sim.stats();
    assert_eq!(stats.migration.num_magical, 1);
    assert_eq!(stats.migration.num_read_requests + stats.migration.num_write_requests, 0);
    let milestones = &stats.migration.pages[&PAGE];
    let blocked = milestones.blocked.expect("page was blocked");
    let completed = milestones.completed.expect("migration completed");
    assert!(completed - blocked >= 50);

    let reply = sim.pop_reply().expect("reply");
    assert_eq!(reply.physical_addr.tier, 1);
    Ok(())
}

#[test]
fn refused_migration_requests_are_resent() -> eyre::Result<()> {
    let mut config = testing::small_config();
    for tier in &mut config.tiers {
        tier.input_queue_size = 2;
        tier.frfcfs_sched_queue_size = 4;
    }
    let mut sim = MemorySystem::new(config)?;
    sim.migrate(PAGE, 1)?;
    for line in 0..4 {
        sim.submit(read(PAGE + line * 128));
    }
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());

    let stats = sim.stats();
    assert!(stats.migration.num_issue_retries > 0);
    assert_eq!(stats.migration.num_completed, 1);
    assert_eq!(stats.migration.num_read_requests, 32);
    assert_eq!(stats.migration.num_write_requests, 32);
    // channels count every admitted request, a resent offset would show up twice
    let migration_reads: u64 = stats.dram.iter().map(|dram| dram.num_migration_reads).sum();
    let migration_writes: u64 = stats.dram.iter().map(|dram| dram.num_migration_writes).sum();
    assert_eq!((migration_reads, migration_writes), (32, 32));
    assert_eq!(sim.migration.tier_map.tier_of(PAGE), 1);

    let replies = drain_replies(&mut sim);
    assert_eq!(replies.len(), 4);
    assert!(replies.iter().all(|reply| reply.physical_addr.tier == 1));
    Ok(())
}

#[test]
fn last_page_of_address_space_migrates() -> eyre::Result<()> {
    let page = u64::MAX & !0xfff;
    let mut sim = MemorySystem::new(testing::small_config())?;
    sim.submit(write(page + 0xf80));
    sim.run_to_completion(Some(100_000));
    assert_eq!(drain_replies(&mut sim).len(), 1);

    sim.migrate(page + 0x40, 1)?;
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());

    let stats = sim.stats();
    assert_eq!(stats.migration.num_completed, 1);
    assert!(stats.l2.num_flushed_lines >= 1);
    assert_eq!(sim.migration.tier_map.tier_of(page), 1);
    Ok(())
}

#[test]
fn abandoning_a_draining_page_releases_held_accesses() -> eyre::Result<()> {
    let mut config = testing::small_config();
    config.migration.migration_cost = 1000;
    let mut sim = MemorySystem::new(config)?;

    let channel_of = |sim: &MemorySystem, page: u64| sim.mem_controllers[0].to_physical_address(page).chip;
    let second = (1..64)
        .map(|i| PAGE + i * 0x1000)
        .find(|&page| channel_of(&sim, page) == channel_of(&sim, PAGE))
        .expect("second page on the same channel");

    sim.migrate(PAGE, 1)?;
    sim.migrate(second, 1)?;
    let source_channel = |sim: &MemorySystem, page: u64| {
        sim.migration.entry(page).map(|entry| entry.source_channel)
    };
    assert_eq!(source_channel(&sim, PAGE), source_channel(&sim, second));

    for line in 0..4 {
        sim.submit(read(PAGE + line * 128));
    }
    for _ in 0..10_000 {
        if sim.migration.entry(PAGE).map(|entry| entry.state) == Some(State::Draining) {
            break;
        }
        sim.cycle();
    }
    assert_eq!(sim.migration.entry(PAGE).map(|entry| entry.state), Some(State::Draining));
    assert!(sim.migration.is_blocked(PAGE));
    // the second page waits behind the head of the channel
    assert_eq!(sim.migration.entry(second).map(|entry| entry.state), Some(State::Marked));

    sim.run_for(100);
    sim.migration.abandon(PAGE)?;
    assert!(!sim.migration.is_blocked(PAGE));
    sim.run_to_completion(Some(500_000));
    assert!(!sim.busy());

    let stats = sim.stats();
    assert_eq!(stats.migration.num_abandoned, 1);
    assert_eq!(stats.migration.num_completed, 1);
    assert_eq!(sim.migration.tier_map.tier_of(PAGE), 0);
    assert_eq!(sim.migration.tier_map.tier_of(second), 1);

    let replies = drain_replies(&mut sim);
    assert_eq!(replies.len(), 4);
    for reply in &replies {
        assert_eq!(reply.page(4096), PAGE);
        assert_eq!(reply.physical_addr.tier, 0, "{reply} left the source tier");
    }
    Ok(())
}
