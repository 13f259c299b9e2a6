#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use color_eyre::eyre;
use criterion::{black_box, Criterion};
use memsim::{config, dram, mcu, mem_fetch, mem_fetch::access, testing, MemorySystem};

pub fn run_stream(count: u64, stride: u64, migrate: bool) -> eyre::Result<u64> {
    let mut config = testing::small_config();
    config.migration.enabled = migrate;
    config.migration.threshold = 16;
    let mut sim = MemorySystem::new(config)?;
    for i in 0..count {
        let kind = if i % 4 == 0 {
            access::Kind::GLOBAL_ACC_W
        } else {
            access::Kind::GLOBAL_ACC_R
        };
        sim.submit(testing::access(kind, i * stride));
    }
    let cycles = sim.run_to_completion(Some(10_000_000));
    while sim.pop_reply().is_some() {}
    Ok(cycles)
}

pub fn stream_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    group.bench_function("sequential/4096", |b| {
        b.iter(|| run_stream(black_box(4096), 128, false));
    });
    group.bench_function("strided/4096", |b| {
        b.iter(|| run_stream(black_box(4096), 4096 + 128, false));
    });
    group.bench_function("sequential/4096/migration", |b| {
        b.iter(|| run_stream(black_box(4096), 128, true));
    });
}

/// Drive a single channel until `count` requests were answered.
///
/// Returns the number of channel cycles.
pub fn run_channel(count: u64, stride: u64) -> eyre::Result<u64> {
    let tier = config::Tier {
        num_channels: 1,
        ..config::Tier::default()
    };
    let mem_controller = mcu::MemoryControllerUnit::new(0, &tier, 0, 0)?;
    let mut dram = dram::DRAM::new(0, 0, &tier);
    let (mut pushed, mut answered, mut cycle) = (0, 0, 0);
    while answered < count {
        if pushed < count && !dram.full() {
            let kind = if pushed % 4 == 0 {
                access::Kind::GLOBAL_ACC_W
            } else {
                access::Kind::GLOBAL_ACC_R
            };
            let access = testing::access(kind, pushed * stride);
            let physical_addr = mem_controller.to_physical_address(access.addr);
            dram.push(mem_fetch::Builder { access, physical_addr }.build(), cycle);
            pushed += 1;
        }
        black_box(dram.cycle(cycle));
        while dram.return_queue_pop().is_some() {
            answered += 1;
        }
        answered += dram.drain_completed().len() as u64;
        cycle += 1;
    }
    Ok(cycle)
}

pub fn channel_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    group.bench_function("sequential/4096", |b| {
        b.iter(|| run_channel(black_box(4096), 128));
    });
    group.bench_function("row_conflicts/4096", |b| {
        b.iter(|| run_channel(black_box(4096), 1 << 20));
    });
}

criterion::criterion_group!(benches, stream_benchmark, channel_benchmark);
criterion::criterion_main!(benches);
