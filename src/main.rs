use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use itertools::Itertools;
use memsim::mem_fetch::access;
use std::path::PathBuf;
use std::time::Instant;

fn parse_address(value: &str) -> Result<u64, std::num::ParseIntError> {
    match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "heterogeneous memory system timing simulator", long_about = None)]
struct Options {
    /// YAML memory system configuration (defaults to a capacity and a bandwidth tier)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many core cycles
    #[arg(long = "max-cycles")]
    max_cycles: Option<u64>,

    /// First address of the access stream
    #[arg(long, default_value = "0x0", value_parser = parse_address)]
    base: u64,

    /// Distance between consecutive accesses in bytes
    #[arg(long, default_value_t = 128)]
    stride: u64,

    /// Number of accesses in the stream
    #[arg(short = 'n', long, default_value_t = 1024)]
    count: u64,

    /// Bytes requested per access
    #[arg(long, default_value_t = 32)]
    size: u32,

    /// Make every n-th access a write (0 disables writes)
    #[arg(long = "write-every", default_value_t = 0)]
    write_every: u64,

    /// Pages to migrate before the stream starts
    #[arg(long = "migrate", value_parser = parse_address)]
    migrate: Vec<u64>,

    /// Destination tier of `--migrate`
    #[arg(long = "migrate-to", default_value_t = 1)]
    migrate_to: usize,

    /// Write the statistics as JSON to this file
    #[arg(long = "json")]
    json: Option<PathBuf>,
}

fn init_logging() {
    use std::io::Write;
    let mut log_builder = env_logger::Builder::new();
    log_builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    log_builder.parse_default_env();
    log_builder.init();
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::parse();

    let config = match &options.config {
        Some(path) => memsim::config::MemorySystem::from_file(path)
            .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
        None => memsim::config::MemorySystem::default(),
    };
    let mut log_after_cycle = config.log_after_cycle;
    if log_after_cycle.is_none() {
        init_logging();
    }

    let num_requesters = config.num_requesters;
    let page_size = config.migration.page_size;
    let mut sim = memsim::MemorySystem::new(config)?;

    for &page in &options.migrate {
        sim.migrate(page, options.migrate_to)?;
    }
    if !options.migrate.is_empty() {
        println!(
            "migrating {} to tier {}",
            options.migrate.iter().map(|page| format!("{page:#x}")).join(", "),
            options.migrate_to
        );
    }

    for i in 0..options.count {
        let is_write = options.write_every > 0 && (i + 1) % options.write_every == 0;
        let kind = if is_write {
            access::Kind::GLOBAL_ACC_W
        } else {
            access::Kind::GLOBAL_ACC_R
        };
        sim.submit(
            access::Builder {
                kind,
                addr: options.base + i * options.stride,
                req_size_bytes: options.size,
                source: (i as usize) % num_requesters,
            }
            .build(),
        );
    }

    let start = Instant::now();
    let mut num_bytes = 0u64;
    let mut total_latency = 0u64;
    let mut num_replies = 0u64;
    while sim.busy() && options.max_cycles.map_or(true, |max| sim.time() < max) {
        match log_after_cycle {
            Some(after) if sim.time() >= after => {
                println!("initializing logging after cycle {}", sim.time());
                init_logging();
                log_after_cycle.take();
            }
            _ => {}
        }
        sim.cycle();
        while let Some(reply) = sim.pop_reply() {
            num_bytes += u64::from(reply.data_size());
            if let (Some(inject), Some(ret)) = (reply.inject_cycle, reply.return_cycle) {
                total_latency += ret - inject;
            }
            num_replies += 1;
        }
    }
    if let Some(after) = log_after_cycle {
        eprintln!(
            "WARNING: log after {after} cycles but simulation ended after {} cycles",
            sim.time()
        );
    }

    let stats = sim.stats();
    print!("{stats}");
    println!(
        "transferred {} in {} replies (average latency {:.2} cycles)",
        human_bytes::human_bytes(num_bytes as f64),
        num_replies,
        if num_replies == 0 {
            0.0
        } else {
            total_latency as f64 / num_replies as f64
        }
    );
    println!(
        "migrated {}",
        human_bytes::human_bytes((stats.migration.num_completed * page_size) as f64)
    );
    println!("simulated {} cycles in {:?}", sim.time(), start.elapsed());

    #[cfg(feature = "timings")]
    if let Ok(timings) = memsim::TIMINGS.lock() {
        for (name, elapsed) in timings.iter() {
            println!("{name:>20}: {elapsed:?}");
        }
    }

    if let Some(path) = &options.json {
        let file = std::fs::File::create(path)
            .wrap_err_with(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &stats)?;
    }
    Ok(())
}
