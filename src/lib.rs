#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::too_many_arguments,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

pub mod arbitration;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dram;
pub mod fifo;
pub mod interconn;
pub mod mcu;
pub mod mem_fetch;
pub mod mem_partition_unit;
pub mod mem_sub_partition;
pub mod migration;
pub mod mshr;
pub mod sim;
pub mod tier;

pub mod testing;

pub use sim::MemorySystem;

pub type address = u64;

#[cfg(feature = "timings")]
pub static TIMINGS: once_cell::sync::Lazy<
    std::sync::Mutex<indexmap::IndexMap<&'static str, std::time::Duration>>,
> = once_cell::sync::Lazy::new(|| std::sync::Mutex::new(indexmap::IndexMap::new()));

#[cfg(feature = "timings")]
pub fn record_timing(name: &'static str, elapsed: std::time::Duration) {
    if let Ok(mut timings) = TIMINGS.lock() {
        *timings.entry(name).or_default() += elapsed;
    }
}
