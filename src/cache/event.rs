use crate::address;

/// A dirty line written back to DRAM.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct EvictedBlock {
    pub block_addr: address,
    pub size: u32,
}

#[must_use]
pub fn was_writeback_sent(events: &[Event]) -> Option<&EvictedBlock> {
    events.iter().find_map(|event| match event {
        Event::WriteBackRequestSent { evicted_block } => Some(evicted_block),
        Event::ReadRequestSent => None,
    })
}

#[must_use]
pub fn was_read_sent(events: &[Event]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, Event::ReadRequestSent))
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum Event {
    WriteBackRequestSent { evicted_block: EvictedBlock },
    ReadRequestSent,
}
