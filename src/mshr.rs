use super::{address, mem_fetch};
use std::collections::{HashMap, VecDeque};

/// Miss status handling entry.
///
/// Holds the accesses merged into an outstanding miss.
/// The access that caused the miss travels to DRAM itself.
#[derive(Debug)]
pub struct Entry<F> {
    requests: VecDeque<F>,
}

impl<F> Entry<F> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &F> + '_ {
        self.requests.iter()
    }
}

impl<F> Default for Entry<F> {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
        }
    }
}

/// Miss status handling registers.
#[derive(Debug)]
pub struct Table<F> {
    num_entries: usize,
    max_merged: usize,
    entries: HashMap<address, Entry<F>>,
}

pub trait MSHR<F> {
    /// Checks if there is no more space for tracking a new memory access.
    #[must_use]
    fn full(&self, block_addr: address) -> bool;

    #[must_use]
    fn get(&self, block_addr: address) -> Option<&Entry<F>>;

    /// Track a new miss.
    fn allocate(&mut self, block_addr: address);

    /// Merge an access into the outstanding miss of its block.
    fn merge(&mut self, block_addr: address, fetch: F);

    /// Remove the entry of a filled block.
    fn remove(&mut self, block_addr: address) -> Option<Entry<F>>;
}

impl MSHR<mem_fetch::MemFetch> for Table<mem_fetch::MemFetch> {
    fn full(&self, block_addr: address) -> bool {
        match self.entries.get(&block_addr) {
            Some(entry) => entry.requests.len() >= self.max_merged,
            None => self.entries.len() >= self.num_entries,
        }
    }

    fn get(&self, block_addr: address) -> Option<&Entry<mem_fetch::MemFetch>> {
        self.entries.get(&block_addr)
    }

    fn allocate(&mut self, block_addr: address) {
        assert!(
            !self.entries.contains_key(&block_addr),
            "mshr: block {block_addr:#x} already has an outstanding miss"
        );
        self.entries.insert(block_addr, Entry::default());
        assert!(self.entries.len() <= self.num_entries);
    }

    fn merge(&mut self, block_addr: address, fetch: mem_fetch::MemFetch) {
        let Some(entry) = self.entries.get_mut(&block_addr) else {
            panic!("mshr: merge of {fetch} without outstanding miss");
        };
        assert!(entry.requests.len() < self.max_merged);
        entry.requests.push_back(fetch);
    }

    fn remove(&mut self, block_addr: address) -> Option<Entry<mem_fetch::MemFetch>> {
        self.entries.remove(&block_addr)
    }
}

impl<F> Table<F> {
    #[must_use]
    pub fn new(num_entries: usize, max_merged: usize) -> Self {
        Self {
            num_entries,
            max_merged,
            entries: HashMap::with_capacity(num_entries),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Block addresses with an outstanding miss.
    pub fn blocks(&self) -> impl Iterator<Item = address> + '_ {
        self.entries.keys().copied()
    }
}

impl<F> IntoIterator for Entry<F> {
    type Item = F;
    type IntoIter = std::collections::vec_deque::IntoIter<F>;

    fn into_iter(self) -> Self::IntoIter {
        self.requests.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{Table, MSHR};
    use crate::{mcu, mem_fetch};

    fn read(addr: u64) -> mem_fetch::MemFetch {
        mem_fetch::tests::fetch(
            mem_fetch::access::Kind::GLOBAL_ACC_R,
            addr,
            mcu::PhysicalAddress::default(),
        )
    }

    #[test]
    fn merge_limit() {
        let mut mshrs = Table::new(2, 2);
        assert!(!mshrs.full(0x80));
        mshrs.allocate(0x80);
        mshrs.merge(0x80, read(0x80));
        assert!(!mshrs.full(0x80));
        mshrs.merge(0x80, read(0x84));
        assert!(mshrs.full(0x80));

        mshrs.allocate(0x100);
        // no entries left for a third block
        assert!(mshrs.full(0x180));

        let merged: Vec<_> = mshrs
            .remove(0x80)
            .into_iter()
            .flatten()
            .map(|fetch| fetch.addr())
            .collect();
        assert_eq!(merged, vec![0x80, 0x84]);
        assert_eq!(mshrs.len(), 1);
        assert!(mshrs.get(0x100).is_some_and(super::Entry::is_empty));
    }
}
