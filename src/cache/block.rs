use crate::address;

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Status {
    #[default]
    INVALID = 0,
    /// Allocated for a pending fill
    RESERVED,
    VALID,
    MODIFIED,
}

/// A cache line without sectors.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Line {
    pub block_addr: address,
    pub status: Status,
    pub alloc_time: u64,
    pub fill_time: u64,
    pub last_access_time: u64,
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("addr", &self.block_addr)
            .field("status", &self.status)
            .finish()
    }
}

impl Line {
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == Status::VALID
    }

    #[inline]
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.status == Status::MODIFIED
    }

    #[inline]
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.status == Status::INVALID
    }

    #[inline]
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.status == Status::RESERVED
    }

    /// Whether the line holds `block_addr`, including pending fills.
    #[inline]
    #[must_use]
    pub fn holds(&self, block_addr: address) -> bool {
        !self.is_invalid() && self.block_addr == block_addr
    }

    pub fn allocate(&mut self, block_addr: address, status: Status, time: u64) {
        self.block_addr = block_addr;
        self.status = status;
        self.alloc_time = time;
        self.last_access_time = time;
        self.fill_time = 0;
    }

    pub fn fill(&mut self, time: u64) {
        debug_assert!(self.is_reserved(), "fill of unreserved {self}");
        self.status = Status::VALID;
        self.fill_time = time;
        self.last_access_time = time;
    }

    pub fn invalidate(&mut self) {
        self.status = Status::INVALID;
    }
}
