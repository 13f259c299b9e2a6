use super::{address, mcu};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::atomic;

pub const READ_PACKET_SIZE: u8 = 8;

// bytes: 6 address, 2 miscelaneous.
pub const WRITE_PACKET_SIZE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    READ_REQUEST = 0,
    WRITE_REQUEST,
    READ_REPLY,
    WRITE_ACK,
}

/// Pipeline stage of a fetch.
///
/// Stages are ordered, a fetch only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    INITIALIZED,
    IN_ICNT_TO_MEM,
    IN_PARTITION_ROP_DELAY,
    IN_PARTITION_ICNT_TO_L2_QUEUE,
    IN_PARTITION_L2_MISS_QUEUE,
    IN_PARTITION_L2_TO_DRAM_QUEUE,
    IN_PARTITION_DRAM_LATENCY_QUEUE,
    IN_PARTITION_MC_INTERFACE_QUEUE,
    IN_PARTITION_MC_INPUT_QUEUE,
    IN_PARTITION_MC_BANK_ARB_QUEUE,
    IN_PARTITION_DRAM,
    IN_PARTITION_MC_RETURNQ,
    IN_PARTITION_DRAM_TO_L2_QUEUE,
    IN_PARTITION_L2_FILL_QUEUE,
    IN_PARTITION_L2_TO_ICNT_QUEUE,
    IN_ICNT_TO_SHADER,
    DELIVERED,
}

pub mod access {
    use serde::{Deserialize, Serialize};

    #[derive(
        Debug,
        strum::EnumIter,
        strum::EnumCount,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
    )]
    pub enum Kind {
        GLOBAL_ACC_R,
        LOCAL_ACC_R,
        CONST_ACC_R,
        TEXTURE_ACC_R,
        GLOBAL_ACC_W,
        LOCAL_ACC_W,
        L1_WRBK_ACC,
        L2_WRBK_ACC,
        INST_ACC_R,
        MIGRATE_R,
        MIGRATE_W,
    }

    impl From<Kind> for stats::mem::AccessKind {
        fn from(kind: Kind) -> Self {
            match kind {
                Kind::GLOBAL_ACC_R => Self::GLOBAL_ACC_R,
                Kind::LOCAL_ACC_R => Self::LOCAL_ACC_R,
                Kind::CONST_ACC_R => Self::CONST_ACC_R,
                Kind::TEXTURE_ACC_R => Self::TEXTURE_ACC_R,
                Kind::GLOBAL_ACC_W => Self::GLOBAL_ACC_W,
                Kind::LOCAL_ACC_W => Self::LOCAL_ACC_W,
                Kind::L1_WRBK_ACC => Self::L1_WRBK_ACC,
                Kind::L2_WRBK_ACC => Self::L2_WRBK_ACC,
                Kind::INST_ACC_R => Self::INST_ACC_R,
                Kind::MIGRATE_R => Self::MIGRATE_R,
                Kind::MIGRATE_W => Self::MIGRATE_W,
            }
        }
    }

    impl Kind {
        #[must_use]
        pub fn is_write(&self) -> bool {
            match self {
                Kind::GLOBAL_ACC_R
                | Kind::LOCAL_ACC_R
                | Kind::CONST_ACC_R
                | Kind::TEXTURE_ACC_R
                | Kind::INST_ACC_R
                | Kind::MIGRATE_R => false,
                Kind::GLOBAL_ACC_W
                | Kind::LOCAL_ACC_W
                | Kind::L1_WRBK_ACC
                | Kind::L2_WRBK_ACC
                | Kind::MIGRATE_W => true,
            }
        }

        #[must_use]
        pub fn is_writeback(&self) -> bool {
            matches!(self, Kind::L1_WRBK_ACC | Kind::L2_WRBK_ACC)
        }

        #[must_use]
        pub fn is_migration(&self) -> bool {
            matches!(self, Kind::MIGRATE_R | Kind::MIGRATE_W)
        }
    }

    #[allow(clippy::module_name_repetitions)]
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct MemAccess {
        /// Requested address.
        pub addr: crate::address,
        pub is_write: bool,
        /// Requested number of bytes.
        pub req_size_bytes: u32,
        /// Access kind.
        pub kind: Kind,
        /// Requester the reply is delivered to.
        pub source: usize,
    }

    impl std::fmt::Display for MemAccess {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "{:?}@{:#x}", self.kind, self.addr)
        }
    }

    #[derive(Debug, Clone)]
    pub struct Builder {
        pub kind: Kind,
        pub addr: crate::address,
        pub req_size_bytes: u32,
        pub source: usize,
    }

    impl Builder {
        #[must_use]
        pub fn build(self) -> MemAccess {
            MemAccess {
                addr: self.addr,
                is_write: self.kind.is_write(),
                req_size_bytes: self.req_size_bytes,
                kind: self.kind,
                source: self.source,
            }
        }
    }

    impl MemAccess {
        #[must_use]
        pub fn control_size(&self) -> u32 {
            if self.is_write {
                u32::from(super::WRITE_PACKET_SIZE)
            } else {
                u32::from(super::READ_PACKET_SIZE)
            }
        }

        #[must_use]
        pub fn size(&self) -> u32 {
            self.req_size_bytes + self.control_size()
        }
    }
}

const NUM_ACCESS_KINDS: usize = <access::Kind as strum::EnumCount>::COUNT;

thread_local! {
    static LIVE_FETCHES: RefCell<[u64; NUM_ACCESS_KINDS]> = const { RefCell::new([0; NUM_ACCESS_KINDS]) };
}

/// Number of fetches of `kind` constructed but not yet dropped on the current thread.
#[must_use]
pub fn num_live_fetches(kind: access::Kind) -> u64 {
    LIVE_FETCHES.with(|live| live.borrow()[kind as usize])
}

#[must_use]
pub fn total_live_fetches() -> u64 {
    LIVE_FETCHES.with(|live| live.borrow().iter().sum())
}

static MEM_FETCH_UID: Lazy<atomic::AtomicU64> = Lazy::new(|| atomic::AtomicU64::new(0));

/// Generate a unique ID that can be used to identify fetch requests
pub fn generate_uid() -> u64 {
    MEM_FETCH_UID.fetch_add(1, atomic::Ordering::SeqCst)
}

/// A memory transaction in flight.
///
/// Fetches are move-only: exactly one queue owns a fetch at any time.
#[derive(Debug)]
pub struct MemFetch {
    pub uid: u64,
    pub access: access::MemAccess,
    pub physical_addr: mcu::PhysicalAddress,
    pub kind: Kind,

    pub inject_cycle: Option<u64>,
    pub return_cycle: Option<u64>,

    pub status: Status,
    pub last_status_change: Option<u64>,

    /// Bytes handed to the data bus
    pub bytes_sent: u32,
    /// Bytes received from the data bus
    pub bytes_received: u32,
}

impl std::fmt::Display for MemFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:?}({:?}@{:#x} uid={})",
            self.kind,
            self.access_kind(),
            self.addr(),
            self.uid
        )
    }
}

impl Eq for MemFetch {}

impl PartialEq for MemFetch {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl std::hash::Hash for MemFetch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl Drop for MemFetch {
    fn drop(&mut self) {
        let kind = self.access.kind as usize;
        LIVE_FETCHES.with(|live| {
            let mut live = live.borrow_mut();
            live[kind] = live[kind].saturating_sub(1);
        });
    }
}

#[derive(Debug, Clone)]
pub struct Builder {
    pub access: access::MemAccess,
    pub physical_addr: mcu::PhysicalAddress,
}

impl Builder {
    #[must_use]
    pub fn build(self) -> MemFetch {
        let kind = if self.access.is_write {
            Kind::WRITE_REQUEST
        } else {
            Kind::READ_REQUEST
        };
        LIVE_FETCHES.with(|live| live.borrow_mut()[self.access.kind as usize] += 1);
        MemFetch {
            uid: generate_uid(),
            access: self.access,
            physical_addr: self.physical_addr,
            kind,
            status: Status::INITIALIZED,
            inject_cycle: None,
            return_cycle: None,
            last_status_change: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

impl From<Builder> for MemFetch {
    fn from(builder: Builder) -> Self {
        builder.build()
    }
}

impl MemFetch {
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.access.is_write
    }

    #[must_use]
    pub fn addr(&self) -> address {
        self.access.addr
    }

    /// Page aligned address of this fetch.
    #[must_use]
    pub fn page(&self, page_size: u64) -> address {
        self.access.addr & !(page_size - 1)
    }

    #[must_use]
    pub fn data_size(&self) -> u32 {
        self.access.req_size_bytes
    }

    #[must_use]
    pub fn control_size(&self) -> u32 {
        self.access.control_size()
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.data_size() + self.control_size()
    }

    /// Bytes occupied in the interconnect.
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        match self.kind {
            Kind::WRITE_REQUEST | Kind::READ_REPLY => self.size(),
            Kind::READ_REQUEST | Kind::WRITE_ACK => self.control_size(),
        }
    }

    #[must_use]
    pub fn sub_partition_id(&self) -> usize {
        self.physical_addr.sub_partition as usize
    }

    #[must_use]
    pub fn channel_id(&self) -> usize {
        self.physical_addr.chip as usize
    }

    #[must_use]
    pub fn access_kind(&self) -> access::Kind {
        self.access.kind
    }

    #[must_use]
    pub fn is_writeback(&self) -> bool {
        self.access.kind.is_writeback()
    }

    #[must_use]
    pub fn is_migration(&self) -> bool {
        self.access.kind.is_migration()
    }

    /// Advance the pipeline stage.
    ///
    /// # Panics
    /// If `time` is before the last transition or the stage moves backwards.
    pub fn set_status(&mut self, status: Status, time: u64) {
        if let Some(last) = self.last_status_change {
            assert!(
                time >= last,
                "{self}: status change to {status:?} at cycle {time} before last change at cycle {last}"
            );
        }
        assert!(
            status >= self.status,
            "{self}: status regresses from {:?} to {status:?}",
            self.status
        );
        self.status = status;
        self.last_status_change = Some(time);
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, Kind::READ_REPLY | Kind::WRITE_ACK)
    }

    pub fn set_reply(&mut self) {
        assert!(
            !self.is_writeback() && !self.is_migration(),
            "{self}: writebacks and migrations have no reply"
        );
        match self.kind {
            Kind::READ_REQUEST => {
                debug_assert!(!self.is_write());
                self.kind = Kind::READ_REPLY;
            }
            Kind::WRITE_REQUEST => {
                debug_assert!(self.is_write());
                self.kind = Kind::WRITE_ACK;
            }
            Kind::READ_REPLY | Kind::WRITE_ACK => {}
        }
    }
}
