use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Debug,
    strum::EnumIter,
    strum::EnumCount,
    strum::FromRepr,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum AccessKind {
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

impl AccessKind {
    #[must_use]
    pub fn is_write(self) -> bool {
        match self {
            AccessKind::GLOBAL_ACC_R
            | AccessKind::LOCAL_ACC_R
            | AccessKind::CONST_ACC_R
            | AccessKind::TEXTURE_ACC_R
            | AccessKind::INST_ACC_R
            | AccessKind::MIGRATE_R => false,
            AccessKind::GLOBAL_ACC_W
            | AccessKind::LOCAL_ACC_W
            | AccessKind::L1_WRBK_ACC
            | AccessKind::L2_WRBK_ACC
            | AccessKind::MIGRATE_W => true,
        }
    }

    #[must_use]
    pub fn is_migration(self) -> bool {
        matches!(self, AccessKind::MIGRATE_R | AccessKind::MIGRATE_W)
    }

    #[must_use]
    pub fn count() -> usize {
        <Self as strum::EnumCount>::COUNT
    }
}

/// Memory access statistics.
///
/// Records the number of memory fetches per access kind that were
/// admitted into the memory system.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accesses(pub HashMap<AccessKind, u64>);

impl std::ops::AddAssign for Accesses {
    fn add_assign(&mut self, other: Self) {
        for (kind, count) in other.0 {
            *self.0.entry(kind).or_insert(0) += count;
        }
    }
}

impl Accesses {
    pub fn inc(&mut self, kind: AccessKind, count: u64) {
        *self.0.entry(kind).or_insert(0) += count;
    }

    #[must_use]
    pub fn get(&self, kind: AccessKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn num_reads(&self) -> u64 {
        self.0
            .iter()
            .filter(|(kind, _)| !kind.is_write())
            .map(|(_, count)| count)
            .sum()
    }

    #[must_use]
    pub fn num_writes(&self) -> u64 {
        self.0
            .iter()
            .filter(|(kind, _)| kind.is_write())
            .map(|(_, count)| count)
            .sum()
    }
}
