use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milestone timestamps of a single page migration.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestones {
    pub marked: Option<u64>,
    pub blocked: Option<u64>,
    pub issued: Option<u64>,
    pub completed: Option<u64>,
}

impl Milestones {
    /// Cycles between blocking the page and publishing its new location.
    #[must_use]
    pub fn blocked_cycles(&self) -> Option<u64> {
        Some(self.completed?.saturating_sub(self.blocked?))
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub num_marked: u64,
    pub num_completed: u64,
    pub num_abandoned: u64,
    pub num_magical: u64,
    pub num_tier_flips: u64,
    pub num_read_requests: u64,
    pub num_write_requests: u64,
    pub num_issue_retries: u64,
    /// Cycles in which submitted accesses were held back by a blocked page
    pub page_blocking_stalls: u64,
    pub pages: BTreeMap<u64, Milestones>,
}

impl std::fmt::Display for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "migration_marked = {}", self.num_marked)?;
        writeln!(f, "migration_completed = {}", self.num_completed)?;
        writeln!(f, "migration_abandoned = {}", self.num_abandoned)?;
        writeln!(f, "migration_magical = {}", self.num_magical)?;
        writeln!(f, "migration_tier_flips = {}", self.num_tier_flips)?;
        writeln!(f, "migration_read_requests = {}", self.num_read_requests)?;
        writeln!(f, "migration_write_requests = {}", self.num_write_requests)?;
        writeln!(f, "migration_issue_retries = {}", self.num_issue_retries)?;
        writeln!(f, "page_blocking_stalls = {}", self.page_blocking_stalls)?;
        for (page, milestones) in &self.pages {
            let fmt = |v: Option<u64>| v.map_or("-".to_string(), |v| v.to_string());
            writeln!(
                f,
                "page {:#x}: marked={} blocked={} issued={} completed={}",
                page,
                fmt(milestones.marked),
                fmt(milestones.blocked),
                fmt(milestones.issued),
                fmt(milestones.completed),
            )?;
        }
        Ok(())
    }
}
