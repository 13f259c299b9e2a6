#[derive(Debug, Clone)]
pub struct Config {
    pub num_sub_partitions_per_channel: usize,
    pub dram_frfcfs_sched_queue_size: usize,
    pub dram_return_queue_size: usize,
    pub private_credit_limit: usize,
}

impl From<&crate::config::Tier> for Config {
    fn from(config: &crate::config::Tier) -> Self {
        Config {
            num_sub_partitions_per_channel: config.num_sub_partitions_per_channel,
            dram_frfcfs_sched_queue_size: config.frfcfs_sched_queue_size,
            dram_return_queue_size: config.return_queue_size,
            private_credit_limit: 1,
        }
    }
}

/// Credit based admission of sub partitions to a DRAM channel.
///
/// Each sub partition owns a private credit, the remaining capacity of the
/// channel is shared.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub struct ArbitrationUnit {
    /// id of the last subpartition that borrowed credit
    pub last_borrower: usize,
    /// `None` if the shared credit is unlimited
    pub shared_credit_limit: Option<usize>,
    pub private_credit_limit: usize,

    // credits borrowed by the subpartitions
    pub private_credit: Vec<usize>,
    pub shared_credit: usize,

    total_borrowed: u64,
    total_returned: u64,
}

impl ArbitrationUnit {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let num_borrowers = config.num_sub_partitions_per_channel;
        assert!(num_borrowers > 0);
        assert!(config.private_credit_limit > 0);
        let shared_credit_limit =
            if config.dram_frfcfs_sched_queue_size == 0 || config.dram_return_queue_size == 0 {
                // no limit if either of the queue has no limit in size
                None
            } else {
                let capacity = config.dram_frfcfs_sched_queue_size + config.dram_return_queue_size;
                Some(
                    capacity
                        .checked_sub(num_borrowers * config.private_credit_limit)
                        .expect("arbitration: too many borrowers"),
                )
            };
        Self {
            last_borrower: num_borrowers - 1,
            shared_credit_limit,
            private_credit_limit: config.private_credit_limit,
            private_credit: vec![0; num_borrowers],
            shared_credit: 0,
            total_borrowed: 0,
            total_returned: 0,
        }
    }

    /// Credits currently borrowed across all sub partitions.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.private_credit.iter().sum::<usize>() + self.shared_credit
    }

    fn shared_credit_available(&self) -> bool {
        self.shared_credit_limit
            .map_or(true, |limit| self.shared_credit < limit)
    }

    #[must_use]
    pub fn total_borrowed(&self) -> u64 {
        self.total_borrowed
    }

    #[must_use]
    pub fn total_returned(&self) -> u64 {
        self.total_returned
    }
}

pub trait Arbiter: std::fmt::Debug + Send + Sync + 'static {
    /// Check if a subpartition still has credit
    #[must_use]
    fn has_credits(&self, inner_sub_partition_id: usize) -> bool;

    /// Borrow a credit for a subpartition
    fn borrow_credit(&mut self, inner_sub_partition_id: usize);

    /// Return a credit from a subpartition
    fn return_credit(&mut self, inner_sub_partition_id: usize);

    /// Return the last subpartition that borrowed credit
    #[must_use]
    fn last_borrower(&self) -> usize;
}

impl Arbiter for ArbitrationUnit {
    #[inline]
    fn has_credits(&self, inner_sub_partition_id: usize) -> bool {
        if self.private_credit[inner_sub_partition_id] < self.private_credit_limit {
            return true;
        }
        self.shared_credit_available()
    }

    #[inline]
    fn borrow_credit(&mut self, inner_sub_partition_id: usize) {
        if self.private_credit[inner_sub_partition_id] < self.private_credit_limit {
            self.private_credit[inner_sub_partition_id] += 1;
        } else if self.shared_credit_available() {
            self.shared_credit += 1;
        } else {
            panic!(
                "arbitration: borrowing from depleted credit! (sub partition {inner_sub_partition_id})"
            );
        }
        self.total_borrowed += 1;
        self.last_borrower = inner_sub_partition_id;
    }

    #[inline]
    fn return_credit(&mut self, inner_sub_partition_id: usize) {
        let private_credit = &mut self.private_credit[inner_sub_partition_id];
        if *private_credit > 0 {
            *private_credit -= 1;
        } else {
            self.shared_credit = self
                .shared_credit
                .checked_sub(1)
                .expect("arbitration: returning more than available credits!");
        }
        self.total_returned += 1;
    }

    #[inline]
    fn last_borrower(&self) -> usize {
        self.last_borrower
    }
}
