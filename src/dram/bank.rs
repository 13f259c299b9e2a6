use super::Request;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    IDLE,
    ACTIVE,
}

/// Countdown timers of a single bank.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankTimers {
    /// activate to read
    pub rcd: u64,
    /// activate to write
    pub rcdwr: u64,
    /// row active time
    pub ras: u64,
    /// precharge
    pub rp: u64,
    /// row cycle
    pub rc: u64,
    /// write to precharge
    pub wtp: u64,
    /// read to precharge
    pub rtp: u64,
}

impl BankTimers {
    pub fn decrement(&mut self) {
        for timer in self.iter_mut() {
            *timer = timer.saturating_sub(1);
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|timer| *timer == 0)
    }

    #[must_use]
    pub fn to_array(&self) -> [u64; 7] {
        [
            self.rcd, self.rcdwr, self.ras, self.rp, self.rc, self.wtp, self.rtp,
        ]
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut u64> {
        [
            &mut self.rcd,
            &mut self.rcdwr,
            &mut self.ras,
            &mut self.rp,
            &mut self.rc,
            &mut self.wtp,
            &mut self.rtp,
        ]
        .into_iter()
    }
}

/// Timers shared by the banks of a bank group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankGroupTimers {
    /// column to column within the group
    pub ccdl: u64,
    /// read to precharge within the group
    pub rtpl: u64,
}

impl BankGroupTimers {
    pub fn decrement(&mut self) {
        self.ccdl = self.ccdl.saturating_sub(1);
        self.rtpl = self.rtpl.saturating_sub(1);
    }

    #[must_use]
    pub fn to_array(&self) -> [u64; 2] {
        [self.ccdl, self.rtpl]
    }
}

/// Timers shared by all banks of a channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelTimers {
    /// column to column
    pub ccd: u64,
    /// activate to activate
    pub rrd: u64,
    /// read to write turnaround
    pub rtw: u64,
    /// write to read turnaround
    pub wtr: u64,
}

impl ChannelTimers {
    pub fn decrement(&mut self) {
        self.ccd = self.ccd.saturating_sub(1);
        self.rrd = self.rrd.saturating_sub(1);
        self.rtw = self.rtw.saturating_sub(1);
        self.wtr = self.wtr.saturating_sub(1);
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|timer| *timer == 0)
    }

    #[must_use]
    pub fn to_array(&self) -> [u64; 4] {
        [self.ccd, self.rrd, self.rtw, self.wtr]
    }
}

#[derive(Debug, Default)]
pub struct Bank {
    pub state: State,
    pub curr_row: u64,
    pub timers: BankTimers,
    /// Request currently serviced by this bank
    pub mrq: Option<Request>,
    pub num_accesses: u64,
    pub num_idle: u64,
}

impl Bank {
    /// The open row, if any.
    #[must_use]
    pub fn open_row(&self) -> Option<u64> {
        match self.state {
            State::ACTIVE => Some(self.curr_row),
            State::IDLE => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BankTimers, ChannelTimers};

    #[test]
    fn timers_decrement_to_zero() {
        let mut timers = BankTimers {
            rcd: 2,
            ras: 1,
            ..BankTimers::default()
        };
        timers.decrement();
        assert_eq!(timers.rcd, 1);
        assert_eq!(timers.ras, 0);
        timers.decrement();
        timers.decrement();
        assert!(timers.is_zero());

        let mut channel = ChannelTimers {
            wtr: 1,
            ..ChannelTimers::default()
        };
        assert!(!channel.is_zero());
        channel.decrement();
        channel.decrement();
        assert!(channel.is_zero());
    }
}
