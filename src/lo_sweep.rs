//! LO locking sweep (LO_3)
//!
//! Every channel in 11..=26 is lock-tested `lo3_locks` times, first with the LO set
//! up for receive, then for transmit. Lock failures are counted and reported; the
//! sweep carries on regardless.

use anyhow::{anyhow, Result};
use log::debug;

use crate::chip::TdmeStatus;
use crate::clock::MsClock;
use crate::controller::TestController;
use crate::report::{Report, ReportSink};
use crate::traits::ChipTransport;

pub const LO_FIRST_CHANNEL: u8 = 11;
pub const LO_LAST_CHANNEL: u8 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoDirection {
    Rx,
    Tx,
}

/// Sweep position: which lock of which channel in which direction comes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoSweep {
    pub ntest: u8,
    pub channel: u8,
    pub direction: LoDirection,
}

impl Default for LoSweep {
    fn default() -> Self {
        LoSweep {
            ntest: 0,
            channel: LO_FIRST_CHANNEL,
            direction: LoDirection::Rx,
        }
    }
}

impl LoSweep {
    /// Step to the next lock. Returns true once both directions have covered every channel;
    /// the position is back at the start by then.
    pub fn advance(&mut self, locks: u8) -> bool {
        // A lock count of 0 still runs one lock per point
        let locks = locks.max(1);

        if self.ntest + 1 < locks {
            self.ntest += 1;
            return false;
        }
        self.ntest = 0;

        if self.channel < LO_LAST_CHANNEL {
            self.channel += 1;
            return false;
        }
        self.channel = LO_FIRST_CHANNEL;

        match self.direction {
            LoDirection::Rx => {
                self.direction = LoDirection::Tx;
                false
            }
            LoDirection::Tx => {
                *self = LoSweep::default();
                true
            }
        }
    }
}

impl<T, K, R> TestController<T, K, R>
where
    T: ChipTransport,
    K: MsClock,
    R: ReportSink,
{
    pub(crate) fn lo_locking(&mut self) -> Result<()> {
        if !self.session.initialised {
            self.session.lo_sweep = LoSweep::default();
            self.session.initialised = true;
        }

        if self.elapsed_ms() <= self.session.params.lo.lo3_period_ms as u64 {
            return Ok(());
        }
        self.restart_timer();

        let sweep = self.session.lo_sweep;
        // rx_txb = true selects the receive LO; the receive pass runs first
        let confirm = self
            .transport
            .tdme_lotlk(sweep.channel, sweep.direction == LoDirection::Rx)?;
        self.sink.report(Report::LoLocking { confirm, ntest: sweep.ntest });

        match confirm.status {
            TdmeStatus::Success => {}
            TdmeStatus::LoError => {
                self.session.results.lo_errors += 1;
                debug!("LO lock failure on channel {} ({:?})", sweep.channel, sweep.direction);
            }
            other => return Err(anyhow!("TDME-LOTLK status {:?}", other)),
        }

        if self.session.lo_sweep.advance(self.session.params.lo.lo3_locks) {
            self.deinitialise();
        }
        Ok(())
    }
}
