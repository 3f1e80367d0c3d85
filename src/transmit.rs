//! Transmit engine (TX_PKT)

use anyhow::{anyhow, Result};
use log::{debug, warn};

use crate::chip::{TdmeStatus, TestPacket};
use crate::clock::MsClock;
use crate::controller::TestController;
use crate::report::{Report, ReportSink};
use crate::traits::ChipTransport;

/// Per-packet reporting is used for slow cadences and for small packet budgets
const DETAILED_REPORT_PERIOD_MS: u16 = 500;
const DETAILED_REPORT_MAX_PACKETS: u32 = 100;

impl<T, K, R> TestController<T, K, R>
where
    T: ChipTransport,
    K: MsClock,
    R: ReportSink,
{
    /// Send one packet once the packet period has elapsed.
    pub(crate) fn transmit_packet(&mut self) -> Result<()> {
        if !self.session.initialised {
            self.session.scheduler.reset();
            self.session.initialised = true;
        }

        let period = self.session.params.packet_period_ms;
        if self.elapsed_ms() <= period as u64 {
            return Ok(());
        }
        self.restart_timer();

        let (status, packet) = if self.session.params.mac_enabled {
            (TdmeStatus::Success, self.mac_transmit()?)
        } else {
            self.phy_transmit()?
        };

        self.session.results.packet_count += 1;

        let budget = self.session.params.number_of_packets;
        if period >= DETAILED_REPORT_PERIOD_MS || (budget <= DETAILED_REPORT_MAX_PACKETS && budget != 0) {
            self.sink.report(Report::PacketTransmitted {
                status,
                sequence_number: packet.sequence_number,
                data: packet.data,
            });
        } else if self.session.scheduler.tick(period) {
            self.report_transmit_analysis();
        }

        if budget != 0 && self.session.results.packet_count >= budget {
            self.deinitialise();
        }
        Ok(())
    }

    /// Raw PHY path: the chip builds everything except appended payloads.
    fn phy_transmit(&mut self) -> Result<(TdmeStatus, TestPacket)> {
        let params = &self.session.params;
        let mut packet = TestPacket::new(
            self.session.results.sequence_number as u8,
            params.payload,
            params.packet_length,
        );

        let status = self.transport.tdme_txpkt(&mut packet)?;
        self.session.results.sequence_number = self.session.results.sequence_number.wrapping_add(1);

        match status {
            TdmeStatus::Success => {
                debug!("Tx SN={} PL={}", packet.sequence_number, packet.length());
            }
            TdmeStatus::LoError => {
                self.session.results.lo_errors += 1;
                warn!("Tx: LO error on packet {}", packet.sequence_number);
            }
            other => return Err(anyhow!("TDME-TXPKT status {:?}", other)),
        }
        Ok((status, packet))
    }

    pub(crate) fn report_transmit_analysis(&mut self) {
        let results = &self.session.results;
        let mac_failures = self
            .session
            .params
            .mac_enabled
            .then_some((results.shr_errors, results.phr_errors));
        self.sink.report(Report::TransmitAnalysis {
            packet_count: results.packet_count,
            mac_failures,
        });
    }
}
