//! Receive engines: packet error rate (RX_PER), packet sniffer (RX_PSN) and
//! energy sniffer (RX_EDSN), plus the PHY indication handlers feeding them.

use anyhow::{anyhow, Result};
use log::debug;

use crate::chip::{EdIndication, RxPacketIndication, TdmeStatus};
use crate::clock::MsClock;
use crate::controller::TestController;
use crate::report::{Report, ReportSink};
use crate::traits::ChipTransport;

/// Interval of the sniffer's idle timer
pub const PSN_REPORT_PERIOD_MS: u64 = 5000;

impl<T, K, R> TestController<T, K, R>
where
    T: ChipTransport,
    K: MsClock,
    R: ReportSink,
{
    // ========================================================================
    // ENGINES
    // ========================================================================

    /// PER measurement. Every packet period yields either a received or a missed packet.
    ///
    /// A slot is missed after 1.5 periods of silence following a received packet, or after
    /// a single period following a missed one, so one late packet is not counted twice.
    pub(crate) fn receive_packet_per(&mut self) -> Result<()> {
        let period = self.session.params.packet_period_ms as u64;
        if period == 0 {
            return Err(anyhow!("RX PER packet period is 0"));
        }

        if !self.session.initialised {
            self.session.scheduler.reset();
            self.session.missed_last = false;
            if !self.session.results.packet_received {
                self.session.stats.init();
                return Ok(());
            }
            self.restart_timer();
            self.session.initialised = true;
        }

        let elapsed = self.elapsed_ms();
        let missed = if self.session.missed_last {
            elapsed > period
        } else {
            elapsed > period + period / 2
        };

        if !missed && !self.session.results.packet_received {
            return Ok(());
        }
        self.restart_timer();

        if missed {
            self.session.results.missed += 1;
            self.session.missed_last = true;
            debug!("Rx: packet missed after {} ms", elapsed);
        } else {
            self.session.missed_last = false;
        }

        let budget = self.session.params.number_of_packets;
        if budget != 0 && self.session.results.packet_count >= budget {
            self.deinitialise();
            return Ok(());
        }

        self.session.results.packet_count += 1;

        if self.session.scheduler.tick(self.session.params.packet_period_ms) {
            self.session.stats.report(&mut self.session.results);
            let summary = self.session.receive_summary();
            self.sink.report(Report::ReceiveAnalysis(summary));
        }

        self.session.results.packet_received = false;
        Ok(())
    }

    /// Sniffer: count packets, no loss accounting.
    pub(crate) fn receive_packet_psn(&mut self) {
        if !self.session.initialised {
            if !self.session.results.packet_received {
                self.session.stats.init();
            }
            self.session.initialised = true;
            return;
        }

        if self.session.results.packet_received {
            self.session.results.packet_received = false;
            self.session.results.packet_count += 1;
            let budget = self.session.params.number_of_packets;
            if budget != 0 && self.session.results.packet_count >= budget {
                self.deinitialise();
            }
        } else if self.elapsed_ms() > PSN_REPORT_PERIOD_MS {
            // Idle timer only; sniffing has no periodic summary
            self.restart_timer();
        }
    }

    /// Energy sniffer: count detections. Reporting happens in the indication handler.
    pub(crate) fn receive_ed(&mut self) {
        if self.session.results.packet_received {
            self.session.results.packet_received = false;
            self.session.results.packet_count += 1;
        }
    }

    // ========================================================================
    // INDICATIONS
    // ========================================================================

    pub(crate) fn handle_rx_packet(&mut self, ind: RxPacketIndication) {
        let results = &mut self.session.results;
        match ind.status {
            TdmeStatus::LoError => results.lo_errors += 1,
            TdmeStatus::FcsError => results.crc_errors += 1,
            TdmeStatus::ShrError => results.shr_errors += 1,
            TdmeStatus::PhrError => results.phr_errors += 1,
            _ => {}
        }
        results.packet_received = true;

        self.record_received_packet(ind);
    }

    /// Feed a received packet into the statistics and report it when per-packet reporting applies.
    pub(crate) fn record_received_packet(&mut self, ind: RxPacketIndication) {
        self.session.stats.accumulate(
            &mut self.session.results,
            ind.ed_value,
            ind.cs_value,
            ind.fo_value,
        );

        if self.session.reports_each_rx_packet() {
            self.sink.report(Report::PacketReceived(ind));
        }
    }

    pub(crate) fn handle_ed_indication(&mut self, indication: EdIndication) {
        self.session.results.packet_received = true;
        let count = self.session.results.packet_count;
        self.sink.report(Report::EnergyDetected { indication, count });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::Indication;
    use crate::clock::SimClock;
    use crate::controller::TestMode;
    use crate::sim::SimRadio;
    use crate::traits::MockChipTransport;

    fn rx_packet(status: TdmeStatus) -> RxPacketIndication {
        RxPacketIndication {
            status,
            ed_value: 100,
            cs_value: 50,
            fo_value: 0xFF,
            data: vec![0x11, 0x22, 0x33, 0, 0],
        }
    }

    fn armed_controller(mode: TestMode, period: u16) -> (TestController<MockChipTransport, SimClock, Vec<Report>>, SimClock) {
        let mut mock = MockChipTransport::new();
        mock.expect_tdme_set().returning(|_, _| Ok(()));
        mock.expect_tdme_testmode().returning(|_| Ok(()));

        let clock = SimClock::new();
        let mut controller = TestController::new(mock, clock.clone(), Vec::new());
        controller.parameters_mut().packet_period_ms = period;
        controller.parameters_mut().number_of_packets = 0;
        controller.initialise(mode).unwrap();
        (controller, clock)
    }

    #[test]
    fn test_per_zero_period_exits() {
        let (mut controller, _) = armed_controller(TestMode::RxPer, 0);
        controller.handler();
        assert_eq!(controller.mode(), TestMode::Off);
        assert_eq!(
            controller.sink().last().map(|r| r.to_string()),
            Some("PHY Test Exit: RX PER packet period is 0.".to_string())
        );
    }

    #[test]
    fn test_per_waits_for_first_packet() {
        let (mut controller, clock) = armed_controller(TestMode::RxPer, 100);
        for _ in 0..10 {
            clock.advance(100);
            controller.handler();
        }
        assert_eq!(controller.results().missed, 0);
        assert_eq!(controller.results().packet_count, 0);

        controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::Success)));
        controller.handler();
        assert_eq!(controller.results().packet_count, 1);
        assert!(!controller.results().packet_received);
    }

    #[test]
    fn test_per_missed_threshold_after_received_and_after_missed() {
        let (mut controller, clock) = armed_controller(TestMode::RxPer, 100);
        controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::Success)));
        controller.handler();

        // 1.5 periods is still within the window
        clock.advance(150);
        controller.handler();
        assert_eq!(controller.results().missed, 0);

        clock.advance(1);
        controller.handler();
        assert_eq!(controller.results().missed, 1);

        // After a miss a single period is enough
        clock.advance(101);
        controller.handler();
        assert_eq!(controller.results().missed, 2);
        assert_eq!(controller.results().packet_count, 3);
    }

    #[test]
    fn test_rx_status_counters() {
        let (mut controller, _) = armed_controller(TestMode::RxPsn, 100);
        controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::FcsError)));
        controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::ShrError)));
        controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::PhrError)));
        controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::LoError)));

        let results = controller.results();
        assert_eq!(results.crc_errors, 1);
        assert_eq!(results.shr_errors, 1);
        assert_eq!(results.phr_errors, 1);
        assert_eq!(results.lo_errors, 1);
        assert_eq!(results.ed_max, 100);

        // Sniffer reports every packet regardless of period
        let rx_lines = controller
            .sink()
            .iter()
            .filter(|r| matches!(r, Report::PacketReceived(_)))
            .count();
        assert_eq!(rx_lines, 4);
        assert_eq!(
            controller.sink().last().map(|r| r.to_string()),
            Some("Rx: LO Error".to_string())
        );
    }

    #[test]
    fn test_psn_counts_until_budget() {
        let (mut controller, _) = armed_controller(TestMode::RxPsn, 100);
        controller.parameters_mut().number_of_packets = 3;
        controller.handler();

        for _ in 0..5 {
            controller.handle_indication(Indication::RxPacket(rx_packet(TdmeStatus::Success)));
            controller.handler();
        }

        assert_eq!(controller.mode(), TestMode::Off);
        assert_eq!(controller.results().packet_count, 3);
        let text = controller
            .sink()
            .iter()
            .find(|r| matches!(r, Report::TestResult(_)))
            .map(|r| r.to_string())
            .unwrap_or_default();
        assert!(text.starts_with("Test Result: 3 Packets received, 0 Errors"));
        assert!(text.contains("Rx Overall Averages: ED: 100; CS: 50; FO: -1"));
    }

    #[test]
    fn test_ed_sniffer_counts_and_reports() {
        let (mut controller, _) = armed_controller(TestMode::RxEdsn, 100);
        let event = EdIndication {
            threshold: 128,
            ed_value: 140,
            cs_value: 7,
            time_above_threshold_us: 250,
        };

        controller.handle_indication(Indication::EnergyDetected(event.clone()));
        controller.handler();
        controller.handle_indication(Indication::EnergyDetected(event));
        controller.handler();
        controller.handler();

        assert_eq!(controller.results().packet_count, 2);
        assert_eq!(
            controller.sink().last().map(|r| r.to_string()),
            Some("ED above 128: ED=140; CS=  7; THigh=  250 us; N=1".to_string())
        );
    }

    #[test]
    fn test_per_against_sim_radio() {
        let clock = SimClock::new();
        let radio = SimRadio::new(clock.clone(), 7).with_peer_period(50);
        let mut controller = TestController::new(radio, clock.clone(), Vec::new());
        controller.parameters_mut().packet_period_ms = 50;
        controller.parameters_mut().number_of_packets = 20;
        controller.initialise(TestMode::RxPer).unwrap();

        for _ in 0..5000 {
            clock.advance(1);
            controller.process_loop_iteration().unwrap();
            if !controller.is_running() {
                break;
            }
        }

        assert_eq!(controller.mode(), TestMode::Off);
        assert_eq!(controller.results().packet_count, 20);
        assert_eq!(controller.results().missed, 0);
    }
}
