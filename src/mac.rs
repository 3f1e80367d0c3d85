//! MAC-assisted test path
//!
//! With MAC testing enabled, TX_PKT sends acknowledged data frames between two fixed test
//! endpoints instead of raw PHY test packets, and the receive modes take MAC data
//! indications. No-ack and channel access failures are tallied in the SHR and PHR counters.

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::chip::{
    fill_payload, DataConfirm, DataIndication, DataRequest, HwmeAttribute, MacAttribute, MacStatus,
    RxPacketIndication, TdmeStatus, TdmeTestMode, TestPacket, CCA_MODE_ED_OR_CS,
};
use crate::clock::MsClock;
use crate::controller::TestController;
use crate::report::ReportSink;
use crate::traits::ChipTransport;

pub const PAN_ID: u16 = 0xCA5C;
pub const TX_SHORT_ADDRESS: u16 = 0xCA51;
pub const RX_SHORT_ADDRESS: u16 = 0xCA52;
pub const TX_IEEE_ADDRESS: [u8; 8] = [0x01, 0x00, 0x00, 0x00, 0xA0, 0x0D, 0x5C, 0xCA];
pub const RX_IEEE_ADDRESS: [u8; 8] = [0x02, 0x00, 0x00, 0x00, 0xA0, 0x0D, 0x5C, 0xCA];

/// SFR controlling automatic ED measurement on receive
const SFR_PAGE_AUTOED: u8 = 0;
const SFR_ADDRESS_AUTOED: u8 = 0xB2;
const AUTOED_OFF: u8 = 0x00;
const AUTOED_ON: u8 = 0x08;

fn le16(value: u16) -> [u8; 2] {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    buf
}

impl<T, K, R> TestController<T, K, R>
where
    T: ChipTransport,
    K: MsClock,
    R: ReportSink,
{
    // ========================================================================
    // SETUP / TEARDOWN
    // ========================================================================

    /// Leave test mode and set the MAC up as the transmitting endpoint.
    pub(crate) fn mac_tx_initialise(&mut self) -> Result<()> {
        let t = &mut self.transport;
        t.tdme_testmode(TdmeTestMode::Off).context("Leaving testmode for MAC")?;
        t.tdme_setsfr(SFR_PAGE_AUTOED, SFR_ADDRESS_AUTOED, AUTOED_OFF)?;
        t.mlme_reset(false)?;
        t.hwme_set(HwmeAttribute::CcaMode, &[CCA_MODE_ED_OR_CS])?;
        t.hwme_set(HwmeAttribute::EdThreshold, &[self.session.params.ed_threshold])?;
        t.mlme_set(MacAttribute::PanId, &le16(PAN_ID))?;
        t.mlme_set(MacAttribute::IeeeAddress, &TX_IEEE_ADDRESS)?;
        t.mlme_set(MacAttribute::ShortAddress, &le16(TX_SHORT_ADDRESS))?;
        t.mlme_set(MacAttribute::RxOnWhenIdle, &[0])?;
        info!("MAC configured as Tx endpoint {:04X}", TX_SHORT_ADDRESS);
        Ok(())
    }

    /// Leave test mode and set the MAC up as the receiving endpoint.
    pub(crate) fn mac_rx_initialise(&mut self) -> Result<()> {
        let t = &mut self.transport;
        t.tdme_testmode(TdmeTestMode::Off).context("Leaving testmode for MAC")?;
        t.tdme_setsfr(SFR_PAGE_AUTOED, SFR_ADDRESS_AUTOED, AUTOED_ON)?;
        t.mlme_reset(false)?;
        t.mlme_set(MacAttribute::PanId, &le16(PAN_ID))?;
        t.mlme_set(MacAttribute::IeeeAddress, &RX_IEEE_ADDRESS)?;
        t.mlme_set(MacAttribute::ShortAddress, &le16(RX_SHORT_ADDRESS))?;
        t.mlme_set(MacAttribute::RxOnWhenIdle, &[1])?;
        self.session.last_dsn = None;
        info!("MAC configured as Rx endpoint {:04X}", RX_SHORT_ADDRESS);
        Ok(())
    }

    pub(crate) fn mac_deinitialise(&mut self) -> Result<()> {
        self.transport.mlme_reset(true)
    }

    // ========================================================================
    // DATA PATH
    // ========================================================================

    /// Build the payload on the host and queue it as an acknowledged data frame.
    /// The sequence number advances when the confirm comes back.
    pub(crate) fn mac_transmit(&mut self) -> Result<TestPacket> {
        let params = &self.session.params;
        let mut packet = TestPacket::new(
            self.session.results.sequence_number as u8,
            params.payload,
            params.packet_length,
        );

        let mut random = Ok(());
        let transport = &mut self.transport;
        fill_payload(packet.data_type, packet.sequence_number, &mut packet.data, |buf| {
            random = transport.random_bytes(buf);
        });
        random.context("Random payload")?;

        let request = DataRequest {
            dst_pan_id: le16(PAN_ID),
            dst_short_address: le16(RX_SHORT_ADDRESS),
            msdu: packet.data.clone(),
            msdu_handle: packet.sequence_number,
            ack_requested: true,
        };
        self.transport.mcps_data_request(&request)?;
        debug!("MCPS-DATA handle={} len={}", request.msdu_handle, request.msdu.len());
        Ok(packet)
    }

    pub(crate) fn handle_data_confirm(&mut self, confirm: DataConfirm) {
        let results = &mut self.session.results;
        match confirm.status {
            MacStatus::Success => {}
            MacStatus::NoAck => results.shr_errors += 1,
            MacStatus::ChannelAccessFailure => results.phr_errors += 1,
            MacStatus::Other(code) => {
                warn!("MCPS-DATA confirm handle={} status {:02X}", confirm.msdu_handle, code)
            }
        }
        results.sequence_number = results.sequence_number.wrapping_add(1);
    }

    /// A repeat of the previous DSN is a retransmission and is dropped.
    pub(crate) fn handle_data_indication(&mut self, ind: DataIndication) {
        let duplicate = self.session.last_dsn == Some(ind.dsn);
        self.session.last_dsn = Some(ind.dsn);
        if duplicate {
            debug!("Rx: discarding retransmission DSN={}", ind.dsn);
            return;
        }

        self.session.results.packet_received = true;

        let ed_value = self.hwme_read(HwmeAttribute::EdValueLastPacket);
        let fo_value = self.hwme_read(HwmeAttribute::FrequencyOffset);

        self.record_received_packet(RxPacketIndication {
            status: TdmeStatus::Success,
            ed_value,
            cs_value: ind.link_quality,
            fo_value,
            data: ind.msdu,
        });
    }

    fn hwme_read(&mut self, attribute: HwmeAttribute) -> u8 {
        match self.transport.hwme_get(attribute) {
            Ok(value) => value,
            Err(e) => {
                warn!("HWME-GET {:?} failed: {:#}", attribute, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{Indication, PayloadType};
    use crate::clock::SimClock;
    use crate::controller::TestMode;
    use crate::report::Report;
    use crate::traits::MockChipTransport;
    use anyhow::anyhow;
    use mockall::predicate::*;
    use mockall::Sequence;

    fn data(dsn: u8) -> Indication {
        Indication::Data(DataIndication {
            dsn,
            link_quality: 60,
            msdu: vec![1, 2, 3, 4],
        })
    }

    #[test]
    fn test_le16_encoding() {
        assert_eq!(le16(PAN_ID), [0x5C, 0xCA]);
        assert_eq!(le16(RX_SHORT_ADDRESS), [0x52, 0xCA]);
    }

    #[test]
    fn test_mac_tx_initialise_sequence() {
        let mut mock = MockChipTransport::new();
        let mut seq = Sequence::new();
        mock.expect_tdme_set().returning(|_, _| Ok(()));

        mock.expect_tdme_testmode()
            .with(eq(TdmeTestMode::Tx))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_tdme_testmode()
            .with(eq(TdmeTestMode::Off))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_tdme_setsfr()
            .with(eq(0u8), eq(0xB2u8), eq(0x00u8))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        mock.expect_mlme_reset()
            .with(eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_hwme_set()
            .withf(|a, v| *a == HwmeAttribute::CcaMode && v.to_vec() == vec![0u8])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_hwme_set()
            .withf(|a, v| *a == HwmeAttribute::EdThreshold && v.to_vec() == vec![0x80u8])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_mlme_set()
            .withf(|a, v| *a == MacAttribute::PanId && v.to_vec() == vec![0x5Cu8, 0xCA])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_mlme_set()
            .withf(|a, v| *a == MacAttribute::IeeeAddress && v.to_vec() == TX_IEEE_ADDRESS.to_vec())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_mlme_set()
            .withf(|a, v| *a == MacAttribute::ShortAddress && v.to_vec() == vec![0x51u8, 0xCA])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_mlme_set()
            .withf(|a, v| *a == MacAttribute::RxOnWhenIdle && v.to_vec() == vec![0u8])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut controller = TestController::new(mock, SimClock::new(), Vec::new());
        controller.configure_mac(true);
        controller.initialise(TestMode::TxPkt).unwrap();
        assert!(controller.is_running());
    }

    #[test]
    fn test_mac_init_failure_aborts_arm() {
        let mut mock = MockChipTransport::new();
        mock.expect_tdme_set().returning(|_, _| Ok(()));
        mock.expect_tdme_testmode().returning(|_| Ok(()));
        mock.expect_tdme_setsfr().returning(|_, _, _| Ok(()));
        mock.expect_mlme_reset().returning(|_| Err(anyhow!("MAC busy")));

        let mut controller = TestController::new(mock, SimClock::new(), Vec::new());
        controller.configure_mac(true);
        assert!(controller.initialise(TestMode::RxPer).is_err());
        assert_eq!(controller.mode(), TestMode::Off);
        assert!(!controller.is_running());
    }

    fn mac_rx_controller() -> TestController<MockChipTransport, SimClock, Vec<Report>> {
        let mut mock = MockChipTransport::new();
        mock.expect_tdme_set().returning(|_, _| Ok(()));
        mock.expect_tdme_testmode().returning(|_| Ok(()));
        mock.expect_tdme_setsfr()
            .with(eq(0u8), eq(0xB2u8), eq(0x08u8))
            .returning(|_, _, _| Ok(()));
        mock.expect_mlme_reset().returning(|_| Ok(()));
        mock.expect_mlme_set().returning(|_, _| Ok(()));
        mock.expect_hwme_get()
            .with(eq(HwmeAttribute::EdValueLastPacket))
            .returning(|_| Ok(180));
        mock.expect_hwme_get()
            .with(eq(HwmeAttribute::FrequencyOffset))
            .returning(|_| Err(anyhow!("timeout")));

        let mut controller = TestController::new(mock, SimClock::new(), Vec::new());
        controller.configure_mac(true);
        controller.parameters_mut().number_of_packets = 0;
        controller.initialise(TestMode::RxPsn).unwrap();
        controller
    }

    #[test]
    fn test_duplicate_dsn_discarded() {
        let mut controller = mac_rx_controller();
        controller.handler();

        controller.handle_indication(data(5));
        controller.handler();
        controller.handle_indication(data(5));
        controller.handler();

        assert_eq!(controller.results().packet_count, 1);
        assert_eq!(controller.results().ed_max, 180);

        controller.handle_indication(data(6));
        controller.handler();
        assert_eq!(controller.results().packet_count, 2);
    }

    #[test]
    fn test_first_dsn_always_accepted() {
        let mut controller = mac_rx_controller();
        controller.handler();
        controller.handle_indication(data(0));
        controller.handler();
        assert_eq!(controller.results().packet_count, 1);

        let last = controller.sink().last().map(|r| r.to_string()).unwrap_or_default();
        assert_eq!(last, "Rx: PL=  4: 01 02; ED: 180; CS: 60; FO: 0");
    }

    #[test]
    fn test_phy_indications_ignored_with_mac() {
        let mut controller = mac_rx_controller();
        controller.handle_indication(Indication::RxPacket(RxPacketIndication {
            status: TdmeStatus::Success,
            ed_value: 1,
            cs_value: 1,
            fo_value: 1,
            data: vec![],
        }));
        assert!(!controller.results().packet_received);
    }

    #[test]
    fn test_confirm_statuses_counted() {
        let mut mock = MockChipTransport::new();
        mock.expect_tdme_set().returning(|_, _| Ok(()));
        mock.expect_tdme_testmode().returning(|_| Ok(()));
        mock.expect_tdme_setsfr().returning(|_, _, _| Ok(()));
        mock.expect_mlme_reset().returning(|_| Ok(()));
        mock.expect_hwme_set().returning(|_, _| Ok(()));
        mock.expect_mlme_set().returning(|_, _| Ok(()));

        let mut controller = TestController::new(mock, SimClock::new(), Vec::new());
        controller.configure_mac(true);
        controller.initialise(TestMode::TxPkt).unwrap();

        for status in [MacStatus::Success, MacStatus::NoAck, MacStatus::NoAck, MacStatus::ChannelAccessFailure] {
            controller.handle_indication(Indication::DataConfirm(DataConfirm { msdu_handle: 0, status }));
        }

        let results = controller.results();
        assert_eq!(results.shr_errors, 2);
        assert_eq!(results.phr_errors, 1);
        assert_eq!(results.sequence_number, 4);

        controller.deinitialise();
        let text: Vec<String> = controller.sink().iter().map(|r| r.to_string()).collect();
        assert!(text.contains(&"Tx: 0 Packets sent\n2 No-Acks; 1 Channel Access Failures".to_string()));
    }

    #[test]
    fn test_mac_transmit_builds_request() {
        let mut mock = MockChipTransport::new();
        mock.expect_tdme_set().returning(|_, _| Ok(()));
        mock.expect_tdme_testmode().returning(|_| Ok(()));
        mock.expect_tdme_setsfr().returning(|_, _, _| Ok(()));
        mock.expect_mlme_reset().returning(|_| Ok(()));
        mock.expect_hwme_set().returning(|_, _| Ok(()));
        mock.expect_mlme_set().returning(|_, _| Ok(()));
        mock.expect_random_bytes()
            .times(1)
            .returning(|buf| {
                buf.fill(0xEE);
                Ok(())
            });
        mock.expect_mcps_data_request()
            .withf(|r| {
                r.dst_pan_id == [0x5C, 0xCA]
                    && r.dst_short_address == [0x52, 0xCA]
                    && r.ack_requested
                    && r.msdu_handle == 0
                    && r.msdu == vec![0, 0xEE, 0xEE, 0xEE]
            })
            .times(1)
            .returning(|_| Ok(()));

        let clock = SimClock::new();
        let mut controller = TestController::new(mock, clock.clone(), Vec::new());
        controller.configure_mac(true);
        {
            let params = controller.parameters_mut();
            params.payload = PayloadType::SequenceRandom;
            params.packet_length = 4;
            params.packet_period_ms = 1000;
        }
        controller.initialise(TestMode::TxPkt).unwrap();
        clock.advance(1001);
        controller.handler();

        assert_eq!(controller.results().packet_count, 1);
        // Advanced by the confirm, not by the request
        assert_eq!(controller.results().sequence_number, 0);
    }
}
