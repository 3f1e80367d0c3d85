//! Simulated transceiver.
//!
//! `SimRadio` answers every chip command the engine issues and plays the remote peer:
//! while armed for receive (or with the MAC receiver on) it produces one packet per
//! peer period, with configurable loss, corruption and retransmissions. Randomness
//! comes from a seeded generator so runs are reproducible.

use anyhow::{anyhow, Result};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

use crate::chip::{
    fill_payload, DataConfirm, DataIndication, DataRequest, EdIndication, HwmeAttribute, Indication,
    LoLockConfirm, MacAttribute, MacStatus, RxPacketIndication, TdmeAttribute, TdmeStatus,
    TdmeTestMode, TestPacket,
};
use crate::clock::MsClock;
use crate::traits::ChipTransport;

/// Probabilities (0.0..=1.0) of the simulated channel misbehaving
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimImpairments {
    /// Peer packet never arrives
    pub loss_rate: f64,
    /// Peer packet arrives with a bad CRC
    pub error_rate: f64,
    /// MAC data request is not acknowledged
    pub no_ack_rate: f64,
    /// MAC data frame is delivered twice with the same DSN
    pub retransmit_rate: f64,
    /// LO lock request fails
    pub lo_fail_rate: f64,
}

/// Counters of what the radio was asked to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub test_packets_sent: u32,
    pub data_requests: u32,
    pub lock_requests: u32,
    pub peer_packets: u32,
}

pub struct SimRadio<K: MsClock> {
    clock: K,
    rng: StdRng,
    impairments: SimImpairments,
    peer_period_ms: u64,
    peer_packet_length: u8,

    testmode: TdmeTestMode,
    channel: u8,
    ed_threshold: u8,
    mac_rx_on: bool,

    next_peer_ms: Option<u64>,
    peer_dsn: u8,
    last_ed: u8,
    last_fo: u8,
    pending: VecDeque<Indication>,
    counters: SimCounters,
}

impl<K: MsClock> SimRadio<K> {
    pub fn new(clock: K, seed: u64) -> Self {
        SimRadio {
            clock,
            rng: StdRng::seed_from_u64(seed),
            impairments: SimImpairments::default(),
            peer_period_ms: 100,
            peer_packet_length: 20,
            testmode: TdmeTestMode::Off,
            channel: 11,
            ed_threshold: 0x80,
            mac_rx_on: false,
            next_peer_ms: None,
            peer_dsn: 0,
            last_ed: 0,
            last_fo: 0,
            pending: VecDeque::new(),
            counters: SimCounters::default(),
        }
    }

    pub fn with_impairments(mut self, impairments: SimImpairments) -> Self {
        self.impairments = impairments;
        self
    }

    /// Interval of the simulated peer's transmissions
    pub fn with_peer_period(mut self, period_ms: u64) -> Self {
        self.peer_period_ms = period_ms.max(1);
        self
    }

    pub fn with_peer_packet_length(mut self, length: u8) -> Self {
        self.peer_packet_length = length;
        self
    }

    pub fn counters(&self) -> SimCounters {
        self.counters
    }

    pub fn testmode(&self) -> TdmeTestMode {
        self.testmode
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    fn receiving(&self) -> bool {
        self.mac_rx_on || matches!(self.testmode, TdmeTestMode::Rx | TdmeTestMode::Ed)
    }

    fn schedule_peer(&mut self) {
        self.next_peer_ms = if self.receiving() {
            Some(self.clock.now_ms() + self.peer_period_ms)
        } else {
            None
        };
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.random_bool(probability.min(1.0))
    }

    fn peer_payload(&mut self) -> Vec<u8> {
        let mut data = vec![0u8; self.peer_packet_length as usize];
        self.rng.fill(&mut data[..]);
        data
    }

    /// Produce the peer's next transmission if one is due.
    fn peer_event(&mut self) -> Option<Indication> {
        let due = self.next_peer_ms?;
        if self.clock.now_ms() < due {
            return None;
        }
        self.next_peer_ms = Some(due + self.peer_period_ms);
        self.counters.peer_packets += 1;

        if self.roll(self.impairments.loss_rate) {
            debug!("sim: peer packet lost");
            return None;
        }

        self.last_ed = self.rng.random_range(90..=200);
        self.last_fo = self.rng.random_range(-6i8..=6) as u8;
        let cs_value = self.rng.random_range(20..=120);

        if self.mac_rx_on {
            self.peer_dsn = self.peer_dsn.wrapping_add(1);
            let ind = DataIndication {
                dsn: self.peer_dsn,
                link_quality: cs_value,
                msdu: self.peer_payload(),
            };
            if self.roll(self.impairments.retransmit_rate) {
                self.pending.push_back(Indication::Data(ind.clone()));
            }
            return Some(Indication::Data(ind));
        }

        match self.testmode {
            TdmeTestMode::Rx => {
                let status = if self.roll(self.impairments.error_rate) {
                    TdmeStatus::FcsError
                } else {
                    TdmeStatus::Success
                };
                Some(Indication::RxPacket(RxPacketIndication {
                    status,
                    ed_value: self.last_ed,
                    cs_value,
                    fo_value: self.last_fo,
                    data: self.peer_payload(),
                }))
            }
            TdmeTestMode::Ed => Some(Indication::EnergyDetected(EdIndication {
                threshold: self.ed_threshold,
                ed_value: self.ed_threshold.saturating_add(self.rng.random_range(1..=40)),
                cs_value,
                time_above_threshold_us: self.rng.random_range(64..=4000),
            })),
            _ => None,
        }
    }
}

impl<K: MsClock> ChipTransport for SimRadio<K> {
    fn tdme_set(&mut self, attribute: TdmeAttribute, value: &[u8]) -> Result<()> {
        let first = *value
            .first()
            .ok_or_else(|| anyhow!("TDME-SET {:?}: empty value", attribute))?;
        match attribute {
            TdmeAttribute::Channel => {
                if !(11..=26).contains(&first) {
                    return Err(anyhow!("TDME-SET channel {} invalid", first));
                }
                self.channel = first;
            }
            TdmeAttribute::EdConfig => self.ed_threshold = first,
            _ => {}
        }
        Ok(())
    }

    fn tdme_testmode(&mut self, mode: TdmeTestMode) -> Result<()> {
        debug!("sim: testmode {:?}", mode);
        self.testmode = mode;
        self.schedule_peer();
        Ok(())
    }

    fn tdme_setsfr(&mut self, _page: u8, _address: u8, _value: u8) -> Result<()> {
        Ok(())
    }

    fn tdme_txpkt(&mut self, packet: &mut TestPacket) -> Result<TdmeStatus> {
        if self.testmode != TdmeTestMode::Tx {
            return Err(anyhow!("TDME-TXPKT outside Tx testmode"));
        }
        let rng = &mut self.rng;
        fill_payload(packet.data_type, packet.sequence_number, &mut packet.data, |buf| {
            rng.fill(buf)
        });
        self.counters.test_packets_sent += 1;
        Ok(TdmeStatus::Success)
    }

    fn tdme_lotlk(&mut self, channel: u8, rx_txb: bool) -> Result<LoLockConfirm> {
        if self.testmode != TdmeTestMode::Lo3 {
            return Err(anyhow!("TDME-LOTLK outside LO3 testmode"));
        }
        self.counters.lock_requests += 1;
        let status = if self.roll(self.impairments.lo_fail_rate) {
            TdmeStatus::LoError
        } else {
            TdmeStatus::Success
        };
        Ok(LoLockConfirm {
            status,
            channel,
            rx_txb,
            fdac: self.rng.random_range(16..=40),
            amp: self.rng.random_range(4..=12),
            txcal: if rx_txb { 0 } else { self.rng.random_range(1..=15) },
        })
    }

    fn mlme_reset(&mut self, _set_default_pib: bool) -> Result<()> {
        self.mac_rx_on = false;
        self.pending.clear();
        self.schedule_peer();
        Ok(())
    }

    fn mlme_set(&mut self, attribute: MacAttribute, value: &[u8]) -> Result<()> {
        if attribute == MacAttribute::RxOnWhenIdle {
            self.mac_rx_on = value.first().copied().unwrap_or(0) != 0;
            self.schedule_peer();
        }
        Ok(())
    }

    fn hwme_set(&mut self, _attribute: HwmeAttribute, _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn hwme_get(&mut self, attribute: HwmeAttribute) -> Result<u8> {
        match attribute {
            HwmeAttribute::EdValueLastPacket => Ok(self.last_ed),
            HwmeAttribute::FrequencyOffset => Ok(self.last_fo),
            HwmeAttribute::EdThreshold => Ok(self.ed_threshold),
            HwmeAttribute::CcaMode => Ok(0),
        }
    }

    fn mcps_data_request(&mut self, request: &DataRequest) -> Result<()> {
        self.counters.data_requests += 1;
        let status = if self.roll(self.impairments.no_ack_rate) {
            MacStatus::NoAck
        } else {
            MacStatus::Success
        };
        self.pending.push_back(Indication::DataConfirm(DataConfirm {
            msdu_handle: request.msdu_handle,
            status,
        }));
        Ok(())
    }

    fn random_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.rng.fill(buf);
        Ok(())
    }

    fn poll_indication(&mut self) -> Result<Option<Indication>> {
        if let Some(indication) = self.pending.pop_front() {
            return Ok(Some(indication));
        }
        Ok(self.peer_event())
    }
}
