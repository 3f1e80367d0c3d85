use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::chip::{PayloadType, TdmeAttribute, MAX_PACKET_LENGTH};

/// Test parameter set, written once per run and read by every engine.
///
/// Ranges are checked by [`TestParameters::validate`] at the boundary; the engine itself
/// takes the values as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestParameters {
    pub packet_period_ms: u16,
    pub packet_length: u8,
    /// 0 = unbounded
    pub number_of_packets: u32,
    pub payload: PayloadType,
    pub channel: u8,
    pub tx_power: TxPower,
    pub ed_threshold: u8,
    /// Report SHR/PHR/preamble false-sync errors
    pub rx_ffsync: bool,
    pub lo: LoParameters,
    /// Analog test bus selector
    pub atm: u8,
    /// Route data through the MAC (acks/retries) instead of raw PHY test packets
    pub mac_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPower {
    /// Power amplifier current (0..=63)
    pub ib: u8,
    /// Power amplifier frequency trim (0..=7)
    pub pb: u8,
    /// Boost mode (0..=1)
    pub boost: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoParameters {
    /// LO test 1: 1 = rx, 0 = tx
    pub lo1_rx_txb: bool,
    /// LO test 2 FDAC value (0..=48)
    pub lo2_fdac: u8,
    /// LO test 3: locks per channel and direction
    pub lo3_locks: u8,
    /// LO test 3: delay between locks
    pub lo3_period_ms: u8,
}

impl Default for TxPower {
    fn default() -> Self {
        TxPower { ib: 1, pb: 3, boost: 0 }
    }
}

impl Default for LoParameters {
    fn default() -> Self {
        LoParameters {
            lo1_rx_txb: false,
            lo2_fdac: 32,
            lo3_locks: 20,
            lo3_period_ms: 10,
        }
    }
}

impl Default for TestParameters {
    fn default() -> Self {
        TestParameters {
            packet_period_ms: 1000,
            packet_length: 20,
            number_of_packets: 10000,
            payload: PayloadType::Random,
            channel: 0x12,
            tx_power: TxPower::default(),
            ed_threshold: 0x80,
            rx_ffsync: false,
            lo: LoParameters::default(),
            atm: 0x00,
            mac_enabled: false,
        }
    }
}

impl TestParameters {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
        let params: TestParameters = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse parameter file {}", path.display()))?;
        Ok(params)
    }

    /// Range checks applied by the command dispatcher before parameters are stored.
    pub fn validate(&self) -> Result<()> {
        if self.packet_length as usize > MAX_PACKET_LENGTH {
            return Err(anyhow!("packet_length {} exceeds {}", self.packet_length, MAX_PACKET_LENGTH));
        }
        if !(11..=26).contains(&self.channel) {
            return Err(anyhow!("channel {} outside 11..=26", self.channel));
        }
        if self.tx_power.ib > 63 || self.tx_power.pb > 7 || self.tx_power.boost > 1 {
            return Err(anyhow!(
                "tx_power IB={} PB={} BOOST={} out of range (63/7/1)",
                self.tx_power.ib, self.tx_power.pb, self.tx_power.boost
            ));
        }
        if self.lo.lo2_fdac > 48 {
            return Err(anyhow!("lo2_fdac {} exceeds 48", self.lo.lo2_fdac));
        }
        if self.atm > 31 {
            return Err(anyhow!("atm {} exceeds 31", self.atm));
        }
        Ok(())
    }

    /// Payload of the TDME-SET request for `attribute`.
    pub fn tdme_config(&self, attribute: TdmeAttribute, tx_continuous: bool) -> Vec<u8> {
        match attribute {
            TdmeAttribute::Channel => vec![self.channel],
            TdmeAttribute::TxConfig => vec![
                self.tx_power.ib,
                self.tx_power.pb,
                self.tx_power.boost,
                tx_continuous as u8,
            ],
            TdmeAttribute::EdConfig => vec![self.ed_threshold],
            TdmeAttribute::RxConfig => vec![self.rx_ffsync as u8],
            TdmeAttribute::Lo1Config => vec![self.lo.lo1_rx_txb as u8, self.channel],
            TdmeAttribute::Lo2Config => vec![self.lo.lo2_fdac],
            TdmeAttribute::AtmConfig => vec![self.atm],
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadType::Random => "Random",
            PayloadType::SequenceRandom => "Random with Sequence Number",
            PayloadType::Count => "Count (Increment)",
            PayloadType::Appended => "Appended",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let params = TestParameters::default();
        assert_eq!(params.packet_period_ms, 1000);
        assert_eq!(params.packet_length, 20);
        assert_eq!(params.number_of_packets, 10000);
        assert_eq!(params.payload, PayloadType::Random);
        assert_eq!(params.channel, 0x12);
        assert_eq!(params.tx_power, TxPower { ib: 1, pb: 3, boost: 0 });
        assert_eq!(params.ed_threshold, 0x80);
        assert!(!params.rx_ffsync);
        assert_eq!(params.lo.lo2_fdac, 32);
        assert_eq!(params.lo.lo3_locks, 20);
        assert_eq!(params.lo.lo3_period_ms, 10);
        assert!(!params.mac_enabled);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut params = TestParameters::default();
        params.channel = 27;
        assert!(params.validate().is_err());

        let mut params = TestParameters::default();
        params.packet_length = 128;
        assert!(params.validate().is_err());

        let mut params = TestParameters::default();
        params.tx_power.pb = 8;
        assert!(params.validate().is_err());

        let mut params = TestParameters::default();
        params.lo.lo2_fdac = 49;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_tdme_config_payloads() {
        let params = TestParameters::default();
        assert_eq!(params.tdme_config(TdmeAttribute::Channel, false), vec![0x12]);
        assert_eq!(params.tdme_config(TdmeAttribute::TxConfig, true), vec![1, 3, 0, 1]);
        assert_eq!(params.tdme_config(TdmeAttribute::Lo1Config, false), vec![0, 0x12]);
        assert_eq!(params.tdme_config(TdmeAttribute::Lo2Config, false), vec![32]);
    }

    #[test]
    fn test_partial_json_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"packet_period_ms": 100, "payload": "count", "lo": {{"lo3_locks": 2}}}}"#)
            .expect("write");

        let params = TestParameters::from_json_file(file.path()).expect("load failed");
        assert_eq!(params.packet_period_ms, 100);
        assert_eq!(params.payload, PayloadType::Count);
        assert_eq!(params.lo.lo3_locks, 2);
        assert_eq!(params.lo.lo2_fdac, 32);
        assert_eq!(params.channel, 0x12);
    }
}
